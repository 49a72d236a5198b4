//! In-process document store.
//!
//! Implements both collaborator traits over plain maps. Reads and writes can
//! be made to fail on demand, reads can be made to miss, and reads can be
//! stalled so two requests interleave. That is how retry, no-partial-write
//! and concurrent-move behaviour of the core is exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadflow_common::{
    Activity, AuditLookup, AuditRecord, Lead, LeadPatch, LeadStore, StoreError,
};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    leads: Mutex<HashMap<String, Lead>>,
    audits: Mutex<HashMap<String, AuditRecord>>,
    failing_reads: AtomicU32,
    hidden_reads: AtomicU32,
    stalled_reads: AtomicU32,
    stall_ms: AtomicU64,
    failing_writes: AtomicBool,
    failing_audits: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn leads(&self) -> MutexGuard<'_, HashMap<String, Lead>> {
        self.leads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn audits(&self) -> MutexGuard<'_, HashMap<String, AuditRecord>> {
        self.audits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a lead without going through the trait.
    pub fn seed(&self, lead: Lead) {
        self.leads().insert(lead.id.clone(), lead);
    }

    pub fn snapshot(&self, id: &str) -> Option<Lead> {
        self.leads().get(id).cloned()
    }

    pub fn record_audit(&self, lead_id: &str, summary: &str) -> AuditRecord {
        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            lead_id: lead_id.to_string(),
            summary: summary.to_string(),
            completed_at: Utc::now(),
        };
        self.audits().insert(lead_id.to_string(), record.clone());
        record
    }

    /// The next `n` lead reads fail with `Unavailable`.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// The next `n` lead reads miss, as if the write had not propagated yet.
    pub fn hide_next_reads(&self, n: u32) {
        self.hidden_reads.store(n, Ordering::SeqCst);
    }

    /// The next `n` lead reads take their copy, then sleep for `delay` before
    /// returning it.
    pub fn stall_next_reads(&self, n: u32, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.stall_ms.store(ms, Ordering::SeqCst);
        self.stalled_reads.store(n, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.failing_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_audit_lookups(&self, fail: bool) {
        self.failing_audits.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn push_activity(lead: &mut Lead, activity: Activity) {
    let at = activity.timestamp;
    lead.activities.push(activity);
    if lead.last_contact_at.is_none_or(|prev| prev < at) {
        lead.last_contact_at = Some(at);
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.failing_reads) {
            return Err(StoreError::Unavailable("read timed out".to_string()));
        }
        if Self::take_one(&self.hidden_reads) {
            return Ok(None);
        }
        let lead = self.leads().get(id).cloned();
        if Self::take_one(&self.stalled_reads) {
            let ms = self.stall_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        Ok(lead)
    }

    async fn list_leads(&self) -> Result<Vec<Lead>, StoreError> {
        let mut leads: Vec<Lead> = self.leads().values().cloned().collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(leads)
    }

    async fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        self.check_write()?;
        let mut leads = self.leads();
        if leads.contains_key(&lead.id) {
            return Err(StoreError::lead_exists(&lead.id));
        }
        leads.insert(lead.id.clone(), lead);
        Ok(())
    }

    async fn update_lead(&self, id: &str, patch: LeadPatch) -> Result<(), StoreError> {
        self.check_write()?;
        let mut leads = self.leads();
        let lead = leads
            .get_mut(id)
            .ok_or_else(|| StoreError::lead_not_found(id))?;
        patch.apply(lead, Utc::now());
        Ok(())
    }

    async fn append_activity(&self, id: &str, activity: Activity) -> Result<(), StoreError> {
        self.check_write()?;
        let mut leads = self.leads();
        let lead = leads
            .get_mut(id)
            .ok_or_else(|| StoreError::lead_not_found(id))?;
        push_activity(lead, activity);
        Ok(())
    }

    async fn commit_transition(
        &self,
        id: &str,
        expected_stage: &str,
        patch: LeadPatch,
        activity: Activity,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut leads = self.leads();
        let lead = leads
            .get_mut(id)
            .ok_or_else(|| StoreError::lead_not_found(id))?;
        if lead.stage != expected_stage {
            return Err(StoreError::stage_conflict(id, expected_stage, &lead.stage));
        }
        patch.apply(lead, Utc::now());
        push_activity(lead, activity);
        Ok(())
    }
}

#[async_trait]
impl AuditLookup for MemoryStore {
    async fn audit_for_lead(&self, lead_id: &str) -> Result<Option<AuditRecord>, StoreError> {
        if self.failing_audits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit lookup failed".to_string()));
        }
        Ok(self.audits().get(lead_id).cloned())
    }
}
