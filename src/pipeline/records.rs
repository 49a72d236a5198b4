//! Lead reads with bounded retry, and unguarded field updates.
//!
//! Reads absorb read-after-write propagation lag by retrying a fixed number
//! of times with a fixed delay. Writes are never retried here.

use std::sync::Arc;
use std::time::Duration;

use leadflow_common::{Lead, LeadPatch, LeadStore, NextAction, ServiceInterest, WriteTime, parse_amount};
use serde::{Deserialize, Deserializer};

use crate::errors::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRetry {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReadRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

#[derive(Clone)]
pub struct LeadRecords {
    store: Arc<dyn LeadStore>,
    retry: ReadRetry,
}

impl LeadRecords {
    pub fn new(store: Arc<dyn LeadStore>, retry: ReadRetry) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.store
    }

    /// Fetch the authoritative copy of a lead.
    ///
    /// Transient errors and absent documents are retried; after the last
    /// attempt an absent lead is `Ok(None)` and a still-unavailable store is
    /// a transient `WorkflowError::Store`.
    pub async fn get_lead_by_id(&self, id: &str) -> Result<Option<Lead>, WorkflowError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.store.get_lead(id).await {
                Ok(Some(lead)) => return Ok(Some(lead)),
                Ok(None) => {
                    last_error = None;
                    tracing::debug!(lead_id = %id, attempt, "Lead not visible yet");
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(lead_id = %id, attempt, error = %e, "Transient read failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        match last_error {
            Some(e) => Err(WorkflowError::Store(e)),
            None => Ok(None),
        }
    }

    /// Apply a direct field update. Never touches the stage.
    pub async fn update_fields(
        &self,
        id: &str,
        update: LeadFieldsUpdate,
        actor: &str,
    ) -> Result<(), WorkflowError> {
        let patch = update.into_patch(actor)?;
        self.store.update_lead(id, patch).await?;
        tracing::info!(lead_id = %id, actor = %actor, "Lead fields updated");
        Ok(())
    }
}

/// A monetary amount as typed by a user or already normalized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Minor(i64),
    Text(String),
}

impl AmountInput {
    fn normalize(&self) -> Result<i64, WorkflowError> {
        match self {
            AmountInput::Minor(v) if *v >= 0 => Ok(*v),
            AmountInput::Minor(v) => Err(WorkflowError::InvalidFieldUpdate(format!(
                "value must not be negative (got {})",
                v
            ))),
            AmountInput::Text(text) => parse_amount(text).ok_or_else(|| {
                WorkflowError::InvalidFieldUpdate(format!("'{}' is not a valid amount", text))
            }),
        }
    }
}

/// Fields a caller may change outside of a stage transition. Absent fields
/// are left alone; an explicit `null` clears the field. Naming `stage` is a
/// deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeadFieldsUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub company: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub address: Option<Option<String>>,
    #[serde(default)]
    pub value: Option<AmountInput>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub proposal_id: Option<Option<String>>,
    #[serde(default)]
    pub service_interest: Option<Vec<ServiceInterest>>,
    #[serde(default)]
    pub audit_pending: Option<bool>,
    /// `Some(None)` clears the pending action.
    #[serde(default, deserialize_with = "explicit_null")]
    pub next_action: Option<Option<String>>,
}

/// A lead handed off by capture. It always lands on the first stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewLead {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub value: Option<AmountInput>,
    #[serde(default)]
    pub service_interest: Option<ServiceInterest>,
}

impl NewLead {
    pub fn into_lead(self, first_stage: &str, actor: &str) -> Result<Lead, WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidFieldUpdate(
                "name must not be blank".to_string(),
            ));
        }
        let value = self.value.as_ref().map(AmountInput::normalize).transpose()?;
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut lead = Lead::new(id, self.name, first_stage, actor);
        lead.company = self.company;
        lead.phone = self.phone;
        lead.email = self.email;
        lead.address = self.address;
        lead.value = value.unwrap_or(0);
        lead.service_interest = self.service_interest.into_iter().collect();
        Ok(lead)
    }
}

fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl LeadFieldsUpdate {
    pub fn into_patch(self, actor: &str) -> Result<LeadPatch, WorkflowError> {
        let value = self.value.as_ref().map(AmountInput::normalize).transpose()?;

        let service_interest = match self.service_interest {
            Some(mut tags) => {
                tags.sort();
                tags.dedup();
                if tags.len() > 1 {
                    return Err(WorkflowError::InvalidFieldUpdate(
                        "only one service interest tag may be selected".to_string(),
                    ));
                }
                Some(tags)
            }
            None => None,
        };

        if let Some(ref name) = self.name
            && name.trim().is_empty()
        {
            return Err(WorkflowError::InvalidFieldUpdate(
                "name must not be blank".to_string(),
            ));
        }

        let next_action = match self.next_action {
            Some(Some(text)) if text.trim().is_empty() => {
                return Err(WorkflowError::InvalidFieldUpdate(
                    "next action must not be blank; send null to clear it".to_string(),
                ));
            }
            Some(Some(text)) => Some(Some(NextAction::Pending(text))),
            Some(None) => Some(Some(NextAction::Cleared)),
            None => None,
        };

        let patch = LeadPatch {
            name: self.name,
            company: self.company,
            phone: self.phone,
            email: self.email,
            address: self.address,
            value,
            proposal_id: self.proposal_id,
            service_interest,
            audit_pending: self.audit_pending,
            next_action,
            ..Default::default()
        };
        if patch.is_empty() {
            return Err(WorkflowError::InvalidFieldUpdate(
                "no fields to update".to_string(),
            ));
        }

        Ok(LeadPatch {
            updated_at: Some(WriteTime::ServerNow),
            updated_by: Some(actor.to_string()),
            ..patch
        })
    }
}
