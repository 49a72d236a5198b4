//! End-to-end workflow scenarios against the SQLite store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use leadflow::config::LeadflowToml;
use leadflow::pipeline::{LeadFieldsUpdate, MoveOutcome, NewActivity, Pipeline, AmountInput};
use leadflow::store::SqliteStore;
use leadflow_common::{Activity, ActivityKind, Lead, LeadPatch, LeadStore, StoreError};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    store: Arc<SqliteStore>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("leadflow.db")).unwrap());
    let mut config = LeadflowToml::default();
    config.store.read_attempts = 1;
    let pipeline = Pipeline::from_config(&config, store.clone(), store.clone()).unwrap();
    Harness {
        _dir: dir,
        store,
        pipeline,
    }
}

async fn seed(h: &Harness, lead: Lead) {
    h.store.insert_lead(lead).await.unwrap();
}

async fn reload(h: &Harness, id: &str) -> Lead {
    h.store.get_lead(id).await.unwrap().expect("lead exists")
}

fn status_count(lead: &Lead) -> usize {
    lead.activities
        .iter()
        .filter(|a| a.kind == ActivityKind::Status)
        .count()
}

#[tokio::test]
async fn no_contact_info_blocks_audit() {
    let h = harness();
    seed(&h, Lead::new("a", "Quiet Co", "contacted", "capture")).await;

    let err = h.pipeline.request_move("a", "audit", "dana").await.unwrap_err();

    assert_eq!(err.kind(), "WORKFLOW_VALIDATION_FAILED");
    assert_eq!(err.stage_id(), Some("audit"));
    assert_eq!(err.violations()[0].guard, "contact-channel");
    let lead = reload(&h, "a").await;
    assert_eq!(lead.stage, "contacted");
    assert!(lead.activities.is_empty());
}

#[tokio::test]
async fn skipping_from_new_to_audit_is_structural() {
    let h = harness();
    seed(&h, Lead::new("a", "Quiet Co", "new", "capture")).await;

    let err = h.pipeline.request_move("a", "audit", "dana").await.unwrap_err();
    assert_eq!(err.kind(), "STRUCTURAL_POLICY_VIOLATION");
}

#[tokio::test]
async fn phone_allows_audit_and_logs_one_status_entry() {
    let h = harness();
    let lead = Lead::new("b", "Ring Co", "contacted", "capture").with_phone("555-0101");
    let before = lead.stage_updated_at;
    seed(&h, lead).await;

    let outcome = h.pipeline.request_move("b", "audit", "dana").await.unwrap();
    assert!(matches!(outcome, MoveOutcome::Moved { .. }));

    let lead = reload(&h, "b").await;
    assert_eq!(lead.stage, "audit");
    assert!(lead.stage_updated_at > before);
    assert_eq!(lead.activities.len(), 1);
    assert!(lead.activities[0].body.contains("Audit"));
    assert_eq!(lead.activities[0].actor, "dana");
}

#[tokio::test]
async fn proposal_waits_for_a_recorded_audit() {
    let h = harness();
    seed(
        &h,
        Lead::new("c", "Audit Co", "audit", "capture").with_email("hi@audit.test"),
    )
    .await;

    let err = h
        .pipeline
        .request_move("c", "proposal", "dana")
        .await
        .unwrap_err();
    assert_eq!(err.stage_id(), Some("proposal"));
    assert_eq!(
        err.violations()[0].remediation.as_deref(),
        Some("/audits/new?lead=c")
    );

    h.store.record_audit("c", "Site audit done").await.unwrap();
    h.pipeline.request_move("c", "proposal", "dana").await.unwrap();
    assert_eq!(reload(&h, "c").await.stage, "proposal");
}

#[tokio::test]
async fn won_needs_value_then_succeeds_after_field_update() {
    let h = harness();
    seed(&h, Lead::new("e", "Deal Co", "proposal", "capture")).await;

    let err = h.pipeline.request_move("e", "won", "dana").await.unwrap_err();
    assert_eq!(err.kind(), "WORKFLOW_VALIDATION_FAILED");

    h.pipeline
        .update_fields(
            "e",
            LeadFieldsUpdate {
                value: Some(AmountInput::Text("$1,000.00".into())),
                ..Default::default()
            },
            "dana",
        )
        .await
        .unwrap();
    h.pipeline.request_move("e", "won", "dana").await.unwrap();

    let lead = reload(&h, "e").await;
    assert_eq!(lead.stage, "won");
    assert_eq!(lead.value, 100_000);
    assert_eq!(status_count(&lead), 1);
}

#[tokio::test]
async fn backward_move_needs_only_target_guards() {
    let h = harness();
    seed(&h, Lead::new("f", "Back Co", "won", "capture")).await;

    h.pipeline.request_move("f", "new", "dana").await.unwrap();
    assert_eq!(reload(&h, "f").await.stage, "new");
}

#[tokio::test]
async fn reselecting_current_stage_writes_nothing() {
    let h = harness();
    seed(&h, Lead::new("g", "Same Co", "contacted", "capture")).await;

    let outcome = h
        .pipeline
        .request_move("g", "contacted", "dana")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        MoveOutcome::Unchanged {
            stage: "contacted".into()
        }
    );
    assert!(reload(&h, "g").await.activities.is_empty());
}

#[tokio::test]
async fn field_update_survives_a_later_transition() {
    let h = harness();
    seed(&h, Lead::new("h", "Edit Co", "new", "capture")).await;

    h.pipeline
        .update_fields(
            "h",
            LeadFieldsUpdate {
                email: Some(Some("ops@edit.test".into())),
                ..Default::default()
            },
            "sam",
        )
        .await
        .unwrap();
    h.pipeline.request_move("h", "contacted", "dana").await.unwrap();

    let lead = reload(&h, "h").await;
    assert_eq!(lead.email.as_deref(), Some("ops@edit.test"));
    assert_eq!(lead.stage, "contacted");
    assert_eq!(lead.updated_by, "dana");
}

#[tokio::test]
async fn activities_append_and_board_reflects_store() {
    let h = harness();
    seed(&h, Lead::new("i", "Board Co", "new", "capture")).await;

    h.pipeline
        .add_activity(
            "i",
            NewActivity {
                kind: ActivityKind::Call,
                body: "Left voicemail".into(),
            },
            "dana",
        )
        .await
        .unwrap();
    h.pipeline.request_move("i", "contacted", "dana").await.unwrap();

    let board = h.pipeline.board().await.unwrap();
    assert_eq!(board.column_of("i"), Some("contacted"));
    let lead = reload(&h, "i").await;
    assert_eq!(lead.activities.len(), 2);
    assert!(lead.last_contact_at.is_some());
}

#[tokio::test]
async fn missing_lead_is_not_found() {
    let h = harness();
    let err = h
        .pipeline
        .request_move("ghost", "contacted", "dana")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
}

/// Holds the first caller's copy of a lead for a while before handing it
/// back, so a second request can commit in between.
struct SlowFirstRead {
    inner: Arc<SqliteStore>,
    stalled: AtomicBool,
}

#[async_trait]
impl LeadStore for SlowFirstRead {
    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let stall = !self.stalled.swap(true, Ordering::SeqCst);
        let lead = self.inner.get_lead(id).await?;
        if stall {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Ok(lead)
    }

    async fn list_leads(&self) -> Result<Vec<Lead>, StoreError> {
        self.inner.list_leads().await
    }

    async fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        self.inner.insert_lead(lead).await
    }

    async fn update_lead(&self, id: &str, patch: LeadPatch) -> Result<(), StoreError> {
        self.inner.update_lead(id, patch).await
    }

    async fn append_activity(&self, id: &str, activity: Activity) -> Result<(), StoreError> {
        self.inner.append_activity(id, activity).await
    }

    async fn commit_transition(
        &self,
        id: &str,
        expected_stage: &str,
        patch: LeadPatch,
        activity: Activity,
    ) -> Result<(), StoreError> {
        self.inner
            .commit_transition(id, expected_stage, patch, activity)
            .await
    }
}

fn racing_harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("leadflow.db")).unwrap());
    let slow = Arc::new(SlowFirstRead {
        inner: store.clone(),
        stalled: AtomicBool::new(false),
    });
    let mut config = LeadflowToml::default();
    config.store.read_attempts = 1;
    let pipeline = Pipeline::from_config(&config, slow, store.clone()).unwrap();
    Harness {
        _dir: dir,
        store,
        pipeline,
    }
}

#[tokio::test]
async fn stale_move_cannot_skip_past_a_concurrent_move() {
    let h = racing_harness();
    seed(&h, Lead::new("r", "Race Co", "contacted", "capture").with_phone("555-0102")).await;

    let (forward, back) = tokio::join!(
        h.pipeline.request_move("r", "audit", "ana"),
        h.pipeline.request_move("r", "new", "ben"),
    );

    assert!(back.is_ok());
    assert_eq!(forward.unwrap_err().kind(), "STRUCTURAL_POLICY_VIOLATION");
    let lead = reload(&h, "r").await;
    assert_eq!(lead.stage, "new");
    assert_eq!(status_count(&lead), 1);
    assert!(lead.activities[0].body.ends_with("(new)"));
}

#[tokio::test]
async fn concurrent_moves_to_one_target_log_once() {
    let h = racing_harness();
    seed(&h, Lead::new("r", "Race Co", "contacted", "capture").with_phone("555-0102")).await;

    let (a, b) = tokio::join!(
        h.pipeline.request_move("r", "audit", "ana"),
        h.pipeline.request_move("r", "audit", "ben"),
    );

    assert_eq!(a.unwrap().stage(), "audit");
    assert_eq!(b.unwrap().stage(), "audit");
    let lead = reload(&h, "r").await;
    assert_eq!(lead.stage, "audit");
    assert_eq!(status_count(&lead), 1);
}
