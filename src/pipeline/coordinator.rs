//! Guarded stage transitions.
//!
//! `request_move` is the only way a lead's stage changes:
//!
//! 1. re-read the authoritative lead (never trust a caller's cached stage)
//! 2. apply the structural movement policy
//! 3. hydrate the guard context and run every guard for the target
//! 4. commit `{stage, stage_updated_at}` and one status activity in a single
//!    atomic partial write, conditional on the lead still being at the stage
//!    that was read in step 1
//!
//! No lock is taken. When the conditional write finds the lead elsewhere, the
//! whole sequence runs once more against a fresh read. A second conflict is
//! reported as `StageConflict`.

use std::sync::Arc;

use leadflow_common::{Activity, ActivityKind, LeadPatch, StoreError};
use serde::Serialize;

use super::hydrator::ContextHydrator;
use super::records::LeadRecords;
use super::stages::{MoveKind, StageGraph};
use super::validation::ValidationEngine;
use crate::errors::WorkflowError;

/// Read-validate-commit rounds before a stage conflict is reported.
const MOVE_ROUNDS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    Moved {
        from: String,
        to: String,
        activity: Activity,
    },
    /// The lead already sat at the target and every guard passed.
    Unchanged { stage: String },
}

impl MoveOutcome {
    pub fn stage(&self) -> &str {
        match self {
            MoveOutcome::Moved { to, .. } => to,
            MoveOutcome::Unchanged { stage } => stage,
        }
    }
}

#[derive(Clone)]
pub struct TransitionCoordinator {
    graph: Arc<StageGraph>,
    records: LeadRecords,
    hydrator: ContextHydrator,
    engine: ValidationEngine,
}

impl TransitionCoordinator {
    pub fn new(
        graph: Arc<StageGraph>,
        records: LeadRecords,
        hydrator: ContextHydrator,
        engine: ValidationEngine,
    ) -> Self {
        Self {
            graph,
            records,
            hydrator,
            engine,
        }
    }

    #[tracing::instrument(skip(self), fields(from_stage = tracing::field::Empty))]
    pub async fn request_move(
        &self,
        lead_id: &str,
        target: &str,
        actor: &str,
    ) -> Result<MoveOutcome, WorkflowError> {
        let mut round = 1;
        loop {
            match self.attempt_move(lead_id, target, actor).await {
                Err(WorkflowError::StageConflict { ref actual, .. }) if round < MOVE_ROUNDS => {
                    tracing::debug!(
                        round,
                        current_stage = %actual,
                        "Lead moved during validation; re-validating"
                    );
                    round += 1;
                }
                result => return result,
            }
        }
    }

    async fn attempt_move(
        &self,
        lead_id: &str,
        target: &str,
        actor: &str,
    ) -> Result<MoveOutcome, WorkflowError> {
        let lead = self
            .records
            .get_lead_by_id(lead_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                lead_id: lead_id.to_string(),
            })?;
        tracing::Span::current().record("from_stage", lead.stage.as_str());

        let kind = self.graph.check_move(&lead.stage, target).inspect_err(|e| {
            tracing::warn!(error = %e, "Move rejected by movement policy");
        })?;

        let facts = self.engine.registry().required_facts(target);
        let ctx = self.hydrator.hydrate(&lead, &facts).await;
        self.engine.approve(target, &lead, &ctx).inspect_err(|e| {
            tracing::warn!(
                violations = e.violations().len(),
                error = %e,
                "Move rejected by guards"
            );
        })?;

        if kind == MoveKind::Same {
            tracing::debug!("Lead already at target stage");
            return Ok(MoveOutcome::Unchanged {
                stage: lead.stage,
            });
        }

        let activity = Activity::new(
            ActivityKind::Status,
            format!(
                "Stage changed from {} to {} ({})",
                self.graph.display_name(&lead.stage),
                self.graph.display_name(target),
                target
            ),
            actor,
        );
        self.records
            .store()
            .commit_transition(
                lead_id,
                &lead.stage,
                LeadPatch::stage_move(target, actor),
                activity.clone(),
            )
            .await
            .inspect_err(|e| {
                if matches!(e, StoreError::StageConflict { .. }) {
                    tracing::warn!(error = %e, "Stage write lost a race");
                }
            })?;

        tracing::info!(to_stage = %target, activity_id = %activity.id, "Stage transition committed");
        Ok(MoveOutcome::Moved {
            from: lead.stage,
            to: target.to_string(),
            activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::pipeline::guards::GuardRegistry;
    use crate::pipeline::records::ReadRetry;
    use crate::store::memory::MemoryStore;
    use leadflow_common::{Lead, LeadStore};
    use proptest::prelude::*;

    fn coordinator(store: Arc<MemoryStore>) -> TransitionCoordinator {
        let graph = Arc::new(StageGraph::default_pipeline());
        let records = LeadRecords::new(
            store.clone(),
            ReadRetry {
                attempts: 2,
                delay: Duration::from_millis(1),
            },
        );
        let engine = ValidationEngine::new(graph.clone(), Arc::new(GuardRegistry::default_rules()));
        TransitionCoordinator::new(graph, records, ContextHydrator::with_audits(store), engine)
    }

    fn status_entries(lead: &Lead) -> Vec<&Activity> {
        lead.activities
            .iter()
            .filter(|a| a.kind == ActivityKind::Status)
            .collect()
    }

    #[tokio::test]
    async fn scenario_a_no_contact_blocks_audit() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("a", "No Contact Co", "contacted", "t"));

        let err = coordinator(store.clone())
            .request_move("a", "audit", "dana")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "WORKFLOW_VALIDATION_FAILED");
        assert_eq!(err.violations()[0].guard, "contact-channel");
        assert_eq!(store.snapshot("a").unwrap().stage, "contacted");
    }

    #[tokio::test]
    async fn scenario_a_from_new_is_structural_first() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("a", "No Contact Co", "new", "t"));

        let err = coordinator(store)
            .request_move("a", "audit", "dana")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StructuralPolicyViolation { .. }));
    }

    #[tokio::test]
    async fn scenario_b_contact_allows_audit() {
        let store = Arc::new(MemoryStore::new());
        let lead = Lead::new("b", "Phone Co", "contacted", "t").with_phone("555-0100");
        let before = lead.stage_updated_at;
        store.seed(lead);

        let outcome = coordinator(store.clone())
            .request_move("b", "audit", "dana")
            .await
            .unwrap();
        assert_eq!(outcome.stage(), "audit");

        let lead = store.snapshot("b").unwrap();
        assert_eq!(lead.stage, "audit");
        assert!(lead.stage_updated_at >= before);
        assert_eq!(lead.updated_by, "dana");
        let entries = status_entries(&lead);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].body.contains("Audit"));
        assert!(entries[0].body.ends_with("(audit)"));
        assert_eq!(entries[0].actor, "dana");
    }

    #[tokio::test]
    async fn scenarios_c_and_d_audit_fact_gates_proposal() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("c", "Audit Co", "audit", "t").with_email("x@y.test"));
        let coordinator = coordinator(store.clone());

        let err = coordinator.request_move("c", "proposal", "dana").await.unwrap_err();
        assert_eq!(err.stage_id(), Some("proposal"));
        assert_eq!(
            err.violations()[0].remediation.as_deref(),
            Some("/audits/new?lead=c")
        );

        store.record_audit("c", "Audit complete");
        let outcome = coordinator.request_move("c", "proposal", "dana").await.unwrap();
        assert_eq!(outcome.stage(), "proposal");
    }

    #[tokio::test]
    async fn audit_lookup_failure_blocks_instead_of_crashing() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("c", "Audit Co", "audit", "t"));
        store.record_audit("c", "Audit complete");
        store.fail_audit_lookups(true);

        let err = coordinator(store)
            .request_move("c", "proposal", "dana")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WORKFLOW_VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn scenario_e_value_unblocks_won() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("e", "Deal Co", "proposal", "t"));
        let coordinator = coordinator(store.clone());

        let err = coordinator.request_move("e", "won", "dana").await.unwrap_err();
        assert_eq!(err.stage_id(), Some("won"));

        store
            .update_lead(
                "e",
                LeadPatch {
                    value: Some(100_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let outcome = coordinator.request_move("e", "won", "dana").await.unwrap();
        assert_eq!(outcome.stage(), "won");
    }

    #[tokio::test]
    async fn missing_lead_is_not_found() {
        let err = coordinator(Arc::new(MemoryStore::new()))
            .request_move("ghost", "contacted", "dana")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { ref lead_id } if lead_id == "ghost"));
    }

    #[tokio::test]
    async fn structural_violation_ignores_satisfied_guards() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Lead::new("s", "Ready Co", "new", "t")
                .with_phone("555")
                .with_value(1_000),
        );
        store.record_audit("s", "done");

        let err = coordinator(store.clone())
            .request_move("s", "won", "dana")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "STRUCTURAL_POLICY_VIOLATION");
        assert_eq!(err.stage_id(), Some("won"));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn reselecting_current_stage_is_guarded_noop() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("n", "Same Co", "contacted", "t"));
        let coordinator = coordinator(store.clone());

        let outcome = coordinator.request_move("n", "contacted", "dana").await.unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::Unchanged {
                stage: "contacted".into()
            }
        );
        assert_eq!(store.write_count(), 0);

        // Sitting at "audit" without a contact channel still fails its guard.
        store.seed(Lead::new("m", "Stale Co", "audit", "t"));
        let err = coordinator.request_move("m", "audit", "dana").await.unwrap_err();
        assert_eq!(err.kind(), "WORKFLOW_VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn backward_move_is_allowed_and_logged() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("w", "Back Co", "proposal", "t"));

        let outcome = coordinator(store.clone())
            .request_move("w", "new", "dana")
            .await
            .unwrap();
        assert!(matches!(outcome, MoveOutcome::Moved { ref from, .. } if from == "proposal"));
        assert_eq!(status_entries(&store.snapshot("w").unwrap()).len(), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_lead_untouched() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("f", "Flaky Co", "new", "t"));
        store.fail_writes(true);

        let err = coordinator(store.clone())
            .request_move("f", "contacted", "dana")
            .await
            .unwrap_err();
        assert!(err.is_transient());
        let lead = store.snapshot("f").unwrap();
        assert_eq!(lead.stage, "new");
        assert!(lead.activities.is_empty());
    }

    /// The first read stalls, so the second request commits while the first
    /// is still holding its stale view of the lead.
    fn racing_store(lead: Lead) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed(lead);
        store.stall_next_reads(1, Duration::from_millis(50));
        store
    }

    #[tokio::test]
    async fn stale_view_cannot_commit_a_compound_skip() {
        let store = racing_store(Lead::new("r", "Race Co", "contacted", "t").with_phone("555"));
        let coordinator = coordinator(store.clone());

        let (forward, back) = tokio::join!(
            coordinator.request_move("r", "audit", "ana"),
            coordinator.request_move("r", "new", "ben"),
        );

        assert!(back.is_ok());
        let err = forward.unwrap_err();
        assert_eq!(err.kind(), "STRUCTURAL_POLICY_VIOLATION");

        let lead = store.snapshot("r").unwrap();
        assert_eq!(lead.stage, "new");
        let entries = status_entries(&lead);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].body, "Stage changed from Contacted to New Lead (new)");
    }

    #[tokio::test]
    async fn racing_moves_to_same_target_change_stage_once() {
        let store = racing_store(Lead::new("r", "Race Co", "contacted", "t").with_phone("555"));
        let coordinator = coordinator(store.clone());

        let (a, b) = tokio::join!(
            coordinator.request_move("r", "audit", "ana"),
            coordinator.request_move("r", "audit", "ben"),
        );

        let b = b.unwrap();
        assert!(matches!(b, MoveOutcome::Moved { .. }));
        assert_eq!(
            a.unwrap(),
            MoveOutcome::Unchanged {
                stage: "audit".into()
            }
        );

        let lead = store.snapshot("r").unwrap();
        assert_eq!(lead.stage, "audit");
        assert_eq!(lead.updated_by, "ben");
        assert_eq!(status_entries(&lead).len(), 1);
    }

    #[tokio::test]
    async fn read_lag_is_absorbed_by_retry() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Lead::new("l", "Lag Co", "new", "t"));
        store.hide_next_reads(1);

        let outcome = coordinator(store)
            .request_move("l", "contacted", "dana")
            .await
            .unwrap();
        assert_eq!(outcome.stage(), "contacted");
    }

    fn stage_ids() -> Vec<&'static str> {
        vec!["new", "contacted", "audit", "proposal", "won"]
    }

    fn guards_pass(target: &str, has_phone: bool, has_audit: bool, value: i64) -> bool {
        match target {
            "audit" => has_phone,
            "proposal" => has_audit,
            "won" => value > 0,
            _ => true,
        }
    }

    proptest! {
        /// Property: a move succeeds iff it is structurally legal and every
        /// guard for the target holds; successful stage changes log exactly
        /// one status entry naming the destination.
        #[test]
        fn move_succeeds_iff_policy_and_guards_hold(
            from in 0usize..5,
            to in 0usize..5,
            has_phone in any::<bool>(),
            has_audit in any::<bool>(),
            value in prop_oneof![Just(0i64), Just(100_000i64)],
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let ids = stage_ids();
            let store = Arc::new(MemoryStore::new());
            let mut lead = Lead::new("p", "Prop Co", ids[from], "t").with_value(value);
            if has_phone {
                lead = lead.with_phone("555");
            }
            store.seed(lead);
            if has_audit {
                store.record_audit("p", "done");
            }

            let result = rt.block_on(coordinator(store.clone()).request_move("p", ids[to], "dana"));
            let expected = to <= from + 1 && guards_pass(ids[to], has_phone, has_audit, value);
            prop_assert_eq!(result.is_ok(), expected);

            if to > from + 1 {
                let is_structural = matches!(
                    result,
                    Err(WorkflowError::StructuralPolicyViolation { .. })
                );
                prop_assert!(is_structural);
            }

            let lead = store.snapshot("p").unwrap();
            let entries = status_entries(&lead);
            if expected && from != to {
                prop_assert_eq!(lead.stage.as_str(), ids[to]);
                prop_assert_eq!(entries.len(), 1);
                let graph = StageGraph::default_pipeline();
                prop_assert!(entries[0].body.contains(graph.display_name(ids[to])));
            } else {
                prop_assert_eq!(lead.stage.as_str(), ids[from]);
                prop_assert!(entries.is_empty());
            }
        }
    }
}
