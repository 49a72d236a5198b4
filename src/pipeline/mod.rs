//! Lead workflow core.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `stages` | Ordered stage graph and the structural movement policy |
//! | `guards` | Named entry predicates per target stage |
//! | `hydrator` | Resolves the facts guards need before they run |
//! | `validation` | Runs every guard for a target and aggregates violations |
//! | `records` | Lead reads with bounded retry and direct field updates |
//! | `coordinator` | `request_move`, the only path that changes a stage |
//! | `activity` | Append-only per-lead history |
//! | `board` | Column projection for board clients |

pub mod activity;
pub mod board;
pub mod coordinator;
pub mod guards;
pub mod hydrator;
pub mod records;
pub mod stages;
pub mod validation;

use std::sync::Arc;

use anyhow::Result;
use leadflow_common::{Activity, AuditLookup, Lead, LeadStore};

pub use activity::{ActivityLog, NewActivity, timeline};
pub use board::{BoardView, Card, Column};
pub use coordinator::{MoveOutcome, TransitionCoordinator};
pub use guards::{Guard, GuardRegistry, GuardRule, HAS_AUDIT, LeadField};
pub use hydrator::{ContextHydrator, FactResolver, GuardContext};
pub use records::{AmountInput, LeadFieldsUpdate, LeadRecords, NewLead, ReadRetry};
pub use stages::{MoveKind, Stage, StageGraph};
pub use validation::{ValidationEngine, Violation};

use crate::config::LeadflowToml;
use crate::errors::WorkflowError;

/// All workflow components wired against one store.
#[derive(Clone)]
pub struct Pipeline {
    graph: Arc<StageGraph>,
    registry: Arc<GuardRegistry>,
    records: LeadRecords,
    coordinator: TransitionCoordinator,
    activities: ActivityLog,
}

impl Pipeline {
    pub fn new(
        graph: StageGraph,
        registry: GuardRegistry,
        store: Arc<dyn LeadStore>,
        hydrator: ContextHydrator,
        retry: ReadRetry,
    ) -> Self {
        let graph = Arc::new(graph);
        let registry = Arc::new(registry);
        let records = LeadRecords::new(store.clone(), retry);
        let engine = ValidationEngine::new(graph.clone(), registry.clone());
        let coordinator =
            TransitionCoordinator::new(graph.clone(), records.clone(), hydrator, engine);
        Self {
            graph,
            registry,
            records,
            coordinator,
            activities: ActivityLog::new(store),
        }
    }

    pub fn from_config(
        config: &LeadflowToml,
        store: Arc<dyn LeadStore>,
        audits: Arc<dyn AuditLookup>,
    ) -> Result<Self> {
        Ok(Self::new(
            config.stage_graph()?,
            config.guard_registry(),
            store,
            ContextHydrator::with_audits(audits),
            config.read_retry(),
        ))
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn registry(&self) -> &GuardRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        self.records.store()
    }

    pub async fn request_move(
        &self,
        lead_id: &str,
        target: &str,
        actor: &str,
    ) -> Result<MoveOutcome, WorkflowError> {
        self.coordinator.request_move(lead_id, target, actor).await
    }

    pub async fn add_activity(
        &self,
        lead_id: &str,
        activity: NewActivity,
        actor: &str,
    ) -> Result<Activity, WorkflowError> {
        self.activities.add_activity(lead_id, activity, actor).await
    }

    pub async fn get_lead_by_id(&self, id: &str) -> Result<Option<Lead>, WorkflowError> {
        self.records.get_lead_by_id(id).await
    }

    /// Like `get_lead_by_id`, but an absent lead is `NotFound`.
    pub async fn require_lead(&self, id: &str) -> Result<Lead, WorkflowError> {
        self.get_lead_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                lead_id: id.to_string(),
            })
    }

    pub async fn update_fields(
        &self,
        id: &str,
        update: LeadFieldsUpdate,
        actor: &str,
    ) -> Result<(), WorkflowError> {
        self.records.update_fields(id, update, actor).await
    }

    /// Capture a new lead at the first stage.
    pub async fn create_lead(&self, new: NewLead, actor: &str) -> Result<Lead, WorkflowError> {
        let lead = new.into_lead(&self.graph.first().id, actor)?;
        self.store().insert_lead(lead.clone()).await?;
        tracing::info!(lead_id = %lead.id, stage = %lead.stage, "Lead captured");
        Ok(lead)
    }

    /// Board snapshot built from the store's current contents.
    pub async fn board(&self) -> Result<BoardView, WorkflowError> {
        let leads = self.store().list_leads().await?;
        Ok(BoardView::from_snapshot(&self.graph, leads))
    }
}
