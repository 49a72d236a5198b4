//! Guard evaluation for a target stage.
//!
//! Evaluation is total: every guard registered for the target runs, and the
//! full violation list comes back so a caller can show everything that is
//! still missing.

use std::sync::Arc;

use leadflow_common::Lead;
use serde::{Deserialize, Serialize};

use super::guards::GuardRegistry;
use super::hydrator::GuardContext;
use super::stages::StageGraph;
use crate::errors::WorkflowError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub guard: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationEngine {
    graph: Arc<StageGraph>,
    registry: Arc<GuardRegistry>,
}

impl ValidationEngine {
    pub fn new(graph: Arc<StageGraph>, registry: Arc<GuardRegistry>) -> Self {
        Self { graph, registry }
    }

    pub fn registry(&self) -> &GuardRegistry {
        &self.registry
    }

    /// Run every guard for `target` and collect the ones that fail.
    pub fn evaluate(&self, target: &str, lead: &Lead, ctx: &GuardContext) -> Vec<Violation> {
        self.registry
            .guards_for(target)
            .iter()
            .filter(|guard| !guard.evaluate(lead, ctx))
            .map(|guard| Violation {
                guard: guard.name().to_string(),
                message: guard.message().to_string(),
                remediation: guard.remediation_for(&lead.id),
            })
            .collect()
    }

    /// Approve entry into `target`, or fail with every unmet guard.
    pub fn approve(&self, target: &str, lead: &Lead, ctx: &GuardContext) -> Result<(), WorkflowError> {
        if !self.graph.contains(target) {
            return Err(WorkflowError::UnknownStage {
                stage_id: target.to_string(),
            });
        }
        let violations = self.evaluate(target, lead, ctx);
        if violations.is_empty() {
            return Ok(());
        }
        let message = format!(
            "Cannot move to {}: {}",
            self.graph.display_name(target),
            violations
                .iter()
                .map(|v| v.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        );
        Err(WorkflowError::WorkflowValidationFailed {
            stage_id: target.to_string(),
            message,
            violations,
        })
    }
}
