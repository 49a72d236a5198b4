//! Typed error hierarchy for the leadflow workflow core.
//!
//! `WorkflowError` is what every public pipeline operation returns. Each
//! variant carries enough structure (`stage_id`, violation list) for a
//! caller to render an actionable message or a remediation shortcut.

use leadflow_common::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::validation::Violation;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Lead {lead_id} not found")]
    NotFound { lead_id: String },

    /// A forward skip of more than one stage. Rejected before any guard runs.
    #[error("Cannot move from '{from_stage}' to '{stage_id}': forward moves are limited to the next stage")]
    StructuralPolicyViolation { stage_id: String, from_stage: String },

    #[error("{message}")]
    WorkflowValidationFailed {
        stage_id: String,
        message: String,
        violations: Vec<Violation>,
    },

    #[error("Unknown stage '{stage_id}'")]
    UnknownStage { stage_id: String },

    /// The lead's stored stage was removed from the configured pipeline, so
    /// the movement policy has no position to measure a move from.
    #[error("Cannot move to '{stage_id}': current stage '{current_stage}' is no longer configured")]
    CurrentStageNotConfigured {
        stage_id: String,
        current_stage: String,
    },

    #[error("Lead {lead_id} already exists")]
    DuplicateLead { lead_id: String },

    #[error("Invalid field update: {0}")]
    InvalidFieldUpdate(String),

    /// The lead changed stage while a move was being validated, and it was
    /// still moving after one re-validation.
    #[error("Lead {lead_id} moved to '{actual}' while leaving '{expected}'; reload and retry")]
    StageConflict {
        lead_id: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "NOT_FOUND",
            WorkflowError::StructuralPolicyViolation { .. } => "STRUCTURAL_POLICY_VIOLATION",
            WorkflowError::WorkflowValidationFailed { .. } => "WORKFLOW_VALIDATION_FAILED",
            WorkflowError::UnknownStage { .. } => "UNKNOWN_STAGE",
            WorkflowError::CurrentStageNotConfigured { .. } => "CURRENT_STAGE_NOT_CONFIGURED",
            WorkflowError::DuplicateLead { .. } => "DUPLICATE_LEAD",
            WorkflowError::InvalidFieldUpdate(_) => "INVALID_FIELD_UPDATE",
            WorkflowError::StageConflict { .. } => "STAGE_CONFLICT",
            WorkflowError::Store(e) if e.is_transient() => "TRANSIENT_STORE_ERROR",
            WorkflowError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn stage_id(&self) -> Option<&str> {
        match self {
            WorkflowError::StructuralPolicyViolation { stage_id, .. }
            | WorkflowError::WorkflowValidationFailed { stage_id, .. }
            | WorkflowError::UnknownStage { stage_id }
            | WorkflowError::CurrentStageNotConfigured { stage_id, .. } => Some(stage_id),
            _ => None,
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            WorkflowError::WorkflowValidationFailed { violations, .. } => violations,
            _ => &[],
        }
    }

    /// True when retrying the same request could succeed without the caller
    /// changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkflowError::Store(e) if e.is_transient())
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            stage_id: self.stage_id().map(str::to_string),
            violations: self.violations().to_vec(),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, .. } => WorkflowError::NotFound { lead_id: id },
            StoreError::AlreadyExists { id, .. } => WorkflowError::DuplicateLead { lead_id: id },
            StoreError::StageConflict {
                id,
                expected,
                actual,
            } => WorkflowError::StageConflict {
                lead_id: id,
                expected,
                actual,
            },
            other => WorkflowError::Store(other),
        }
    }
}

/// Wire shape of a failed operation: `{kind, message, stageId, violations?}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}
