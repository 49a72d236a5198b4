//! Collaborator interfaces the workflow core is written against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::Activity;
use crate::lead::{Lead, LeadPatch};

pub const LEADS_COLLECTION: &str = "leads";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached. Reads may retry; writes surface it.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("{collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    /// A stage write found the lead somewhere other than where it was read.
    #[error("Lead {id} is at '{actual}', not '{expected}'")]
    StageConflict {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn lead_not_found(id: &str) -> Self {
        StoreError::NotFound {
            collection: LEADS_COLLECTION.to_string(),
            id: id.to_string(),
        }
    }

    pub fn lead_exists(id: &str) -> Self {
        StoreError::AlreadyExists {
            collection: LEADS_COLLECTION.to_string(),
            id: id.to_string(),
        }
    }

    pub fn stage_conflict(id: &str, expected: &str, actual: &str) -> Self {
        StoreError::StageConflict {
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Shared document store holding lead documents.
///
/// Writes are partial: implementations must only touch the fields named in
/// a `LeadPatch` so concurrent edits to sibling fields survive.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError>;

    async fn list_leads(&self) -> Result<Vec<Lead>, StoreError>;

    /// Lead capture hand-off. Fails if a lead with the same id exists.
    async fn insert_lead(&self, lead: Lead) -> Result<(), StoreError>;

    async fn update_lead(&self, id: &str, patch: LeadPatch) -> Result<(), StoreError>;

    /// Append one activity and advance the lead's last-contact marker.
    async fn append_activity(&self, id: &str, activity: Activity) -> Result<(), StoreError>;

    /// Apply `patch` and append `activity` as a single atomic write, but only
    /// while the lead still sits at `expected_stage`. Otherwise nothing is
    /// written and `StageConflict` reports where the lead actually is.
    async fn commit_transition(
        &self,
        id: &str,
        expected_stage: &str,
        patch: LeadPatch,
        activity: Activity,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub id: String,
    pub lead_id: String,
    pub summary: String,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditLookup: Send + Sync {
    async fn audit_for_lead(&self, lead_id: &str) -> Result<Option<AuditRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("timeout".into()).is_transient());
        assert!(!StoreError::lead_not_found("x").is_transient());
        assert!(!StoreError::lead_exists("x").is_transient());
        assert!(!StoreError::Backend(anyhow::anyhow!("disk full")).is_transient());
        assert!(!StoreError::stage_conflict("x", "new", "audit").is_transient());
    }

    #[test]
    fn not_found_names_collection_and_id() {
        let err = StoreError::lead_not_found("lead-9");
        assert_eq!(err.to_string(), "leads/lead-9 not found");
    }

    #[test]
    fn stage_conflict_names_both_stages() {
        let err = StoreError::stage_conflict("lead-9", "contacted", "new");
        assert_eq!(err.to_string(), "Lead lead-9 is at 'new', not 'contacted'");
    }
}
