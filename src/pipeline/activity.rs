//! Append-only per-lead history.

use std::sync::Arc;

use leadflow_common::{Activity, ActivityKind, LeadStore};
use serde::Deserialize;

use crate::errors::WorkflowError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewActivity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub body: String,
}

#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn LeadStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    /// Append one entry and advance the lead's last-contact marker.
    /// The write is not retried.
    pub async fn add_activity(
        &self,
        lead_id: &str,
        activity: NewActivity,
        actor: &str,
    ) -> Result<Activity, WorkflowError> {
        if activity.body.trim().is_empty() {
            return Err(WorkflowError::InvalidFieldUpdate(
                "activity body must not be blank".to_string(),
            ));
        }
        let entry = Activity::new(activity.kind, activity.body, actor);
        self.store.append_activity(lead_id, entry.clone()).await?;
        tracing::info!(
            lead_id = %lead_id,
            activity_id = %entry.id,
            kind = %entry.kind,
            "Activity appended"
        );
        Ok(entry)
    }
}

/// Entries newest first by recorded timestamp, regardless of storage order.
pub fn timeline(activities: &[Activity]) -> Vec<&Activity> {
    let mut ordered: Vec<&Activity> = activities.iter().collect();
    ordered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    ordered
}
