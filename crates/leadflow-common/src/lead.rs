use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::Activity;

/// Predefined service tags a lead can express interest in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ServiceInterest {
    WebDesign,
    Seo,
    PaidAds,
    SocialMedia,
    Branding,
}

impl ServiceInterest {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebDesign => "web_design",
            Self::Seo => "seo",
            Self::PaidAds => "paid_ads",
            Self::SocialMedia => "social_media",
            Self::Branding => "branding",
        }
    }
}

impl FromStr for ServiceInterest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_design" => Ok(Self::WebDesign),
            "seo" => Ok(Self::Seo),
            "paid_ads" => Ok(Self::PaidAds),
            "social_media" => Ok(Self::SocialMedia),
            "branding" => Ok(Self::Branding),
            _ => Err(format!("Invalid service interest: {}", s)),
        }
    }
}

/// The follow-up a salesperson owes a lead.
///
/// `Option<NextAction>::None` means the field was never set, which is
/// different from an action that was explicitly cleared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "action", rename_all = "snake_case")]
pub enum NextAction {
    Pending(String),
    Cleared,
}

impl NextAction {
    pub fn pending_text(&self) -> Option<&str> {
        match self {
            Self::Pending(text) => Some(text),
            Self::Cleared => None,
        }
    }
}

/// A timestamp value inside a write. `ServerNow` is resolved by the store
/// against its own clock at the moment the write is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTime {
    ServerNow,
    At(DateTime<Utc>),
}

impl WriteTime {
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::ServerNow => now,
            Self::At(at) => at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Deal value in minor currency units.
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub proposal_id: Option<String>,
    pub stage: String,
    pub stage_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub service_interest: Vec<ServiceInterest>,
    #[serde(default)]
    pub audit_pending: bool,
    #[serde(default)]
    pub next_action: Option<NextAction>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub last_contact_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

impl Lead {
    /// A freshly captured lead sitting at `first_stage`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        first_stage: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let created_by = created_by.into();
        Self {
            id: id.into(),
            name: name.into(),
            company: None,
            phone: None,
            email: None,
            address: None,
            value: 0,
            proposal_id: None,
            stage: first_stage.into(),
            stage_updated_at: now,
            service_interest: Vec::new(),
            audit_pending: false,
            next_action: None,
            activities: Vec::new(),
            last_contact_at: None,
            created_at: now,
            updated_at: now,
            updated_by: created_by.clone(),
            created_by,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    /// True when the lead can be reached by phone or email.
    pub fn has_contact_channel(&self) -> bool {
        is_present(&self.phone) || is_present(&self.email)
    }

    pub fn has_proposal(&self) -> bool {
        is_present(&self.proposal_id)
    }
}

fn is_present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// A partial-field update. Only fields set to `Some` are written; nested
/// `Option`s distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadPatch {
    pub name: Option<String>,
    pub company: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub value: Option<i64>,
    pub proposal_id: Option<Option<String>>,
    pub stage: Option<String>,
    pub stage_updated_at: Option<WriteTime>,
    pub service_interest: Option<Vec<ServiceInterest>>,
    pub audit_pending: Option<bool>,
    pub next_action: Option<Option<NextAction>>,
    pub updated_at: Option<WriteTime>,
    pub updated_by: Option<String>,
}

impl LeadPatch {
    /// The `{stage, stageUpdatedAt}` write of a committed transition.
    pub fn stage_move(stage: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            stage_updated_at: Some(WriteTime::ServerNow),
            updated_at: Some(WriteTime::ServerNow),
            updated_by: Some(actor.into()),
            ..Default::default()
        }
    }

    pub fn touches_stage(&self) -> bool {
        self.stage.is_some() || self.stage_updated_at.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch in place. `stage_updated_at` only moves together with
    /// `stage`, and defaults to `now` when a stage is written without one.
    pub fn apply(&self, lead: &mut Lead, now: DateTime<Utc>) {
        if let Some(ref name) = self.name {
            lead.name = name.clone();
        }
        if let Some(ref company) = self.company {
            lead.company = company.clone();
        }
        if let Some(ref phone) = self.phone {
            lead.phone = phone.clone();
        }
        if let Some(ref email) = self.email {
            lead.email = email.clone();
        }
        if let Some(ref address) = self.address {
            lead.address = address.clone();
        }
        if let Some(value) = self.value {
            lead.value = value;
        }
        if let Some(ref proposal_id) = self.proposal_id {
            lead.proposal_id = proposal_id.clone();
        }
        if let Some(ref stage) = self.stage {
            lead.stage = stage.clone();
            lead.stage_updated_at = self
                .stage_updated_at
                .unwrap_or(WriteTime::ServerNow)
                .resolve(now);
        }
        if let Some(ref tags) = self.service_interest {
            lead.service_interest = tags.clone();
        }
        if let Some(pending) = self.audit_pending {
            lead.audit_pending = pending;
        }
        if let Some(ref next_action) = self.next_action {
            lead.next_action = next_action.clone();
        }
        if let Some(updated_at) = self.updated_at {
            lead.updated_at = updated_at.resolve(now);
        }
        if let Some(ref updated_by) = self.updated_by {
            lead.updated_by = updated_by.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lead() -> Lead {
        Lead::new("lead-1", "Acme Plumbing", "new", "capture")
    }

    #[test]
    fn contact_channel_ignores_blank_fields() {
        let mut l = lead();
        assert!(!l.has_contact_channel());
        l.phone = Some("   ".into());
        assert!(!l.has_contact_channel());
        l.email = Some("owner@acme.test".into());
        assert!(l.has_contact_channel());
    }

    #[test]
    fn next_action_distinguishes_cleared_from_unset() {
        let unset: Option<NextAction> = None;
        let cleared = Some(NextAction::Cleared);
        assert_ne!(unset, cleared);

        let json = serde_json::to_value(NextAction::Pending("Call back".into())).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["action"], "Call back");
        let json = serde_json::to_value(NextAction::Cleared).unwrap();
        assert_eq!(json["status"], "cleared");
    }

    #[test]
    fn stage_patch_refreshes_stage_timestamp() {
        let mut l = lead();
        let before = l.stage_updated_at;
        let now = before + Duration::seconds(30);

        LeadPatch::stage_move("contacted", "dana").apply(&mut l, now);

        assert_eq!(l.stage, "contacted");
        assert_eq!(l.stage_updated_at, now);
        assert_eq!(l.updated_at, now);
        assert_eq!(l.updated_by, "dana");
    }

    #[test]
    fn field_patch_leaves_stage_timestamp_alone() {
        let mut l = lead();
        let before = l.stage_updated_at;
        let patch = LeadPatch {
            phone: Some(Some("555-0100".into())),
            updated_at: Some(WriteTime::ServerNow),
            ..Default::default()
        };
        patch.apply(&mut l, before + Duration::seconds(5));

        assert_eq!(l.phone.as_deref(), Some("555-0100"));
        assert_eq!(l.stage_updated_at, before);
        assert!(!patch.touches_stage());
    }

    #[test]
    fn nested_option_clears_field() {
        let mut l = lead().with_email("a@b.test");
        let patch = LeadPatch {
            email: Some(None),
            ..Default::default()
        };
        patch.apply(&mut l, Utc::now());
        assert_eq!(l.email, None);
    }

    #[test]
    fn default_patch_is_empty() {
        assert!(LeadPatch::default().is_empty());
        assert!(!LeadPatch::stage_move("won", "x").is_empty());
    }
}
