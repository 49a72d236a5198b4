use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Note,
    Status,
    Call,
    Meeting,
    Email,
    Deal,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Status => "status",
            Self::Call => "call",
            Self::Meeting => "meeting",
            Self::Email => "email",
            Self::Deal => "deal",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(Self::Note),
            "status" => Ok(Self::Status),
            "call" => Ok(Self::Call),
            "meeting" => Ok(Self::Meeting),
            "email" => Ok(Self::Email),
            "deal" => Ok(Self::Deal),
            _ => Err(format!("Invalid activity type: {}", s)),
        }
    }
}

/// One immutable entry in a lead's history.
///
/// Entries are only ever appended. Readers must order them by `timestamp`
/// rather than by position, since concurrent writers can append out of order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
}

impl Activity {
    pub fn new(kind: ActivityKind, body: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            body: body.into(),
            timestamp: Utc::now(),
            actor: actor.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_kind_round_trips_through_str() {
        for kind in [
            ActivityKind::Note,
            ActivityKind::Status,
            ActivityKind::Call,
            ActivityKind::Meeting,
            ActivityKind::Email,
            ActivityKind::Deal,
        ] {
            assert_eq!(ActivityKind::from_str(kind.as_str()), Ok(kind));
        }
        assert!(ActivityKind::from_str("fax").is_err());
    }

    #[test]
    fn activity_serializes_kind_as_type() {
        let activity = Activity::new(ActivityKind::Call, "Left voicemail", "dana");
        let json = serde_json::to_value(&activity).unwrap();
        assert_eq!(json["type"], "call");
        assert_eq!(json["body"], "Left voicemail");
        assert_eq!(json["actor"], "dana");
    }

    #[test]
    fn new_activities_get_distinct_ids() {
        let a = Activity::new(ActivityKind::Note, "a", "x");
        let b = Activity::new(ActivityKind::Note, "b", "x");
        assert_ne!(a.id, b.id);
    }
}
