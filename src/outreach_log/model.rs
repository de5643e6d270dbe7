//! Append-only record of send attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SendStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown send status: {}", s)),
        }
    }
}

/// One log row. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLogEntry {
    pub id: Uuid,
    pub contact_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    pub status: SendStatus,
    /// Present iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendLogEntry {
    pub fn sent(contact_id: Uuid, template_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id,
            template_id: Some(template_id),
            sent_at: at,
            status: SendStatus::Sent,
            error: None,
        }
    }

    pub fn failed(
        contact_id: Uuid,
        template_id: Option<Uuid>,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            id: Uuid::new_v4(),
            contact_id,
            template_id,
            sent_at: at,
            status: SendStatus::Failed,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_entry_always_carries_error() {
        let e = SendLogEntry::failed(Uuid::new_v4(), None, "", Utc::now());
        assert_eq!(e.status, SendStatus::Failed);
        assert_eq!(e.error.as_deref(), Some("unknown error"));
    }

    #[test]
    fn sent_entry_has_no_error() {
        let e = SendLogEntry::sent(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert_eq!(e.status, SendStatus::Sent);
        assert!(e.error.is_none());
        assert!(e.template_id.is_some());
    }
}
