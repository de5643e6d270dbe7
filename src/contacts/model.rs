//! Contact data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum characters kept in `last_reply_snippet`.
pub const SNIPPET_CHARS: usize = 200;

/// Position in the outreach ladder. The sole driver of scheduling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    New,
    Contacted,
    ReEngaged,
    Interested,
    Lto,
    Converted,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::New,
        Stage::Contacted,
        Stage::ReEngaged,
        Stage::Interested,
        Stage::Lto,
        Stage::Converted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::ReEngaged => "re-engaged",
            Self::Interested => "interested",
            Self::Lto => "lto",
            Self::Converted => "converted",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "re-engaged" => Ok(Self::ReEngaged),
            "interested" => Ok(Self::Interested),
            "lto" => Ok(Self::Lto),
            "converted" => Ok(Self::Converted),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Reply sentiment. Set by reply ingestion, reset by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    #[default]
    Neutral,
    Positive,
    Negative,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neutral => write!(f, "neutral"),
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
        }
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neutral" => Ok(Self::Neutral),
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            _ => Err(format!("Unknown sentiment: {}", s)),
        }
    }
}

/// One inbound reply, kept forever in `reply_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEntry {
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// An outreach target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    /// Normalized (trimmed, lowercased) address. Unique.
    pub email: String,
    pub name: String,
    pub stage: Stage,
    /// Display-only progress indicator; `stage` is authoritative.
    pub sequence_step: u8,
    pub replied: bool,
    pub sentiment: Sentiment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reply_snippet: Option<String>,
    #[serde(default)]
    pub reply_history: Vec<ReplyEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Due gate for the batch scan. `None` means never due.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_follow_up_at: Option<DateTime<Utc>>,
    pub opted_out: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Create a fresh contact at stage `new`.
    pub fn new(name: impl Into<String>, email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            name: name.into(),
            stage: Stage::New,
            sequence_step: 0,
            replied: false,
            sentiment: Sentiment::Neutral,
            replied_at: None,
            last_reply_snippet: None,
            reply_history: Vec::new(),
            last_sent_at: None,
            next_follow_up_at: None,
            opted_out: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set stage.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// Builder: set the due time.
    pub fn with_next_follow_up(mut self, at: DateTime<Utc>) -> Self {
        self.next_follow_up_at = Some(at);
        self
    }

    /// Builder: mark as replied with the given sentiment.
    pub fn with_reply(mut self, sentiment: Sentiment) -> Self {
        self.replied = true;
        self.sentiment = sentiment;
        self
    }

    /// Builder: opt out.
    pub fn opted_out(mut self) -> Self {
        self.opted_out = true;
        self
    }

    /// `converted` or opted out: no automated action is ever taken again.
    pub fn is_terminal(&self) -> bool {
        self.opted_out || self.stage == Stage::Converted
    }

    /// Batch selection predicate.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.next_follow_up_at.is_some_and(|at| at <= now)
    }

    /// Flag a reply without content (manual admin marking) and make the contact due.
    pub fn mark_replied(&mut self, sentiment: Sentiment, now: DateTime<Utc>) {
        self.replied = true;
        self.sentiment = sentiment;
        self.replied_at = Some(now);
        self.next_follow_up_at = Some(now);
        self.updated_at = now;
    }

    /// Record an inbound reply. Touches only reply fields and the due gate.
    pub fn record_reply(&mut self, body: &str, sentiment: Sentiment, now: DateTime<Utc>) {
        self.mark_replied(sentiment, now);
        self.last_reply_snippet = Some(snippet(body));
        self.reply_history.push(ReplyEntry {
            body: body.to_string(),
            received_at: now,
        });
    }
}

/// First `SNIPPET_CHARS` characters of a reply body.
pub fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}

/// Canonical form used for uniqueness and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
