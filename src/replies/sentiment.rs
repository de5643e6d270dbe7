//! Keyword-based reply sentiment.

use crate::contacts::model::{Sentiment, snippet};

/// Phrases that mark a reply as negative.
pub const NEGATIVE_KEYWORDS: &[&str] = &[
    "not interested",
    "unsubscribe",
    "stop",
    "remove",
    "don't contact",
    "no thanks",
    "discard",
    "quit",
];

/// Classify a reply body. Only the leading snippet is inspected; any negative
/// keyword makes the reply negative, everything else counts as positive.
pub fn classify(body: &str) -> Sentiment {
    let head = snippet(body).to_lowercase();
    if NEGATIVE_KEYWORDS.iter().any(|k| head.contains(k)) {
        Sentiment::Negative
    } else {
        Sentiment::Positive
    }
}
