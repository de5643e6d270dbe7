//! Inbound replies: sentiment, recording, and mailbox polling.

pub mod ingest;
pub mod poller;
pub mod sentiment;

pub use ingest::ReplyIngestor;
pub use poller::{InboundReply, spawn_reply_poller};
pub use sentiment::classify;
