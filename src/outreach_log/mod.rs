//! Audit trail of send attempts.

pub mod model;

pub use model::{SendLogEntry, SendStatus};
