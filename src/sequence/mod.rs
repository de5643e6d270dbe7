//! Outreach sequence.

pub mod engine;
pub mod transition;

pub use engine::{Outcome, RunReport, SequenceEngine, spawn_ticker};
pub use transition::{Action, next_action};
