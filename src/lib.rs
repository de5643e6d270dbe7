//! Staged cold-email outreach.

pub mod admin;
pub mod config;
pub mod contacts;
pub mod error;
pub mod outreach_log;
pub mod replies;
pub mod sequence;
pub mod store;
pub mod templates;
pub mod transport;
