//! Outreach contacts.

pub mod import;
pub mod model;

pub use import::{ImportReport, NewContact, import_contacts};
pub use model::{Contact, ReplyEntry, Sentiment, Stage};
