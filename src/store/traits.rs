//! The async `Database` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::contacts::model::{Contact, Stage};
use crate::error::DatabaseError;
use crate::outreach_log::model::SendLogEntry;
use crate::templates::model::Template;

/// Contact counts per stage, for the analytics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub total: u64,
    pub new: u64,
    pub contacted: u64,
    pub re_engaged: u64,
    pub interested: u64,
    pub lto: u64,
    pub converted: u64,
    pub replied: u64,
    pub opted_out: u64,
}

impl StageCounts {
    pub(crate) fn add(&mut self, stage: Stage, count: u64) {
        let slot = match stage {
            Stage::New => &mut self.new,
            Stage::Contacted => &mut self.contacted,
            Stage::ReEngaged => &mut self.re_engaged,
            Stage::Interested => &mut self.interested,
            Stage::Lto => &mut self.lto,
            Stage::Converted => &mut self.converted,
        };
        *slot += count;
        self.total += count;
    }
}

/// Backend-agnostic database trait covering contacts, templates, and the send log.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Insert a contact unless one with the same email exists.
    /// Returns `true` if a row was inserted.
    async fn insert_contact_if_absent(&self, contact: &Contact) -> Result<bool, DatabaseError>;

    /// Get a contact by ID.
    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError>;

    /// Get a contact by email (case-insensitive).
    async fn get_contact_by_email(&self, email: &str) -> Result<Option<Contact>, DatabaseError>;

    /// All contacts, newest first.
    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError>;

    /// Contacts in the given stage, oldest first.
    async fn list_contacts_by_stage(&self, stage: Stage) -> Result<Vec<Contact>, DatabaseError>;

    /// Contacts with `next_follow_up_at <= now`, not opted out, not converted.
    async fn list_due_contacts(&self, now: DateTime<Utc>) -> Result<Vec<Contact>, DatabaseError>;

    /// Contacts that replied at least once, most recently updated first.
    async fn list_replied_contacts(&self, limit: usize) -> Result<Vec<Contact>, DatabaseError>;

    /// Overwrite every mutable field of an existing contact.
    async fn update_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    /// Set `opted_out = true`. Returns `false` if no contact has that email.
    async fn set_opted_out(&self, email: &str) -> Result<bool, DatabaseError>;

    /// Per-stage counts.
    async fn count_contacts_by_stage(&self) -> Result<StageCounts, DatabaseError>;

    // ── Templates ───────────────────────────────────────────────────

    /// Insert a new template. Duplicate names are a constraint violation.
    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError>;

    /// Update a template by ID. Returns `false` if it does not exist.
    async fn update_template(&self, template: &Template) -> Result<bool, DatabaseError>;

    /// Look up a template by its unique name.
    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, DatabaseError>;

    /// Look up the template at a sequence position.
    async fn get_template_by_order(&self, order: i64) -> Result<Option<Template>, DatabaseError>;

    /// All templates by ascending order.
    async fn list_templates(&self) -> Result<Vec<Template>, DatabaseError>;

    // ── Send log ────────────────────────────────────────────────────

    /// Append a log entry on its own (failure paths).
    async fn append_log(&self, entry: &SendLogEntry) -> Result<(), DatabaseError>;

    /// Persist the mutated contact and its log entry in one transaction.
    async fn record_send(
        &self,
        contact: &Contact,
        entry: &SendLogEntry,
    ) -> Result<(), DatabaseError>;

    /// Log entries for a contact, oldest first.
    async fn list_log_for_contact(
        &self,
        contact_id: Uuid,
    ) -> Result<Vec<SendLogEntry>, DatabaseError>;
}
