//! libSQL implementation of [`Database`](super::Database).
//!
//! Supports local file and in-memory databases. A single connection is
//! shared; writes go through `write_gate` so a transaction opened by
//! `record_send` never absorbs another task's statements.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contacts::model::{Contact, ReplyEntry, Sentiment, Stage, normalize_email};
use crate::error::DatabaseError;
use crate::outreach_log::model::{SendLogEntry, SendStatus};
use crate::store::migrations;
use crate::store::traits::{Database, StageCounts};
use crate::templates::model::Template;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_gate: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Open(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_gate: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_contacts(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_contact(&row) {
                Ok(contact) => contacts.push(contact),
                Err(e) => warn!("Skipping contact row: {e}"),
            }
        }
        Ok(contacts)
    }

    async fn query_templates(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Template>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut templates = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_template(&row) {
                Ok(template) => templates.push(template),
                Err(e) => warn!("Skipping template row: {e}"),
            }
        }
        Ok(templates)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width so string comparison in SQL orders correctly.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_datetime(dt: &Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(fmt_datetime(dt)),
        None => libsql::Value::Null,
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn row_err(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Serialization(e.to_string())
}

const CONTACT_COLUMNS: &str = "id, email, name, stage, sequence_step, replied, sentiment, replied_at, last_reply_snippet, reply_history, last_sent_at, next_follow_up_at, opted_out, created_at, updated_at";

const TEMPLATE_COLUMNS: &str = "id, name, subject, html_body, sort_order, delay_days";

const LOG_COLUMNS: &str = "id, contact_id, template_id, sent_at, status, error";

/// Map a libsql Row to a Contact. Column order matches CONTACT_COLUMNS.
fn row_to_contact(row: &libsql::Row) -> Result<Contact, DatabaseError> {
    let id_str: String = row.get(0).map_err(row_err)?;
    let stage_str: String = row.get(3).map_err(row_err)?;
    let step: i64 = row.get(4).map_err(row_err)?;
    let replied: i64 = row.get(5).map_err(row_err)?;
    let sentiment_str: String = row.get(6).map_err(row_err)?;
    let replied_at: Option<String> = row.get(7).ok();
    let history_str: String = row.get::<String>(9).unwrap_or_else(|_| "[]".into());
    let last_sent_at: Option<String> = row.get(10).ok();
    let next_follow_up_at: Option<String> = row.get(11).ok();
    let opted_out: i64 = row.get(12).map_err(row_err)?;
    let created_str: String = row.get(13).map_err(row_err)?;
    let updated_str: String = row.get(14).map_err(row_err)?;

    let reply_history: Vec<ReplyEntry> = serde_json::from_str(&history_str)
        .map_err(|e| DatabaseError::Serialization(format!("reply_history: {e}")))?;

    Ok(Contact {
        id: Uuid::parse_str(&id_str).map_err(row_err)?,
        email: row.get(1).map_err(row_err)?,
        name: row.get(2).map_err(row_err)?,
        stage: stage_str.parse::<Stage>().map_err(row_err)?,
        sequence_step: u8::try_from(step).unwrap_or(0),
        replied: replied != 0,
        sentiment: sentiment_str.parse::<Sentiment>().unwrap_or_default(),
        replied_at: parse_optional_datetime(&replied_at),
        last_reply_snippet: row.get(8).ok(),
        reply_history,
        last_sent_at: parse_optional_datetime(&last_sent_at),
        next_follow_up_at: parse_optional_datetime(&next_follow_up_at),
        opted_out: opted_out != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a Template. Column order matches TEMPLATE_COLUMNS.
fn row_to_template(row: &libsql::Row) -> Result<Template, DatabaseError> {
    let id_str: String = row.get(0).map_err(row_err)?;
    let delay_days: Option<i64> = row.get(5).ok();
    Ok(Template {
        id: Uuid::parse_str(&id_str).map_err(row_err)?,
        name: row.get(1).map_err(row_err)?,
        subject: row.get(2).map_err(row_err)?,
        html_body: row.get(3).map_err(row_err)?,
        order: row.get(4).map_err(row_err)?,
        delay_days: delay_days.and_then(|d| u32::try_from(d).ok()),
    })
}

/// Map a libsql Row to a SendLogEntry. Column order matches LOG_COLUMNS.
fn row_to_log(row: &libsql::Row) -> Result<SendLogEntry, DatabaseError> {
    let id_str: String = row.get(0).map_err(row_err)?;
    let contact_str: String = row.get(1).map_err(row_err)?;
    let template_str: Option<String> = row.get(2).ok();
    let sent_str: String = row.get(3).map_err(row_err)?;
    let status_str: String = row.get(4).map_err(row_err)?;
    Ok(SendLogEntry {
        id: Uuid::parse_str(&id_str).map_err(row_err)?,
        contact_id: Uuid::parse_str(&contact_str).map_err(row_err)?,
        template_id: template_str.and_then(|s| Uuid::parse_str(&s).ok()),
        sent_at: parse_datetime(&sent_str),
        status: status_str.parse::<SendStatus>().map_err(row_err)?,
        error: row.get(5).ok(),
    })
}

async fn write_contact(conn: &Connection, contact: &Contact) -> Result<u64, DatabaseError> {
    let history = serde_json::to_string(&contact.reply_history)
        .map_err(|e| DatabaseError::Serialization(format!("reply_history: {e}")))?;
    conn.execute(
        "UPDATE contacts SET name = ?2, stage = ?3, sequence_step = ?4, replied = ?5,
            sentiment = ?6, replied_at = ?7, last_reply_snippet = ?8, reply_history = ?9,
            last_sent_at = ?10, next_follow_up_at = ?11, opted_out = MAX(opted_out, ?12),
            updated_at = ?13
         WHERE id = ?1",
        params![
            contact.id.to_string(),
            contact.name.clone(),
            contact.stage.as_str(),
            i64::from(contact.sequence_step),
            i64::from(contact.replied),
            contact.sentiment.to_string(),
            opt_datetime(&contact.replied_at),
            opt_text_owned(contact.last_reply_snippet.clone()),
            history,
            opt_datetime(&contact.last_sent_at),
            opt_datetime(&contact.next_follow_up_at),
            i64::from(contact.opted_out),
            fmt_datetime(&contact.updated_at),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("update_contact: {e}")))
}

async fn write_log(conn: &Connection, entry: &SendLogEntry) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO send_log (id, contact_id, template_id, sent_at, status, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id.to_string(),
            entry.contact_id.to_string(),
            opt_text_owned(entry.template_id.map(|id| id.to_string())),
            fmt_datetime(&entry.sent_at),
            entry.status.to_string(),
            opt_text_owned(entry.error.clone()),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("append_log: {e}")))?;
    Ok(())
}

fn template_write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE") {
        DatabaseError::Constraint(format!("{op}: template name already exists"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn insert_contact_if_absent(&self, contact: &Contact) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let history = serde_json::to_string(&contact.reply_history)
            .map_err(|e| DatabaseError::Serialization(format!("reply_history: {e}")))?;
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT INTO contacts ({CONTACT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                     ON CONFLICT(email) DO NOTHING"
                ),
                params![
                    contact.id.to_string(),
                    normalize_email(&contact.email),
                    contact.name.clone(),
                    contact.stage.as_str(),
                    i64::from(contact.sequence_step),
                    i64::from(contact.replied),
                    contact.sentiment.to_string(),
                    opt_datetime(&contact.replied_at),
                    opt_text_owned(contact.last_reply_snippet.clone()),
                    history,
                    opt_datetime(&contact.last_sent_at),
                    opt_datetime(&contact.next_follow_up_at),
                    i64::from(contact.opted_out),
                    fmt_datetime(&contact.created_at),
                    fmt_datetime(&contact.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_contact: {e}")))?;

        if inserted > 0 {
            debug!(contact = %contact.email, "Contact inserted into DB");
        }
        Ok(inserted > 0)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError> {
        let mut contacts = self
            .query_contacts(
                "get_contact",
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        Ok(contacts.pop())
    }

    async fn get_contact_by_email(&self, email: &str) -> Result<Option<Contact>, DatabaseError> {
        let mut contacts = self
            .query_contacts(
                "get_contact_by_email",
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE email = ?1"),
                params![normalize_email(email)],
            )
            .await?;
        Ok(contacts.pop())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError> {
        self.query_contacts(
            "list_contacts",
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY created_at DESC"),
            (),
        )
        .await
    }

    async fn list_contacts_by_stage(&self, stage: Stage) -> Result<Vec<Contact>, DatabaseError> {
        self.query_contacts(
            "list_contacts_by_stage",
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts WHERE stage = ?1 ORDER BY created_at ASC"
            ),
            params![stage.as_str()],
        )
        .await
    }

    async fn list_due_contacts(&self, now: DateTime<Utc>) -> Result<Vec<Contact>, DatabaseError> {
        self.query_contacts(
            "list_due_contacts",
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE next_follow_up_at IS NOT NULL AND next_follow_up_at <= ?1
                   AND opted_out = 0 AND stage != 'converted'
                 ORDER BY next_follow_up_at ASC"
            ),
            params![fmt_datetime(&now)],
        )
        .await
    }

    async fn list_replied_contacts(&self, limit: usize) -> Result<Vec<Contact>, DatabaseError> {
        self.query_contacts(
            "list_replied_contacts",
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE replied = 1 OR last_reply_snippet IS NOT NULL
                 ORDER BY updated_at DESC LIMIT ?1"
            ),
            params![limit as i64],
        )
        .await
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let updated = write_contact(self.conn(), contact).await?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "contact".into(),
                id: contact.id.to_string(),
            });
        }
        debug!(contact = %contact.email, stage = %contact.stage, "Contact updated in DB");
        Ok(())
    }

    async fn set_opted_out(&self, email: &str) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let updated = self
            .conn()
            .execute(
                "UPDATE contacts SET opted_out = 1, updated_at = ?1 WHERE email = ?2",
                params![fmt_datetime(&Utc::now()), normalize_email(email)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_opted_out: {e}")))?;
        Ok(updated > 0)
    }

    async fn count_contacts_by_stage(&self) -> Result<StageCounts, DatabaseError> {
        let conn = self.conn();
        let mut counts = StageCounts::default();

        let mut rows = conn
            .query("SELECT stage, COUNT(*) FROM contacts GROUP BY stage", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_contacts_by_stage: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            let stage_str: String = row.get(0).unwrap_or_default();
            let count: i64 = row.get(1).unwrap_or(0);
            match stage_str.parse::<Stage>() {
                Ok(stage) => counts.add(stage, count as u64),
                Err(e) => warn!("Ignoring unknown stage in counts: {e}"),
            }
        }

        let mut rows = conn
            .query(
                "SELECT COALESCE(SUM(replied), 0), COALESCE(SUM(opted_out), 0) FROM contacts",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_contacts_by_stage: {e}")))?;
        if let Ok(Some(row)) = rows.next().await {
            counts.replied = row.get::<i64>(0).unwrap_or(0) as u64;
            counts.opted_out = row.get::<i64>(1).unwrap_or(0) as u64;
        }
        Ok(counts)
    }

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        self.conn()
            .execute(
                &format!("INSERT INTO templates ({TEMPLATE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    template.id.to_string(),
                    template.name.clone(),
                    template.subject.clone(),
                    template.html_body.clone(),
                    template.order,
                    match template.delay_days {
                        Some(d) => libsql::Value::Integer(i64::from(d)),
                        None => libsql::Value::Null,
                    },
                ],
            )
            .await
            .map_err(|e| template_write_err("insert_template", e))?;

        debug!(template = %template.name, "Template inserted into DB");
        Ok(())
    }

    async fn update_template(&self, template: &Template) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let updated = self
            .conn()
            .execute(
                "UPDATE templates SET name = ?2, subject = ?3, html_body = ?4, sort_order = ?5, delay_days = ?6
                 WHERE id = ?1",
                params![
                    template.id.to_string(),
                    template.name.clone(),
                    template.subject.clone(),
                    template.html_body.clone(),
                    template.order,
                    match template.delay_days {
                        Some(d) => libsql::Value::Integer(i64::from(d)),
                        None => libsql::Value::Null,
                    },
                ],
            )
            .await
            .map_err(|e| template_write_err("update_template", e))?;
        Ok(updated > 0)
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, DatabaseError> {
        let mut templates = self
            .query_templates(
                "get_template_by_name",
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE name = ?1"),
                params![name],
            )
            .await?;
        Ok(templates.pop())
    }

    async fn get_template_by_order(&self, order: i64) -> Result<Option<Template>, DatabaseError> {
        let mut templates = self
            .query_templates(
                "get_template_by_order",
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE sort_order = ?1 LIMIT 1"),
                params![order],
            )
            .await?;
        Ok(templates.pop())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, DatabaseError> {
        self.query_templates(
            "list_templates",
            &format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY sort_order ASC"),
            (),
        )
        .await
    }

    // ── Send log ────────────────────────────────────────────────────

    async fn append_log(&self, entry: &SendLogEntry) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        write_log(self.conn(), entry).await
    }

    async fn record_send(
        &self,
        contact: &Contact,
        entry: &SendLogEntry,
    ) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_send begin: {e}")))?;

        let result = async {
            let updated = write_contact(&tx, contact).await?;
            if updated == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "contact".into(),
                    id: contact.id.to_string(),
                });
            }
            write_log(&tx, entry).await
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("record_send commit: {e}")))?;
                debug!(contact = %contact.email, status = %entry.status, "Send recorded");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("record_send rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    async fn list_log_for_contact(
        &self,
        contact_id: Uuid,
    ) -> Result<Vec<SendLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM send_log WHERE contact_id = ?1 ORDER BY sent_at ASC"
                ),
                params![contact_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_log_for_contact: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_log_for_contact: {e}")))?
        {
            entries.push(row_to_log(&row)?);
        }
        Ok(entries)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
