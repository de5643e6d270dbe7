//! Schema migrations, tracked in `_migrations`.
//!
//! A migration's DDL and its version row are applied in one transaction, so a
//! failed step leaves the recorded version where it was.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "outreach_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                stage TEXT NOT NULL DEFAULT 'new',
                sequence_step INTEGER NOT NULL DEFAULT 0,
                replied INTEGER NOT NULL DEFAULT 0,
                sentiment TEXT NOT NULL DEFAULT 'neutral',
                replied_at TEXT,
                last_reply_snippet TEXT,
                reply_history TEXT NOT NULL DEFAULT '[]',
                last_sent_at TEXT,
                next_follow_up_at TEXT,
                opted_out INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_stage ON contacts(stage);
            CREATE INDEX IF NOT EXISTS idx_contacts_next_follow_up ON contacts(next_follow_up_at);

            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                subject TEXT NOT NULL,
                html_body TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                delay_days INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_templates_order ON templates(sort_order);

            CREATE TABLE IF NOT EXISTS send_log (
                id TEXT PRIMARY KEY,
                contact_id TEXT NOT NULL,
                template_id TEXT,
                sent_at TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_send_log_contact ON send_log(contact_id);
            CREATE INDEX IF NOT EXISTS idx_send_log_status ON send_log(status);
        "#,
    },
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Apply every migration newer than the recorded version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(TRACKING_TABLE)
        .await
        .map_err(|e| DatabaseError::Migration(format!("_migrations table: {e}")))?;

    let applied = current_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, name) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.name
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            // Leave the connection usable if the batch stopped mid-transaction.
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::Migration(format!(
                "V{} {}: {e}",
                migration.version, migration.name
            )));
        }
    }
    Ok(())
}

/// Highest recorded version; 0 on a fresh database.
async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?;

    let version = match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?
    {
        // MAX() over an empty table is NULL.
        Some(row) => row.get::<i64>(0).unwrap_or(0),
        None => 0,
    };
    Ok(version)
}
