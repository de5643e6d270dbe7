//! Insert-only import of `(name, email)` rows.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::model::{Contact, normalize_email};
use crate::error::DatabaseError;
use crate::store::Database;

/// One row supplied by an upload / import collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct NewContact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Outcome counts for an import batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Rows with a usable email.
    pub received: usize,
    /// New contacts created at stage `new`.
    pub inserted: usize,
    /// Rows whose email already existed; the stored contact was left alone.
    pub existing: usize,
    /// Rows without an email.
    pub skipped: usize,
}

/// Insert every row whose email is not yet known. Existing contacts are never overwritten.
pub async fn import_contacts(
    db: &dyn Database,
    rows: Vec<NewContact>,
) -> Result<ImportReport, DatabaseError> {
    let mut report = ImportReport::default();

    for row in rows {
        let email = match row.email.as_deref().map(normalize_email) {
            Some(e) if !e.is_empty() => e,
            _ => {
                report.skipped += 1;
                continue;
            }
        };
        report.received += 1;

        let name = row
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        if db.insert_contact_if_absent(&Contact::new(name, &email)).await? {
            report.inserted += 1;
        } else {
            debug!(contact = %email, "Import skipped existing contact");
            report.existing += 1;
        }
    }

    info!(
        received = report.received,
        inserted = report.inserted,
        existing = report.existing,
        skipped = report.skipped,
        "Contact import complete"
    );
    Ok(report)
}
