//! First-run template seeding.

use tracing::info;

use super::model::default_templates;
use crate::error::DatabaseError;
use crate::store::Database;

/// Insert the default template set when the store has no templates.
/// Returns the number inserted.
pub async fn seed_default_templates(db: &dyn Database) -> Result<usize, DatabaseError> {
    if !db.list_templates().await?.is_empty() {
        return Ok(0);
    }

    let templates = default_templates();
    for template in &templates {
        db.insert_template(template).await?;
    }
    info!(count = templates.len(), "Seeded default templates");
    Ok(templates.len())
}
