//! Append-only category override audit trail

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::CategoryOverride;

const OVERRIDE_COLUMNS: &str =
    "id, transaction_id, old_category_id, new_category_id, normalized_vendor, actor, created_at";

fn map_override(row: &Row<'_>) -> rusqlite::Result<CategoryOverride> {
    let created_at: String = row.get(6)?;
    Ok(CategoryOverride {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        old_category_id: row.get(2)?,
        new_category_id: row.get(3)?,
        normalized_vendor: row.get(4)?,
        actor: row.get(5)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Record a manual category change
    ///
    /// The override row and the transaction update commit together. The
    /// transaction becomes reviewed with confidence high.
    pub fn record_category_override(
        &self,
        transaction_id: i64,
        new_category_id: i64,
        actor: &str,
    ) -> Result<CategoryOverride> {
        if self.get_category(new_category_id)?.is_none() {
            return Err(Error::NotFound(format!("category {}", new_category_id)));
        }
        let actor = match actor.trim() {
            "" => "user",
            actor => actor,
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(Option<i64>, String)> = tx
            .query_row(
                "SELECT category_id, normalized_vendor FROM transactions WHERE id = ?",
                params![transaction_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((old_category_id, vendor)) = current else {
            return Err(Error::NotFound(format!("transaction {}", transaction_id)));
        };

        tx.execute(
            r#"
            INSERT INTO category_overrides (transaction_id, old_category_id, new_category_id, normalized_vendor, actor)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![transaction_id, old_category_id, new_category_id, vendor, actor],
        )?;
        let override_id = tx.last_insert_rowid();

        tx.execute(
            r#"
            UPDATE transactions
            SET category_id = ?, confidence = 'high', is_reviewed = 1, needs_review = 0,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![new_category_id, transaction_id],
        )?;

        let recorded = tx.query_row(
            &format!(
                "SELECT {} FROM category_overrides WHERE id = ?",
                OVERRIDE_COLUMNS
            ),
            params![override_id],
            map_override,
        )?;
        tx.commit()?;

        Ok(recorded)
    }

    /// Override history of one transaction, oldest first
    pub fn list_overrides_for_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<CategoryOverride>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM category_overrides WHERE transaction_id = ? ORDER BY id",
            OVERRIDE_COLUMNS
        ))?;
        let overrides = stmt
            .query_map(params![transaction_id], map_override)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(overrides)
    }

    /// How often `vendor` has been moved to `category_id`
    pub fn count_overrides(&self, vendor: &str, category_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM category_overrides WHERE normalized_vendor = ? AND new_category_id = ?",
            params![vendor, category_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
