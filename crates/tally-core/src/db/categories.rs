//! Category lookups and seeding

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use super::Database;
use crate::error::Result;
use crate::models::Category;

fn map_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        is_transfer: row.get(2)?,
    })
}

/// The dedicated transfer category, if one exists
pub(crate) fn transfer_category_id(conn: &Connection) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM categories WHERE is_transfer = 1 ORDER BY id LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

impl Database {
    /// Create or get a category by name (case-insensitive)
    pub fn upsert_category(&self, name: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO categories (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM categories WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Create or get the category linked transfers are moved to
    pub fn upsert_transfer_category(&self, name: &str) -> Result<i64> {
        let id = self.upsert_category(name)?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE categories SET is_transfer = (id = ?)",
            params![id],
        )?;
        Ok(id)
    }

    /// Seed regular categories plus the transfer category; returns how many were new
    pub fn seed_categories(&self, names: &[String], transfer: &str) -> Result<usize> {
        let before = self.list_categories()?.len();
        for name in names {
            self.upsert_category(name)?;
        }
        self.upsert_transfer_category(transfer)?;
        let created = self.list_categories()?.len() - before;
        if created > 0 {
            info!("Seeded {} categories", created);
        }
        Ok(created)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, is_transfer FROM categories ORDER BY name")?;
        let categories = stmt
            .query_map([], map_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT id, name, is_transfer FROM categories WHERE id = ?",
                params![id],
                map_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Case-insensitive lookup
    pub fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT id, name, is_transfer FROM categories WHERE name = ?",
                params![name.trim()],
                map_category,
            )
            .optional()?;
        Ok(category)
    }

    pub fn get_transfer_category(&self) -> Result<Option<Category>> {
        let conn = self.conn()?;
        match transfer_category_id(&conn)? {
            Some(id) => {
                drop(conn);
                self.get_category(id)
            }
            None => Ok(None),
        }
    }
}
