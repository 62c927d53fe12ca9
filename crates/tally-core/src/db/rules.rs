//! Vendor rule store

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use super::{column_error, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{MatchType, NewVendorRule, RuleSource, VendorRule};

const RULE_COLUMNS: &str = "id, match_pattern, match_type, normalized_vendor, category_id, \
                            priority, active, source, created_at";

fn map_rule(row: &Row<'_>) -> rusqlite::Result<VendorRule> {
    let match_type: String = row.get(2)?;
    let source: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(VendorRule {
        id: row.get(0)?,
        match_pattern: row.get(1)?,
        match_type: match_type
            .parse::<MatchType>()
            .map_err(|e| column_error(2, e))?,
        normalized_vendor: row.get(3)?,
        category_id: row.get(4)?,
        priority: row.get(5)?,
        active: row.get(6)?,
        source: source
            .parse::<RuleSource>()
            .map_err(|e| column_error(7, e))?,
        created_at: parse_datetime(&created_at),
    })
}

/// Active rules, in storage order
pub(crate) fn active_rules(conn: &Connection) -> Result<Vec<VendorRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM vendor_rules WHERE active = 1 ORDER BY id",
        RULE_COLUMNS
    ))?;
    let rules = stmt
        .query_map([], map_rule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

impl Database {
    /// Insert a rule after checking its category exists and its pattern compiles
    pub fn create_rule(&self, rule: &NewVendorRule) -> Result<i64> {
        let pattern = rule.match_pattern.trim();
        if pattern.is_empty() {
            return Err(Error::InvalidData("rule pattern is empty".to_string()));
        }
        if rule.match_type == MatchType::Pattern {
            regex::Regex::new(pattern)
                .map_err(|e| Error::InvalidData(format!("invalid rule pattern: {}", e)))?;
        }
        if self.get_category(rule.category_id)?.is_none() {
            return Err(Error::NotFound(format!("category {}", rule.category_id)));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO vendor_rules (match_pattern, match_type, normalized_vendor, category_id, priority, source)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                pattern,
                rule.match_type.as_str(),
                rule.normalized_vendor.trim(),
                rule.category_id,
                rule.priority,
                rule.source.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(
            "Created {} rule {} ({} '{}' -> category {})",
            rule.source.as_str(),
            id,
            rule.match_type,
            pattern,
            rule.category_id
        );
        Ok(id)
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<VendorRule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                &format!("SELECT {} FROM vendor_rules WHERE id = ?", RULE_COLUMNS),
                params![id],
                map_rule,
            )
            .optional()?;
        Ok(rule)
    }

    /// All rules including inactive ones
    pub fn list_rules(&self) -> Result<Vec<VendorRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM vendor_rules ORDER BY priority, id",
            RULE_COLUMNS
        ))?;
        let rules = stmt
            .query_map([], map_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn list_active_rules(&self) -> Result<Vec<VendorRule>> {
        let conn = self.conn()?;
        active_rules(&conn)
    }

    /// Enable or disable a rule; returns false if it does not exist
    pub fn set_rule_active(&self, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE vendor_rules SET active = ? WHERE id = ?",
            params![active, id],
        )?;
        Ok(updated > 0)
    }
}
