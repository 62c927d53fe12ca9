//! Transaction operations

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{column_error, parse_datetime, Database};
use crate::error::Result;
use crate::models::{Confidence, Direction, DraftTransaction, StoredTransaction};

pub(crate) const TRANSACTION_COLUMNS: &str = "id, account_id, import_job_id, date, amount, \
    direction, raw_vendor, normalized_vendor, description, type_label, metadata, category_id, \
    confidence, needs_review, is_transfer, is_reviewed, transfer_group, fingerprint, \
    created_at, updated_at";

/// A classified draft ready to be written
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub account_id: i64,
    pub import_job_id: Option<i64>,
    pub draft: &'a DraftTransaction,
    /// Vendor stored on the row; may be a rule's canonical name
    pub normalized_vendor: &'a str,
    pub category_id: Option<i64>,
    pub confidence: Option<Confidence>,
    pub needs_review: bool,
    pub fingerprint: &'a str,
}

/// Result of inserting a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionInsertResult {
    /// Transaction was inserted, contains new transaction ID
    Inserted(i64),
    /// A row with the same fingerprint already exists for the account
    Duplicate,
}

/// Filters for listing transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account_id: Option<i64>,
    pub import_job_id: Option<i64>,
    pub needs_review: Option<bool>,
    pub limit: Option<i64>,
}

impl TransactionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_id(mut self, id: Option<i64>) -> Self {
        self.account_id = id;
        self
    }

    pub fn import_job_id(mut self, id: Option<i64>) -> Self {
        self.import_job_id = id;
        self
    }

    pub fn needs_review(mut self, value: Option<bool>) -> Self {
        self.needs_review = value;
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }
}

fn parse_date_column(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| column_error(idx, e))
}

pub(crate) fn map_transaction(row: &Row<'_>) -> rusqlite::Result<StoredTransaction> {
    let date: String = row.get(3)?;
    let direction: String = row.get(5)?;
    let metadata: String = row.get(10)?;
    let confidence: Option<String> = row.get(12)?;
    let confidence = confidence
        .map(|c| c.parse::<Confidence>())
        .transpose()
        .map_err(|e| column_error(12, e))?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;

    Ok(StoredTransaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        import_job_id: row.get(2)?,
        date: parse_date_column(3, &date)?,
        amount: row.get(4)?,
        direction: direction
            .parse::<Direction>()
            .map_err(|e| column_error(5, e))?,
        raw_vendor: row.get(6)?,
        normalized_vendor: row.get(7)?,
        description: row.get(8)?,
        type_label: row.get(9)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| column_error(10, e))?,
        category_id: row.get(11)?,
        confidence,
        needs_review: row.get(13)?,
        is_transfer: row.get(14)?,
        is_reviewed: row.get(15)?,
        transfer_group: row.get(16)?,
        fingerprint: row.get(17)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Whether `fingerprint` is already stored for the account
pub(crate) fn is_duplicate(conn: &Connection, account_id: i64, fingerprint: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM transactions WHERE account_id = ? AND fingerprint = ?",
            params![account_id, fingerprint],
            |_| Ok(()),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Insert a row; the (account, fingerprint) unique key turns a repeat into `Duplicate`
pub(crate) fn insert_transaction(
    conn: &Connection,
    tx: &NewTransaction<'_>,
) -> Result<TransactionInsertResult> {
    let draft = tx.draft;
    let metadata = serde_json::to_string(&draft.metadata)?;

    let inserted = conn.execute(
        r#"
        INSERT INTO transactions (account_id, import_job_id, date, amount, direction, raw_vendor,
            normalized_vendor, description, type_label, metadata, category_id, confidence,
            needs_review, fingerprint)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(account_id, fingerprint) DO NOTHING
        "#,
        params![
            tx.account_id,
            tx.import_job_id,
            draft.date.to_string(),
            draft.amount,
            draft.direction.as_str(),
            draft.raw_vendor,
            tx.normalized_vendor,
            draft.description,
            draft.type_label,
            metadata,
            tx.category_id,
            tx.confidence.map(|c| c.as_str()),
            tx.needs_review,
            tx.fingerprint,
        ],
    )?;

    if inserted == 0 {
        Ok(TransactionInsertResult::Duplicate)
    } else {
        Ok(TransactionInsertResult::Inserted(conn.last_insert_rowid()))
    }
}

pub(crate) fn get_transaction(conn: &Connection, id: i64) -> Result<Option<StoredTransaction>> {
    let tx = conn
        .query_row(
            &format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS),
            params![id],
            map_transaction,
        )
        .optional()?;
    Ok(tx)
}

impl Database {
    pub fn get_transaction(&self, id: i64) -> Result<Option<StoredTransaction>> {
        let conn = self.conn()?;
        get_transaction(&conn, id)
    }

    /// Check a fingerprint against stored rows of an account
    pub fn is_duplicate(&self, account_id: i64, fingerprint: &str) -> Result<bool> {
        let conn = self.conn()?;
        is_duplicate(&conn, account_id, fingerprint)
    }

    /// List transactions, newest first
    pub fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<StoredTransaction>> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(account_id) = filter.account_id {
            conditions.push("account_id = ?");
            params.push(Box::new(account_id));
        }
        if let Some(job_id) = filter.import_job_id {
            conditions.push("import_job_id = ?");
            params.push(Box::new(job_id));
        }
        if let Some(needs_review) = filter.needs_review {
            conditions.push("needs_review = ?");
            params.push(Box::new(needs_review));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        params.push(Box::new(filter.limit.unwrap_or(-1)));

        let sql = format!(
            "SELECT {} FROM transactions {} ORDER BY date DESC, id DESC LIMIT ?",
            TRANSACTION_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let transactions = stmt
            .query_map(param_refs.as_slice(), map_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Rows a learned rule may still re-categorize: not reviewed, not linked as transfer
    pub fn list_unreviewed_transactions(&self) -> Result<Vec<StoredTransaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE is_reviewed = 0 AND is_transfer = 0 ORDER BY id",
            TRANSACTION_COLUMNS
        ))?;
        let transactions = stmt
            .query_map([], map_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    /// Assign a rule-derived category to unreviewed rows; reviewed rows are left alone
    pub fn apply_rule_category(
        &self,
        ids: &[i64],
        category_id: i64,
        confidence: Confidence,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                UPDATE transactions
                SET category_id = ?, confidence = ?, needs_review = 0, updated_at = CURRENT_TIMESTAMP
                WHERE id = ? AND is_reviewed = 0 AND is_transfer = 0
                "#,
            )?;
            for id in ids {
                updated += stmt.execute(params![category_id, confidence.as_str(), id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }
}
