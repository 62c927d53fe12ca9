//! Import job lifecycle, completion and rollback

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use tracing::info;

use super::transfers::unlink_transfer_group;
use super::{column_error, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{ImportCounts, ImportJob, ImportStatus, ParseWarning};

const JOB_COLUMNS: &str = "id, account_id, filename, file_fingerprint, format, status, \
    total_seen, inserted, duplicates, classified, transfers, warnings, errors, \
    created_at, completed_at";

/// What an import rollback removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// Rows of the job that were deleted
    pub deleted: usize,
    /// Transfer partners in other imports sent back to review
    pub unlinked: usize,
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<ImportJob> {
    let status: String = row.get(5)?;
    let warnings: String = row.get(11)?;
    let errors: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    let completed_at: Option<String> = row.get(14)?;

    Ok(ImportJob {
        id: row.get(0)?,
        account_id: row.get(1)?,
        filename: row.get(2)?,
        file_fingerprint: row.get(3)?,
        format: row.get(4)?,
        status: status
            .parse::<ImportStatus>()
            .map_err(|e| column_error(5, e))?,
        counts: ImportCounts {
            total_seen: row.get(6)?,
            inserted: row.get(7)?,
            duplicates: row.get(8)?,
            classified: row.get(9)?,
            transfers: row.get(10)?,
        },
        warnings: serde_json::from_str(&warnings).map_err(|e| column_error(11, e))?,
        errors: serde_json::from_str(&errors).map_err(|e| column_error(12, e))?,
        created_at: parse_datetime(&created_at),
        completed_at: completed_at.map(|s| parse_datetime(&s)),
    })
}

/// Final step of the import unit of work: store counts and mark the job completed
pub(crate) fn complete_import_job(
    conn: &Connection,
    job_id: i64,
    counts: &ImportCounts,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE import_jobs
        SET status = 'completed', total_seen = ?, inserted = ?, duplicates = ?,
            classified = ?, transfers = ?, completed_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
        params![
            counts.total_seen,
            counts.inserted,
            counts.duplicates,
            counts.classified,
            counts.transfers,
            job_id,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Create a job in `received` state
    pub fn create_import_job(
        &self,
        account_id: i64,
        filename: Option<&str>,
        file_fingerprint: Option<&str>,
    ) -> Result<i64> {
        if self.get_account(account_id)?.is_none() {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO import_jobs (account_id, filename, file_fingerprint) VALUES (?, ?, ?)",
            params![account_id, filename, file_fingerprint],
        )?;
        let id = conn.last_insert_rowid();
        info!("Import job {} received ({})", id, filename.unwrap_or("-"));
        Ok(id)
    }

    pub fn get_import_job(&self, id: i64) -> Result<Option<ImportJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM import_jobs WHERE id = ?", JOB_COLUMNS),
                params![id],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    /// List jobs, newest first
    pub fn list_import_jobs(&self, account_id: Option<i64>, limit: i64) -> Result<Vec<ImportJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM import_jobs
            WHERE (?1 IS NULL OR account_id = ?1)
            ORDER BY id DESC LIMIT ?2
            "#,
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![account_id, limit], map_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Earlier completed job of the account with the same whole-file fingerprint
    pub fn find_completed_import(
        &self,
        account_id: i64,
        file_fingerprint: &str,
    ) -> Result<Option<ImportJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM import_jobs
                    WHERE account_id = ? AND file_fingerprint = ? AND status = 'completed'
                    ORDER BY id LIMIT 1
                    "#,
                    JOB_COLUMNS
                ),
                params![account_id, file_fingerprint],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn update_import_status(&self, id: i64, status: ImportStatus) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE import_jobs SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("import job {}", id)));
        }
        info!("Import job {} -> {}", id, status);
        Ok(())
    }

    /// Move a job that still accepts rows to `importing`
    ///
    /// Returns false when the job is already importing, completed or rolled
    /// back. The check and the update are one statement, so two concurrent
    /// imports cannot both claim the same job.
    pub fn claim_import_job(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let claimed = conn.execute(
            "UPDATE import_jobs SET status = 'importing' WHERE id = ? AND status IN ('received', 'parsing', 'failed')",
            params![id],
        )?;
        if claimed > 0 {
            info!("Import job {} -> importing", id);
        }
        Ok(claimed > 0)
    }

    /// Store the detected format and parser warnings; the job moves to `parsing`
    pub fn record_parse_result(
        &self,
        id: i64,
        format: &str,
        warnings: &[ParseWarning],
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE import_jobs SET status = 'parsing', format = ?, warnings = ? WHERE id = ?",
            params![format, serde_json::to_string(warnings)?, id],
        )?;
        info!(
            "Import job {} -> parsing ({}, {} warnings)",
            id,
            format,
            warnings.len()
        );
        Ok(())
    }

    /// Mark a job failed and append the error message
    pub fn mark_import_failed(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn()?;
        let errors: Option<String> = conn
            .query_row(
                "SELECT errors FROM import_jobs WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(errors) = errors else {
            return Err(Error::NotFound(format!("import job {}", id)));
        };

        let mut errors: Vec<String> = serde_json::from_str(&errors)?;
        errors.push(message.to_string());
        conn.execute(
            "UPDATE import_jobs SET status = 'failed', errors = ?, completed_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![serde_json::to_string(&errors)?, id],
        )?;
        info!("Import job {} -> failed: {}", id, message);
        Ok(())
    }

    /// Fail jobs left in `importing` by a process that died mid-import
    ///
    /// Their write transaction never committed, so no rows exist; the jobs can
    /// be imported again.
    pub fn recover_interrupted_imports(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"
            UPDATE import_jobs
            SET status = 'failed',
                errors = json_insert(errors, '$[#]', 'Interrupted during import. Import the job again.'),
                completed_at = CURRENT_TIMESTAMP
            WHERE status = 'importing'
            "#,
            [],
        )?;
        Ok(count)
    }

    /// Delete every transaction of a job in one transaction
    ///
    /// Transfer partners that belong to other imports are unlinked and sent
    /// back to review. Override history is kept.
    pub fn rollback_import(&self, id: i64) -> Result<RollbackSummary> {
        let job = self
            .get_import_job(id)?
            .ok_or_else(|| Error::NotFound(format!("import job {}", id)))?;
        if matches!(job.status, ImportStatus::RolledBack | ImportStatus::Importing) {
            return Err(Error::InvalidData(format!(
                "import job {} is {} and cannot be rolled back",
                id, job.status
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let groups: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT transfer_group FROM transactions WHERE import_job_id = ? AND transfer_group IS NOT NULL",
            )?;
            let groups = stmt
                .query_map(params![id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            groups
        };

        let mut unlinked = 0;
        for group in &groups {
            let partners: i64 = tx.query_row(
                "SELECT COUNT(*) FROM transactions WHERE transfer_group = ? AND import_job_id IS NOT ?",
                params![group, id],
                |row| row.get(0),
            )?;
            unlink_transfer_group(&tx, group)?;
            unlinked += partners as usize;
        }

        let deleted = tx.execute(
            "DELETE FROM transactions WHERE import_job_id = ?",
            params![id],
        )?;
        tx.execute(
            "UPDATE import_jobs SET status = 'rolled_back', completed_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![id],
        )?;
        tx.commit()?;

        info!(
            "Import job {} -> rolled_back ({} rows deleted, {} partners unlinked)",
            id, deleted, unlinked
        );
        Ok(RollbackSummary { deleted, unlinked })
    }
}
