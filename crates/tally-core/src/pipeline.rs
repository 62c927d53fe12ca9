//! Import orchestration
//!
//! An upload is turned into text, routed to a parser and recorded as an
//! import job. Importing the job's rows then runs deduplication,
//! classification and transfer pairing, and writes everything in one SQLite
//! transaction together with the job's final status: a statement is either
//! fully imported or not at all.
//!
//! External classification calls happen before the write transaction opens,
//! so a slow collaborator never holds the database lock.

use std::collections::BTreeSet;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ai::{AIBackend, AIClient};
use crate::classify::{classify_fallback, Classification, FallbackLimits, RuleSet};
use crate::config::TallyConfig;
use crate::db::{
    complete_import_job, find_transfer_candidates, insert_transaction, is_duplicate, Database,
    NewTransaction, TransactionInsertResult,
};
use crate::dedup::{draft_fingerprint, file_fingerprint};
use crate::error::{Error, Result};
use crate::extract::extract_text;
use crate::models::{DraftTransaction, ImportCounts, Issuer, ParsedStatement, StatementFormat};
use crate::normalize::Normalizer;
use crate::parsers::parse_document;
use crate::transfer::{
    closest_candidate, detect_transfer_keywords, find_pair, pair, TRANSFER_WINDOW_DAYS,
};

/// A parsed upload waiting to be imported
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub import_job_id: i64,
    pub format: StatementFormat,
    pub statement: ParsedStatement,
    /// Earlier completed job of the same account with identical file content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_import: Option<i64>,
}

/// One draft after fingerprinting and classification
struct PreparedRow {
    draft: DraftTransaction,
    fingerprint: String,
    classification: Classification,
}

impl PreparedRow {
    fn stored_vendor(&self) -> &str {
        self.classification
            .vendor_override
            .as_deref()
            .unwrap_or(&self.draft.normalized_vendor)
    }

    fn mentions_transfer(&self) -> bool {
        mentions_transfer(&self.draft)
    }
}

fn mentions_transfer(draft: &DraftTransaction) -> bool {
    let description = format!(
        "{} {}",
        draft.type_label.as_deref().unwrap_or_default(),
        draft.description
    );
    detect_transfer_keywords(&draft.raw_vendor, &description)
        || detect_transfer_keywords(&draft.normalized_vendor, "")
}

/// Runs uploads and imports against one database
#[derive(Clone)]
pub struct ImportOrchestrator {
    db: Database,
    ai: Option<AIClient>,
    normalizer: Normalizer,
    limits: FallbackLimits,
}

impl ImportOrchestrator {
    pub fn new(db: Database, ai: Option<AIClient>, config: &TallyConfig) -> Self {
        Self {
            db,
            ai,
            normalizer: Normalizer::from_config(config),
            limits: FallbackLimits::from_config(config),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Extract, route and parse an uploaded document and open an import job
    ///
    /// Input and extraction errors are returned before anything is persisted.
    pub fn prepare_upload(
        &self,
        account_id: i64,
        filename: &str,
        bytes: &[u8],
        hint: Option<Issuer>,
    ) -> Result<UploadOutcome> {
        if self.db.get_account(account_id)?.is_none() {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }

        let text = extract_text(filename, bytes)?;
        let (format, statement) =
            parse_document(&text, Some(filename), hint, &self.normalizer)?;

        let file_fp = file_fingerprint(bytes);
        let previous_import = self
            .db
            .find_completed_import(account_id, &file_fp)?
            .map(|job| job.id);
        if let Some(previous) = previous_import {
            warn!(
                "{} was already imported into account {} (job {}); rows will be counted as duplicates",
                filename, account_id, previous
            );
        }

        let job_id = self
            .db
            .create_import_job(account_id, Some(filename), Some(&file_fp))?;
        self.db
            .record_parse_result(job_id, &format.to_string(), &statement.warnings)?;

        info!(
            "Parsed {} as {}: {} transactions, {} warnings",
            filename,
            format,
            statement.transactions.len(),
            statement.warnings.len()
        );

        Ok(UploadOutcome {
            import_job_id: job_id,
            format,
            statement,
            previous_import,
        })
    }

    /// Upload and import in one step
    pub async fn import_file(
        &self,
        account_id: i64,
        filename: &str,
        bytes: &[u8],
        hint: Option<Issuer>,
    ) -> Result<(UploadOutcome, ImportCounts)> {
        let upload = self.prepare_upload(account_id, filename, bytes, hint)?;
        let counts = self
            .import(
                upload.import_job_id,
                account_id,
                upload.statement.transactions.clone(),
            )
            .await?;
        Ok((upload, counts))
    }

    /// Import drafts under an open job
    ///
    /// On error the write transaction rolls back and the job is marked failed;
    /// a failed job can be imported again.
    pub async fn import(
        &self,
        job_id: i64,
        account_id: i64,
        drafts: Vec<DraftTransaction>,
    ) -> Result<ImportCounts> {
        let job = self
            .db
            .get_import_job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("import job {}", job_id)))?;
        if job.account_id != account_id {
            return Err(Error::InvalidData(format!(
                "import job {} belongs to account {}, not {}",
                job_id, job.account_id, account_id
            )));
        }
        if !job.status.accepts_rows() || !self.db.claim_import_job(job_id)? {
            return Err(Error::InvalidData(format!(
                "import job {} is {} and does not accept rows",
                job_id, job.status
            )));
        }

        match self.run_import(job_id, account_id, drafts).await {
            Ok(counts) => {
                info!(
                    "Import job {} -> completed: {} seen, {} inserted, {} duplicates, {} classified, {} transfers",
                    job_id,
                    counts.total_seen,
                    counts.inserted,
                    counts.duplicates,
                    counts.classified,
                    counts.transfers
                );
                Ok(counts)
            }
            Err(e) => {
                if let Err(mark_err) = self.db.mark_import_failed(job_id, &e.to_string()) {
                    warn!("Could not mark import job {} failed: {}", job_id, mark_err);
                }
                Err(e)
            }
        }
    }

    async fn run_import(
        &self,
        job_id: i64,
        account_id: i64,
        drafts: Vec<DraftTransaction>,
    ) -> Result<ImportCounts> {
        let rules = RuleSet::new(self.db.list_active_rules()?);
        debug!("Classifying with {} active rules", rules.len());

        let mut rows = Vec::with_capacity(drafts.len());
        for (index, mut draft) in drafts.into_iter().enumerate() {
            if draft.amount < 0 {
                return Err(Error::InvalidData(format!(
                    "transaction {} has a negative amount; the sign belongs in direction",
                    index + 1
                )));
            }
            if draft.normalized_vendor.trim().is_empty() {
                draft.normalized_vendor = self.normalizer.normalize_vendor(&draft.raw_vendor);
            }
            let fingerprint = draft_fingerprint(account_id, &draft);
            let classification = rules.classify(&draft.raw_vendor, &draft.normalized_vendor);
            rows.push(PreparedRow {
                draft,
                fingerprint,
                classification,
            });
        }

        self.apply_fallback(account_id, &mut rows).await?;

        let mut conn = self.db.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let counts = write_rows(&tx, job_id, account_id, &rows)?;
        complete_import_job(&tx, job_id, &counts)?;
        tx.commit()?;

        Ok(counts)
    }

    /// Classify rule misses through the external collaborator, one call per
    /// distinct vendor; rows already stored are skipped
    async fn apply_fallback(&self, account_id: i64, rows: &mut [PreparedRow]) -> Result<()> {
        let Some(ai) = &self.ai else {
            return Ok(());
        };

        let mut vendors = BTreeSet::new();
        for row in rows.iter() {
            let vendor = row.draft.normalized_vendor.trim();
            if row.classification.is_classified() || vendor.is_empty() {
                continue;
            }
            if self.db.is_duplicate(account_id, &row.fingerprint)? {
                continue;
            }
            vendors.insert(vendor.to_string());
        }
        if vendors.is_empty() {
            return Ok(());
        }

        let categories = self.db.list_categories()?;
        debug!(
            "Asking {} at {} about {} vendors",
            ai.model(),
            ai.host(),
            vendors.len()
        );
        let outcomes =
            classify_fallback(ai, vendors.into_iter().collect(), &categories, self.limits).await;

        for row in rows.iter_mut() {
            if row.classification.is_classified() {
                continue;
            }
            if let Some(outcome) = outcomes.get(row.draft.normalized_vendor.trim()) {
                row.classification = outcome.classification();
            }
        }
        Ok(())
    }
}

/// The write phase; runs inside the caller's transaction
fn write_rows(
    conn: &Connection,
    job_id: i64,
    account_id: i64,
    rows: &[PreparedRow],
) -> Result<ImportCounts> {
    let mut counts = ImportCounts::default();

    for row in rows {
        counts.total_seen += 1;

        if is_duplicate(conn, account_id, &row.fingerprint)? {
            counts.duplicates += 1;
            continue;
        }

        let classification = &row.classification;
        let result = insert_transaction(
            conn,
            &NewTransaction {
                account_id,
                import_job_id: Some(job_id),
                draft: &row.draft,
                normalized_vendor: row.stored_vendor(),
                category_id: classification.category_id,
                confidence: classification.confidence,
                needs_review: classification.needs_review(),
                fingerprint: &row.fingerprint,
            },
        )?;
        let id = match result {
            TransactionInsertResult::Inserted(id) => id,
            // Lost a race against a concurrent import of the same account
            TransactionInsertResult::Duplicate => {
                counts.duplicates += 1;
                continue;
            }
        };
        counts.inserted += 1;
        if classification.is_classified() {
            counts.classified += 1;
        }

        let draft = &row.draft;
        let partner = if row.mentions_transfer() {
            find_pair(conn, account_id, draft.date, draft.amount, draft.direction)?
        } else {
            // The other side may have been flagged when it was imported
            let candidates = find_transfer_candidates(
                conn,
                account_id,
                draft.date,
                draft.amount,
                draft.direction,
                TRANSFER_WINDOW_DAYS,
            )?
            .into_iter()
            .filter(|c| {
                detect_transfer_keywords(&c.raw_vendor, &c.description)
                    || detect_transfer_keywords(
                        &c.normalized_vendor,
                        c.type_label.as_deref().unwrap_or_default(),
                    )
            })
            .collect();
            closest_candidate(draft.date, candidates)
        };

        if let Some(partner) = partner {
            pair(conn, id, partner.id)?;
            counts.transfers += 1;
        }
    }

    Ok(counts)
}
