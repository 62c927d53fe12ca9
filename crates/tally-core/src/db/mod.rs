//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `accounts` - Accounts statements are imported into
//! - `categories` - Category lookups and seeding
//! - `rules` - Vendor rule store
//! - `transactions` - Ledger rows, duplicate checks, review state
//! - `transfers` - Transfer candidate search and pairing
//! - `import_jobs` - Import job lifecycle, commit and rollback
//! - `overrides` - Append-only category override audit trail
//!
//! Functions taking a `&Connection` are the building blocks of the import
//! unit of work; they run inside the caller's SQLite transaction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod accounts;
mod categories;
mod import_jobs;
mod overrides;
mod rules;
mod transactions;
mod transfers;

pub use import_jobs::RollbackSummary;
pub use transactions::{NewTransaction, TransactionFilter, TransactionInsertResult};

pub(crate) use import_jobs::complete_import_job;
pub(crate) use rules::active_rules;
pub(crate) use transactions::{insert_transaction, is_duplicate};
pub(crate) use transfers::{find_transfer_candidates, link_transfer_pair};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for the database path
pub const DB_PATH_ENV: &str = "TALLY_DB";

/// How long a connection waits for another writer before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A text column that does not hold a valid value for its type
pub(crate) fn column_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` so every pooled
    /// connection sees the same data.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));

        // Remove leftovers from an earlier run
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }

        Self::new(&path.to_string_lossy())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the single writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                issuer TEXT NOT NULL,                 -- giro, card
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                is_transfer INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS vendor_rules (
                id INTEGER PRIMARY KEY,
                match_pattern TEXT NOT NULL,
                match_type TEXT NOT NULL CHECK (match_type IN ('exact', 'contains', 'pattern')),
                normalized_vendor TEXT NOT NULL DEFAULT '',
                category_id INTEGER NOT NULL REFERENCES categories(id),
                priority INTEGER NOT NULL DEFAULT 50,   -- lower wins
                active INTEGER NOT NULL DEFAULT 1,
                source TEXT NOT NULL DEFAULT 'manual',  -- manual, learned
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_vendor_rules_active ON vendor_rules(active, category_id);

            CREATE TABLE IF NOT EXISTS import_jobs (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                filename TEXT,
                file_fingerprint TEXT,                -- SHA-256 of the uploaded bytes
                format TEXT,                          -- e.g. giro_delimited
                status TEXT NOT NULL DEFAULT 'received',
                total_seen INTEGER NOT NULL DEFAULT 0,
                inserted INTEGER NOT NULL DEFAULT 0,
                duplicates INTEGER NOT NULL DEFAULT 0,
                classified INTEGER NOT NULL DEFAULT 0,
                transfers INTEGER NOT NULL DEFAULT 0,
                warnings TEXT NOT NULL DEFAULT '[]',  -- JSON: parser warnings
                errors TEXT NOT NULL DEFAULT '[]',    -- JSON: error messages
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                completed_at DATETIME
            );
            CREATE INDEX IF NOT EXISTS idx_import_jobs_file ON import_jobs(account_id, file_fingerprint);

            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                import_job_id INTEGER REFERENCES import_jobs(id),
                date DATE NOT NULL,
                amount INTEGER NOT NULL CHECK (amount >= 0),  -- minor units
                direction TEXT NOT NULL CHECK (direction IN ('debit', 'credit')),
                raw_vendor TEXT NOT NULL,
                normalized_vendor TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                type_label TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',          -- JSON object
                category_id INTEGER REFERENCES categories(id),
                confidence TEXT CHECK (confidence IN ('high', 'medium', 'low')),
                needs_review INTEGER NOT NULL DEFAULT 0,
                is_transfer INTEGER NOT NULL DEFAULT 0,
                is_reviewed INTEGER NOT NULL DEFAULT 0,
                transfer_group TEXT,
                fingerprint TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(account_id, fingerprint)
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_account_date ON transactions(account_id, date);
            CREATE INDEX IF NOT EXISTS idx_transactions_job ON transactions(import_job_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_transfer ON transactions(transfer_group);
            CREATE INDEX IF NOT EXISTS idx_transactions_review ON transactions(is_reviewed, needs_review);

            -- A transfer group links exactly two rows
            CREATE TRIGGER IF NOT EXISTS transactions_transfer_group_pair
            BEFORE UPDATE OF transfer_group ON transactions
            WHEN NEW.transfer_group IS NOT NULL
                AND (SELECT COUNT(*) FROM transactions
                     WHERE transfer_group = NEW.transfer_group AND id != NEW.id) >= 2
            BEGIN
                SELECT RAISE(ABORT, 'transfer group already has two members');
            END;

            -- Audit trail; transaction_id is not a foreign key so history survives rollback
            CREATE TABLE IF NOT EXISTS category_overrides (
                id INTEGER PRIMARY KEY,
                transaction_id INTEGER NOT NULL,
                old_category_id INTEGER,
                new_category_id INTEGER NOT NULL,
                normalized_vendor TEXT NOT NULL,
                actor TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_category_overrides_vendor
                ON category_overrides(normalized_vendor, new_category_id);
            CREATE INDEX IF NOT EXISTS idx_category_overrides_tx ON category_overrides(transaction_id);

            CREATE TRIGGER IF NOT EXISTS category_overrides_no_update
            BEFORE UPDATE ON category_overrides
            BEGIN
                SELECT RAISE(ABORT, 'category_overrides is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS category_overrides_no_delete
            BEFORE DELETE ON category_overrides
            BEGIN
                SELECT RAISE(ABORT, 'category_overrides is append-only');
            END;
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
