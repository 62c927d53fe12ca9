//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Bank and card statement ingestion
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Import, classify and reconcile bank and card statements", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, env = "TALLY_DB", default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Pipeline configuration file (defaults to TALLY_CONFIG or ~/.config/tally/tally.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and seed categories
    Init,

    /// Parse a statement and print the drafts without importing
    Parse {
        /// Statement file (.csv, .txt or .pdf)
        file: PathBuf,

        /// Issuer hint when the format is not recognized: giro, card
        #[arg(short, long)]
        issuer: Option<String>,

        /// Print the parsed statement as JSON
        #[arg(long)]
        json: bool,
    },

    /// Import a statement into an account
    Import {
        /// Statement file (.csv, .txt or .pdf)
        file: PathBuf,

        /// Account name (created on first import)
        #[arg(short, long)]
        account: String,

        /// Issuer hint when the format is not recognized: giro, card
        #[arg(short, long)]
        issuer: Option<String>,
    },

    /// Undo an import, deleting every transaction it created
    Rollback {
        /// Import job ID
        job: i64,
    },

    /// List import jobs
    Imports {
        /// Only jobs of this account
        #[arg(short, long)]
        account: Option<String>,

        /// Number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// List accounts
    Accounts,

    /// Manage vendor rules (list, add)
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },

    /// Set the category of a transaction (feeds the rule learner)
    Correct {
        /// Transaction ID
        transaction_id: i64,

        /// Category name or ID
        category: String,

        /// Recorded as the author of the correction
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// List transactions that need review
    Review {
        /// Only transactions of this account
        #[arg(short, long)]
        account: Option<String>,

        /// Number of transactions to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Allowed CORS origin (repeatable)
        #[arg(long = "allow-origin")]
        allowed_origins: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List all rules in priority order
    List,

    /// Add a rule
    Add {
        /// Text or regex matched against the vendor
        pattern: String,

        /// Category name or ID
        category: String,

        /// Match type: exact, contains, pattern
        #[arg(short = 't', long, default_value = "contains")]
        match_type: String,

        /// Canonical vendor name stored on matching transactions
        #[arg(long)]
        vendor: Option<String>,

        /// Priority (lower wins; 15 or below classifies with high confidence)
        #[arg(short, long, default_value = "50")]
        priority: i64,
    },
}
