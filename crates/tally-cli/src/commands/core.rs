//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Resolve the pipeline configuration
//! - `cmd_init` - Initialize the database
//! - `cmd_accounts` - List accounts

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{Database, TallyConfig};
use tracing::debug;

/// Open (or create) the database at `db_path`
pub fn open_db(db_path: &Path) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    Database::new(path_str).context("Failed to open database")
}

/// Load `--config` if given, otherwise `TALLY_CONFIG`, the user config or the built-in default
pub fn load_config(path: Option<&Path>) -> Result<TallyConfig> {
    let config = match path {
        Some(path) => TallyConfig::from_path(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => TallyConfig::load().context("Failed to load config")?,
    };
    debug!(
        "Learner threshold {}, fallback timeout {:?}",
        config.learner_threshold, config.fallback_timeout
    );
    Ok(config)
}

pub fn cmd_init(db: &Database, config: &TallyConfig) -> Result<()> {
    println!("🔧 Initializing database at {}...", db.path());

    let created = db
        .seed_categories(&config.seed_categories, &config.transfer_category)
        .context("Failed to seed categories")?;
    println!(
        "   Seeded {} categories (transfer category: {})",
        created, config.transfer_category
    );

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Import a statement: tally import statement.pdf --account Girokonto");
    println!("  2. Review what the rules could not classify: tally review");
    println!("  3. Start the API: tally serve");

    Ok(())
}

pub fn cmd_accounts(db: &Database) -> Result<()> {
    let accounts = db.list_accounts()?;

    if accounts.is_empty() {
        println!("No accounts yet. They are created on first import:");
        println!("  tally import statement.csv --account Girokonto");
        return Ok(());
    }

    println!();
    println!("🏦 Accounts");
    println!("   ─────────────────────────────");
    for account in accounts {
        println!("   [{}] {} ({})", account.id, account.name, account.issuer);
    }

    Ok(())
}
