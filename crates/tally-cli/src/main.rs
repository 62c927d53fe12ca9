//! Tally CLI - Bank and card statement ingestion
//!
//! Usage:
//!   tally init                               Initialize database
//!   tally import FILE --account NAME         Import a statement (auto-detects format)
//!   tally review                             List transactions needing review
//!   tally correct ID CATEGORY                Categorize a transaction
//!   tally serve --port 3000                  Start web server

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use tally_core::CorrectionLearner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_init(&db, &config)
        }
        Commands::Parse { file, issuer, json } => {
            commands::cmd_parse(&config, &file, issuer.as_deref(), json).map(|_| ())
        }
        Commands::Import {
            file,
            account,
            issuer,
        } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_import(&db, &config, &file, &account, issuer.as_deref()).await
        }
        Commands::Rollback { job } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_rollback(&db, job)
        }
        Commands::Imports { account, limit } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_imports(&db, account.as_deref(), limit)
        }
        Commands::Accounts => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_accounts(&db)
        }
        Commands::Rules { action } => {
            let db = commands::open_db(&cli.db)?;
            match action {
                None | Some(RulesAction::List) => commands::cmd_rules_list(&db),
                Some(RulesAction::Add {
                    pattern,
                    category,
                    match_type,
                    vendor,
                    priority,
                }) => commands::cmd_rules_add(
                    &db,
                    &pattern,
                    &category,
                    &match_type,
                    vendor.as_deref(),
                    priority,
                )
                .map(|_| ()),
            }
        }
        Commands::Correct {
            transaction_id,
            category,
            actor,
        } => {
            let db = commands::open_db(&cli.db)?;
            let learner = CorrectionLearner::from_config(&config);
            commands::cmd_correct(&db, &learner, transaction_id, &category, &actor).map(|_| ())
        }
        Commands::Review { account, limit } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_review(&db, account.as_deref(), limit)
        }
        Commands::Serve {
            port,
            host,
            allowed_origins,
        } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_serve(db, &config, &host, port, allowed_origins).await
        }
    }
}
