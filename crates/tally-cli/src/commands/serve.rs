//! Server command implementation

use anyhow::{Context, Result};
use tally_core::{Database, TallyConfig};

pub async fn cmd_serve(
    db: Database,
    config: &TallyConfig,
    host: &str,
    port: u16,
    allowed_origins: Vec<String>,
) -> Result<()> {
    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db.path());
    println!("   Listening: http://{}:{}", host, port);
    if !allowed_origins.is_empty() {
        println!("   CORS origins: {}", allowed_origins.join(", "));
    }
    println!();
    println!("   Press Ctrl+C to stop");

    // Idempotent; a fresh database gets its categories
    db.seed_categories(&config.seed_categories, &config.transfer_category)
        .context("Failed to seed categories")?;

    let server_config = tally_server::ServerConfig { allowed_origins };
    tally_server::serve(db, config, host, port, server_config).await?;

    Ok(())
}
