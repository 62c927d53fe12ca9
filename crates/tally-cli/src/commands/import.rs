//! Statement parse, import and rollback command implementations

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{
    extract::extract_text,
    models::{Issuer, ParsedStatement},
    parse_document, AIClient, Database, ImportOrchestrator, Normalizer, TallyConfig,
    TransactionFilter,
};

use super::{format_amount, resolve_account, truncate};

fn parse_issuer(issuer: Option<&str>) -> Result<Option<Issuer>> {
    issuer
        .map(|s| s.parse::<Issuer>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()
}

fn read_statement(file: &Path) -> Result<(String, Vec<u8>)> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "statement".to_string());
    Ok((filename, bytes))
}

fn print_statement(statement: &ParsedStatement) {
    for (key, value) in &statement.metadata {
        println!("   {}: {}", key, value);
    }
    println!();
    for draft in &statement.transactions {
        println!(
            "   {} │ {:>12} │ {}",
            draft.date,
            format_amount(draft.amount, draft.direction),
            truncate(&draft.normalized_vendor, 40)
        );
    }
    if !statement.warnings.is_empty() {
        println!();
        println!("   ⚠️  {} line(s) could not be read:", statement.warnings.len());
        for warning in &statement.warnings {
            println!(
                "      line {}: {} ({})",
                warning.line,
                warning.message,
                truncate(&warning.raw, 50)
            );
        }
    }
}

/// Parse a statement and print the drafts; nothing is stored
pub fn cmd_parse(
    config: &TallyConfig,
    file: &Path,
    issuer: Option<&str>,
    json: bool,
) -> Result<ParsedStatement> {
    let hint = parse_issuer(issuer)?;
    let (filename, bytes) = read_statement(file)?;

    let text = extract_text(&filename, &bytes)?;
    let normalizer = Normalizer::from_config(config);
    let (format, statement) = parse_document(&text, Some(&filename), hint, &normalizer)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statement)?);
    } else {
        println!(
            "📄 {} ({}): {} transactions",
            file.display(),
            format,
            statement.transactions.len()
        );
        print_statement(&statement);
    }

    Ok(statement)
}

/// Import a statement into the named account, creating it on first use
pub async fn cmd_import(
    db: &Database,
    config: &TallyConfig,
    file: &Path,
    account_name: &str,
    issuer: Option<&str>,
) -> Result<()> {
    let hint = parse_issuer(issuer)?;
    let (filename, bytes) = read_statement(file)?;

    let account_id = match db.get_account_by_name(account_name)? {
        Some(account) => account.id,
        None => {
            // New accounts take the issuer of the statement
            let text = extract_text(&filename, &bytes)?;
            let format = tally_core::detect_format(&text, Some(&filename), hint)?;
            let id = db.upsert_account(account_name, format.issuer)?;
            println!("   Created account '{}' ({})", account_name, format.issuer);
            id
        }
    };

    let ai = AIClient::from_env();
    if ai.is_none() {
        println!("   💡 Tip: Set OLLAMA_HOST to classify vendors no rule matches");
    }

    println!("📥 Importing {} into '{}'...", file.display(), account_name);

    let orchestrator = ImportOrchestrator::new(db.clone(), ai, config);
    let (upload, counts) = orchestrator
        .import_file(account_id, &filename, &bytes, hint)
        .await?;

    if let Some(previous) = upload.previous_import {
        println!(
            "   ⚠️  Same file was already imported as job {}; existing rows count as duplicates",
            previous
        );
    }

    println!("✅ Import complete! (job {}, {})", upload.import_job_id, upload.format);
    println!("   Seen: {}", counts.total_seen);
    println!("   Imported: {}", counts.inserted);
    println!("   Skipped (duplicates): {}", counts.duplicates);
    println!("   Classified: {}", counts.classified);
    println!("   Transfers linked: {}", counts.transfers);
    if !upload.statement.warnings.is_empty() {
        println!(
            "   ⚠️  {} line(s) could not be read (see 'tally parse')",
            upload.statement.warnings.len()
        );
    }

    let review = db
        .list_transactions(
            &TransactionFilter::new()
                .import_job_id(Some(upload.import_job_id))
                .needs_review(Some(true)),
        )?
        .len();
    if review > 0 {
        println!();
        println!("   {} transaction(s) need review: tally review", review);
    }

    Ok(())
}

pub fn cmd_imports(db: &Database, account: Option<&str>, limit: i64) -> Result<()> {
    let account_id = account
        .map(|name| resolve_account(db, name).map(|a| a.id))
        .transpose()?;
    let jobs = db.list_import_jobs(account_id, limit)?;

    if jobs.is_empty() {
        println!("No imports yet.");
        return Ok(());
    }

    println!();
    println!("📦 Imports");
    println!("   ─────────────────────────────────────────────────────────────");
    for job in jobs {
        println!(
            "   [{}] {} │ {:<11} │ {} new, {} dup │ {}",
            job.id,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.status.as_str(),
            job.counts.inserted,
            job.counts.duplicates,
            truncate(job.filename.as_deref().unwrap_or("-"), 30)
        );
        for error in &job.errors {
            println!("        ❌ {}", error);
        }
    }

    Ok(())
}

pub fn cmd_rollback(db: &Database, job_id: i64) -> Result<()> {
    let summary = db.rollback_import(job_id)?;

    println!("↩️  Rolled back import {}", job_id);
    println!("   Deleted: {} transactions", summary.deleted);
    if summary.unlinked > 0 {
        println!(
            "   Unlinked: {} transfer partner(s), now waiting for review",
            summary.unlinked
        );
    }

    Ok(())
}
