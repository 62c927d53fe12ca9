//! Vendor rule command implementations

use anyhow::Result;
use tally_core::models::{MatchType, NewVendorRule, RuleSource};
use tally_core::Database;

use super::{resolve_category, truncate};

pub fn cmd_rules_list(db: &Database) -> Result<()> {
    let rules = db.list_rules()?;

    if rules.is_empty() {
        println!("No rules yet. Add one with:");
        println!("  tally rules add REWE Groceries");
        return Ok(());
    }

    let categories = db.list_categories()?;

    println!();
    println!("📏 Vendor Rules");
    println!("   ─────────────────────────────────────────────────────────────");
    for rule in rules {
        let category = categories
            .iter()
            .find(|c| c.id == rule.category_id)
            .map(|c| c.name.as_str())
            .unwrap_or("?");
        let marker = if rule.active { " " } else { "✗" };
        println!(
            "  {}[{}] p{:<3} {:<8} {:<30} → {} ({})",
            marker,
            rule.id,
            rule.priority,
            rule.match_type.as_str(),
            truncate(&rule.match_pattern, 30),
            category,
            rule.source.as_str()
        );
    }

    Ok(())
}

pub fn cmd_rules_add(
    db: &Database,
    pattern: &str,
    category: &str,
    match_type: &str,
    vendor: Option<&str>,
    priority: i64,
) -> Result<i64> {
    let match_type: MatchType = match_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let category = resolve_category(db, category)?;

    let id = db.create_rule(&NewVendorRule {
        match_pattern: pattern.to_string(),
        match_type,
        normalized_vendor: vendor.unwrap_or_default().to_string(),
        category_id: category.id,
        priority,
        source: RuleSource::Manual,
    })?;

    println!(
        "✅ Rule {} added: {} '{}' → {}",
        id, match_type, pattern, category.name
    );
    Ok(id)
}
