//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init, accounts and shared utilities (open_db, load_config)
//! - `import` - Statement parsing, import, import history and rollback
//! - `rules` - Vendor rule store commands
//! - `serve` - Web server command
//! - `transactions` - Review queue and category corrections

pub mod core;
pub mod import;
pub mod rules;
pub mod serve;
pub mod transactions;

// Re-export command functions for main.rs
pub use core::*;
pub use import::*;
pub use rules::*;
pub use serve::*;
pub use transactions::*;

use anyhow::{Context, Result};
use tally_core::models::{Account, Category, Direction};
use tally_core::Database;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format a minor-unit amount with its sign, red for debits and green for credits
pub fn format_amount(amount: i64, direction: Direction) -> String {
    let value = format!("{}.{:02}", amount / 100, amount % 100);
    match direction {
        Direction::Debit => format!("\x1b[31m-{}\x1b[0m", value),
        Direction::Credit => format!("\x1b[32m+{}\x1b[0m", value),
    }
}

/// Resolve a category given by ID or by name
pub fn resolve_category(db: &Database, category: &str) -> Result<Category> {
    let found = match category.trim().parse::<i64>() {
        Ok(id) => db.get_category(id)?,
        Err(_) => db.get_category_by_name(category.trim())?,
    };
    found.with_context(|| format!("Category not found: {}", category))
}

/// Resolve an account given by name
pub fn resolve_account(db: &Database, name: &str) -> Result<Account> {
    db.get_account_by_name(name)?
        .with_context(|| format!("Account not found: {}", name))
}
