//! Review queue and category correction commands

use anyhow::Result;
use tally_core::{
    correct_category, CorrectionLearner, CorrectionOutcome, Database, LearnOutcome,
    TransactionFilter,
};

use super::{format_amount, resolve_account, resolve_category, truncate};

pub fn cmd_review(db: &Database, account: Option<&str>, limit: i64) -> Result<()> {
    let account_id = account
        .map(|name| resolve_account(db, name).map(|a| a.id))
        .transpose()?;
    let filter = TransactionFilter::new()
        .account_id(account_id)
        .needs_review(Some(true))
        .limit(Some(limit));
    let transactions = db.list_transactions(&filter)?;

    if transactions.is_empty() {
        println!("✅ Nothing to review.");
        return Ok(());
    }

    println!();
    println!("🔎 Needs Review");
    println!("   ─────────────────────────────────────────────────────────────");
    for tx in transactions {
        println!(
            "   [{}] {} │ {:>12} │ {}",
            tx.id,
            tx.date,
            format_amount(tx.amount, tx.direction),
            truncate(&tx.normalized_vendor, 40)
        );
    }
    println!();
    println!("   Use 'tally correct <id> <category>' to categorize a transaction.");

    Ok(())
}

pub fn cmd_correct(
    db: &Database,
    learner: &CorrectionLearner,
    transaction_id: i64,
    category: &str,
    actor: &str,
) -> Result<CorrectionOutcome> {
    let category = resolve_category(db, category)?;
    let outcome = correct_category(db, learner, transaction_id, category.id, actor)?;

    println!(
        "✅ Transaction {} ({}) → {}",
        transaction_id, outcome.recorded.normalized_vendor, category.name
    );
    match &outcome.learned {
        Some(LearnOutcome::RuleCreated {
            rule_id,
            reclassified,
            retired,
        }) => {
            print_retired(retired);
            println!(
                "   📏 Learned rule {}; {} other transaction(s) reclassified",
                rule_id, reclassified
            );
        }
        Some(LearnOutcome::ConflictsRetired {
            rule_id,
            retired,
            reclassified,
        }) => {
            print_retired(retired);
            println!(
                "   📏 Rule {} now applies; {} other transaction(s) reclassified",
                rule_id, reclassified
            );
        }
        Some(LearnOutcome::NotEnoughEvidence { count }) => {
            println!(
                "   {} of {} correction(s) needed before a rule is learned",
                count,
                learner.threshold()
            );
        }
        Some(LearnOutcome::AlreadyCovered { rule_id }) => {
            println!("   Already covered by rule {}", rule_id);
        }
        Some(LearnOutcome::Skipped) => {}
        None => println!("   ⚠️  Rule learning failed; the correction is recorded"),
    }

    Ok(outcome)
}

fn print_retired(retired: &[i64]) {
    for rule_id in retired {
        println!("   Deactivated conflicting rule {}", rule_id);
    }
}
