//! Learning rules from category corrections
//!
//! Every manual category change is recorded as a [`CategoryOverride`] and then
//! handed to [`CorrectionLearner::on_override`]. Once the same vendor has been
//! moved to the same category often enough, a high-priority contains rule is
//! synthesized and applied to the transactions nobody has reviewed yet.
//! Exact rules sending the vendor elsewhere are deactivated; when a broader
//! rule would still win, the learned rule is an exact one instead.
//!
//! The learner talks to storage through [`LearningStore`], so the logic can be
//! tested without a database.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::RuleSet;
use crate::config::TallyConfig;
use crate::db::Database;
use crate::error::Result;
use crate::models::{
    CategoryOverride, Confidence, MatchType, NewVendorRule, RuleSource, StoredTransaction,
    VendorRule,
};

/// Storage the learner needs
pub trait LearningStore {
    /// Overrides moving `vendor` to `category_id`, including the current one
    fn count_overrides(&self, vendor: &str, category_id: i64) -> Result<i64>;

    fn active_rules(&self) -> Result<Vec<VendorRule>>;

    fn create_rule(&self, rule: &NewVendorRule) -> Result<i64>;

    fn deactivate_rule(&self, id: i64) -> Result<()>;

    /// Transactions a new rule may still re-categorize
    fn unreviewed_transactions(&self) -> Result<Vec<StoredTransaction>>;

    /// Set category and confidence on the given rows; returns rows changed
    fn apply_category(
        &self,
        ids: &[i64],
        category_id: i64,
        confidence: Confidence,
    ) -> Result<usize>;
}

impl LearningStore for Database {
    fn count_overrides(&self, vendor: &str, category_id: i64) -> Result<i64> {
        Database::count_overrides(self, vendor, category_id)
    }

    fn active_rules(&self) -> Result<Vec<VendorRule>> {
        self.list_active_rules()
    }

    fn create_rule(&self, rule: &NewVendorRule) -> Result<i64> {
        Database::create_rule(self, rule)
    }

    fn deactivate_rule(&self, id: i64) -> Result<()> {
        self.set_rule_active(id, false)?;
        Ok(())
    }

    fn unreviewed_transactions(&self) -> Result<Vec<StoredTransaction>> {
        self.list_unreviewed_transactions()
    }

    fn apply_category(
        &self,
        ids: &[i64],
        category_id: i64,
        confidence: Confidence,
    ) -> Result<usize> {
        self.apply_rule_category(ids, category_id, confidence)
    }
}

/// What the learner did with one override
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LearnOutcome {
    /// Below the threshold
    NotEnoughEvidence { count: i64 },
    /// The winning active rule already maps the vendor to the category
    AlreadyCovered { rule_id: i64 },
    /// Conflicting exact rules were deactivated so an existing rule wins
    ConflictsRetired {
        rule_id: i64,
        retired: Vec<i64>,
        reclassified: usize,
    },
    RuleCreated {
        rule_id: i64,
        reclassified: usize,
        /// Conflicting exact rules deactivated first
        retired: Vec<i64>,
    },
    /// Nothing to learn from (no vendor text)
    Skipped,
}

/// Synthesizes rules from repeated corrections
#[derive(Debug, Clone)]
pub struct CorrectionLearner {
    threshold: i64,
    rule_priority: i64,
}

impl Default for CorrectionLearner {
    fn default() -> Self {
        Self::from_config(&TallyConfig::default())
    }
}

impl CorrectionLearner {
    pub fn new(threshold: i64, rule_priority: i64) -> Self {
        Self {
            threshold: threshold.max(1),
            rule_priority,
        }
    }

    pub fn from_config(config: &TallyConfig) -> Self {
        Self::new(config.learner_threshold, config.learned_rule_priority)
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Handle a freshly recorded override
    pub fn on_override<S: LearningStore>(
        &self,
        store: &S,
        recorded: &CategoryOverride,
    ) -> Result<LearnOutcome> {
        let vendor = recorded.normalized_vendor.trim();
        if vendor.is_empty() {
            return Ok(LearnOutcome::Skipped);
        }
        let category_id = recorded.new_category_id;

        let count = store.count_overrides(vendor, category_id)?;
        if count < self.threshold {
            debug!(
                "{} override(s) of '{}' to category {}; need {}",
                count, vendor, category_id, self.threshold
            );
            return Ok(LearnOutcome::NotEnoughEvidence { count });
        }

        let rules = RuleSet::new(store.active_rules()?);
        let matching: Vec<&VendorRule> = rules.matching_rules(vendor, vendor).collect();
        if let Some(winner) = matching.first() {
            if winner.category_id == category_id {
                return Ok(LearnOutcome::AlreadyCovered { rule_id: winner.id });
            }
        }

        // Exact rules only ever match this vendor; the corrections overrule them
        let retired: Vec<i64> = matching
            .iter()
            .filter(|rule| rule.match_type == MatchType::Exact && rule.category_id != category_id)
            .map(|rule| rule.id)
            .collect();
        for &rule_id in &retired {
            store.deactivate_rule(rule_id)?;
            info!(
                "Deactivated rule {}: '{}' was corrected to category {}",
                rule_id, vendor, category_id
            );
        }
        let remaining: Vec<&VendorRule> = matching
            .into_iter()
            .filter(|rule| !retired.contains(&rule.id))
            .collect();

        if let Some(winner) = remaining.first() {
            if winner.category_id == category_id {
                let rule = (*winner).clone();
                let reclassified = self.reapply(store, &rule)?;
                return Ok(LearnOutcome::ConflictsRetired {
                    rule_id: rule.id,
                    retired,
                    reclassified,
                });
            }
        }

        // A broader rule for another category would still win over a contains rule
        let match_type = if remaining.is_empty() {
            MatchType::Contains
        } else {
            MatchType::Exact
        };
        let new_rule = NewVendorRule {
            match_pattern: vendor.to_string(),
            match_type,
            normalized_vendor: String::new(),
            category_id,
            priority: self.rule_priority,
            source: RuleSource::Learned,
        };
        let rule_id = store.create_rule(&new_rule)?;
        info!(
            "Learned {} rule {} after {} corrections: '{}' -> category {}",
            match_type.as_str(),
            rule_id,
            count,
            vendor,
            category_id
        );

        let rule = VendorRule {
            id: rule_id,
            match_pattern: new_rule.match_pattern,
            match_type: new_rule.match_type,
            normalized_vendor: new_rule.normalized_vendor,
            category_id,
            priority: new_rule.priority,
            active: true,
            source: new_rule.source,
            created_at: chrono::Utc::now(),
        };
        let reclassified = self.reapply(store, &rule)?;
        Ok(LearnOutcome::RuleCreated {
            rule_id,
            reclassified,
            retired,
        })
    }

    /// Apply the winning rule to every unreviewed transaction it matches
    fn reapply<S: LearningStore>(&self, store: &S, rule: &VendorRule) -> Result<usize> {
        let rule_id = rule.id;
        let matcher = RuleSet::new(vec![rule.clone()]);

        let ids: Vec<i64> = store
            .unreviewed_transactions()?
            .into_iter()
            .filter(|tx| {
                tx.category_id != Some(rule.category_id) || tx.confidence != Some(Confidence::High)
            })
            .filter(|tx| {
                matcher
                    .match_rule(&tx.raw_vendor, &tx.normalized_vendor)
                    .is_some()
            })
            .map(|tx| tx.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let updated = store.apply_category(&ids, rule.category_id, Confidence::High)?;
        info!("Rule {} reclassified {} unreviewed transactions", rule_id, updated);
        Ok(updated)
    }
}

/// A recorded correction and what the learner made of it
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionOutcome {
    #[serde(rename = "override")]
    pub recorded: CategoryOverride,
    /// None when the learner failed; the override stays recorded
    pub learned: Option<LearnOutcome>,
}

/// Record a manual category change and run the learner hook
pub fn correct_category(
    db: &Database,
    learner: &CorrectionLearner,
    transaction_id: i64,
    category_id: i64,
    actor: &str,
) -> Result<CorrectionOutcome> {
    let recorded = db.record_category_override(transaction_id, category_id, actor)?;

    let learned = match learner.on_override(db, &recorded) {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("Learning from override {} failed: {}", recorded.id, e);
            None
        }
    };

    Ok(CorrectionOutcome { recorded, learned })
}
