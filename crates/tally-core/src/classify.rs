//! Vendor classification
//!
//! Rules are matched in memory against both the raw and the normalized
//! vendor. Vendors no rule matches can be handed to the external classifier
//! ([`crate::ai`]); its answer is accepted only when it names a known
//! category, and any failure leaves the transaction for review.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::ai::{AIBackend, AIClient};
use crate::config::TallyConfig;
use crate::models::{Category, Confidence, MatchType, VendorRule};

/// Contains-rules at or below this priority are trusted like exact matches
pub const HIGH_CONFIDENCE_PRIORITY: i64 = 15;

/// Category decision for one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category_id: Option<i64>,
    pub confidence: Option<Confidence>,
    /// Rule that decided, if any
    pub rule_id: Option<i64>,
    /// Canonical vendor name from the matching rule
    pub vendor_override: Option<String>,
}

impl Classification {
    pub fn unclassified() -> Self {
        Self {
            category_id: None,
            confidence: None,
            rule_id: None,
            vendor_override: None,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.category_id.is_some()
    }

    /// No confident category: the row goes to the review queue
    pub fn needs_review(&self) -> bool {
        self.category_id.is_none()
    }
}

/// Confidence tier implied by a matching rule
pub fn rule_confidence(rule: &VendorRule) -> Confidence {
    match rule.match_type {
        MatchType::Exact => Confidence::High,
        MatchType::Contains if rule.priority <= HIGH_CONFIDENCE_PRIORITY => Confidence::High,
        MatchType::Contains | MatchType::Pattern => Confidence::Medium,
    }
}

/// Total order over rules: exact first, then lower priority, then longer
/// pattern, then lower id
pub fn rule_order(a: &VendorRule, b: &VendorRule) -> Ordering {
    let rank = |rule: &VendorRule| u8::from(rule.match_type != MatchType::Exact);
    rank(a)
        .cmp(&rank(b))
        .then(a.priority.cmp(&b.priority))
        .then(b.match_pattern.len().cmp(&a.match_pattern.len()))
        .then(a.id.cmp(&b.id))
}

/// A rule with its regex compiled once
struct CompiledRule {
    rule: VendorRule,
    pattern_upper: String,
    regex: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, raw_upper: &str, normalized_upper: &str) -> bool {
        match self.rule.match_type {
            MatchType::Exact => normalized_upper == self.pattern_upper,
            MatchType::Contains => {
                raw_upper.contains(&self.pattern_upper)
                    || normalized_upper.contains(&self.pattern_upper)
            }
            MatchType::Pattern => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(raw_upper) || re.is_match(normalized_upper)),
        }
    }
}

/// Active rules sorted by [`rule_order`]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Inactive rules are dropped; a pattern rule whose regex does not
    /// compile is skipped with a warning
    pub fn new(rules: Vec<VendorRule>) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .filter(|rule| rule.active)
            .filter_map(|rule| {
                let pattern = rule.match_pattern.trim();
                let regex = if rule.match_type == MatchType::Pattern {
                    match Regex::new(&format!("(?i){}", pattern)) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!("Skipping rule {}: invalid pattern: {}", rule.id, e);
                            return None;
                        }
                    }
                } else {
                    None
                };
                Some(CompiledRule {
                    pattern_upper: pattern.to_uppercase(),
                    regex,
                    rule,
                })
            })
            .collect();
        compiled.sort_by(|a, b| rule_order(&a.rule, &b.rule));
        Self { rules: compiled }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Best matching rule, if any
    pub fn match_rule(&self, raw_vendor: &str, normalized_vendor: &str) -> Option<&VendorRule> {
        self.matching_rules(raw_vendor, normalized_vendor).next()
    }

    /// Every matching rule, best first
    pub fn matching_rules<'a>(
        &'a self,
        raw_vendor: &str,
        normalized_vendor: &str,
    ) -> impl Iterator<Item = &'a VendorRule> + 'a {
        let raw_upper = raw_vendor.trim().to_uppercase();
        let normalized_upper = normalized_vendor.trim().to_uppercase();
        self.rules
            .iter()
            .filter(move |compiled| compiled.matches(&raw_upper, &normalized_upper))
            .map(|compiled| &compiled.rule)
    }

    /// Classify by rules alone
    pub fn classify(&self, raw_vendor: &str, normalized_vendor: &str) -> Classification {
        match self.match_rule(raw_vendor, normalized_vendor) {
            Some(rule) => Classification {
                category_id: Some(rule.category_id),
                confidence: Some(rule_confidence(rule)),
                rule_id: Some(rule.id),
                vendor_override: Some(rule.normalized_vendor.clone())
                    .filter(|vendor| !vendor.trim().is_empty()),
            },
            None => Classification::unclassified(),
        }
    }
}

/// Result of one external classification call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Classified { category_id: i64 },
    /// The collaborator answered with a category name we do not know
    Unrecognized(String),
    Failed(String),
    TimedOut,
}

impl FallbackOutcome {
    /// Classification to store; anything but a known category means review
    pub fn classification(&self) -> Classification {
        match self {
            Self::Classified { category_id } => Classification {
                category_id: Some(*category_id),
                confidence: Some(Confidence::Low),
                rule_id: None,
                vendor_override: None,
            },
            _ => Classification::unclassified(),
        }
    }
}

/// Limits for the external fallback
#[derive(Debug, Clone, Copy)]
pub struct FallbackLimits {
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl FallbackLimits {
    pub fn from_config(config: &TallyConfig) -> Self {
        Self {
            timeout: config.fallback_timeout,
            max_concurrent: config.max_concurrent_fallbacks.max(1),
        }
    }
}

impl Default for FallbackLimits {
    fn default() -> Self {
        Self::from_config(&TallyConfig::default())
    }
}

/// Ask the external classifier about each vendor
///
/// Calls run concurrently (bounded by `limits.max_concurrent`), each under
/// `limits.timeout`. Failures are logged and reported per vendor; they never
/// fail the caller.
pub async fn classify_fallback(
    ai: &AIClient,
    vendors: Vec<String>,
    categories: &[Category],
    limits: FallbackLimits,
) -> HashMap<String, FallbackOutcome> {
    let names: Arc<Vec<String>> = Arc::new(
        categories
            .iter()
            .filter(|c| !c.is_transfer)
            .map(|c| c.name.clone())
            .collect(),
    );
    let by_name: HashMap<String, i64> = categories
        .iter()
        .filter(|c| !c.is_transfer)
        .map(|c| (c.name.to_lowercase(), c.id))
        .collect();

    let semaphore = Arc::new(Semaphore::new(limits.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for vendor in vendors {
        let ai = ai.clone();
        let names = Arc::clone(&names);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (vendor, Err("fallback limiter closed".to_string()));
            };
            let result =
                tokio::time::timeout(limits.timeout, ai.classify_merchant(&vendor, &names)).await;
            let result = match result {
                Ok(Ok(classification)) => Ok(Some(classification.category)),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Ok(None),
            };
            (vendor, result)
        });
    }

    let mut outcomes = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (vendor, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Classification task aborted: {}", e);
                continue;
            }
        };

        let outcome = match result {
            Ok(Some(category)) => match by_name.get(&category.trim().to_lowercase()) {
                Some(&category_id) => {
                    debug!("Fallback classified '{}' as {}", vendor, category);
                    FallbackOutcome::Classified { category_id }
                }
                None => {
                    warn!(
                        "Fallback returned unknown category '{}' for '{}'",
                        category, vendor
                    );
                    FallbackOutcome::Unrecognized(category)
                }
            },
            Ok(None) => {
                warn!(
                    "Fallback timed out after {:?} for '{}'",
                    limits.timeout, vendor
                );
                FallbackOutcome::TimedOut
            }
            Err(message) => {
                warn!("Fallback failed for '{}': {}", vendor, message);
                FallbackOutcome::Failed(message)
            }
        };
        outcomes.insert(vendor, outcome);
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockBackend;
    use chrono::Utc;

    fn rule(id: i64, pattern: &str, match_type: MatchType, priority: i64) -> VendorRule {
        VendorRule {
            id,
            match_pattern: pattern.to_string(),
            match_type,
            normalized_vendor: String::new(),
            category_id: id * 10,
            priority,
            active: true,
            source: Default::default(),
            created_at: Utc::now(),
        }
    }

    fn categories() -> Vec<Category> {
        vec![
            Category {
                id: 1,
                name: "Groceries".into(),
                is_transfer: false,
            },
            Category {
                id: 2,
                name: "Subscriptions".into(),
                is_transfer: false,
            },
            Category {
                id: 3,
                name: "Transfer".into(),
                is_transfer: true,
            },
        ]
    }

    #[test]
    fn test_exact_outranks_priority() {
        let rules = RuleSet::new(vec![
            rule(1, "REWE", MatchType::Contains, 1),
            rule(2, "rewe", MatchType::Exact, 99),
        ]);
        assert_eq!(rules.match_rule("REWE SAGT DANKE", "REWE").unwrap().id, 2);
        // Exact only looks at the normalized vendor
        assert_eq!(rules.match_rule("REWE", "REWE CITY").unwrap().id, 1);
    }

    #[test]
    fn test_lower_priority_wins() {
        let rules = RuleSet::new(vec![
            rule(1, "AMAZON", MatchType::Contains, 50),
            rule(2, "AMAZON", MatchType::Contains, 20),
        ]);
        assert_eq!(rules.match_rule("", "AMAZON").unwrap().id, 2);
    }

    #[test]
    fn test_longer_pattern_breaks_ties() {
        let rules = RuleSet::new(vec![
            rule(1, "AMAZON", MatchType::Contains, 50),
            rule(2, "AMAZON PRIME", MatchType::Contains, 50),
            rule(3, "^AMAZON.*", MatchType::Pattern, 50),
        ]);
        assert_eq!(rules.match_rule("AMAZON PRIME VIDEO", "AMAZON").unwrap().id, 2);
        assert_eq!(rules.match_rule("AMAZON RETAIL", "AMAZON").unwrap().id, 3);
    }

    #[test]
    fn test_order_is_total() {
        let a = rule(1, "X", MatchType::Contains, 50);
        let b = rule(2, "X", MatchType::Pattern, 50);
        assert_eq!(rule_order(&a, &b), Ordering::Less);
        assert_eq!(rule_order(&b, &a), Ordering::Greater);
        assert_eq!(rule_order(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_matching_rules_ranked() {
        let rules = RuleSet::new(vec![
            rule(1, "SPOT", MatchType::Contains, 50),
            rule(2, "NETFLIX", MatchType::Contains, 1),
            rule(3, "SPOTIFY", MatchType::Exact, 90),
        ]);
        let ids: Vec<i64> = rules.matching_rules("SPOTIFY", "SPOTIFY").map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_contains_checks_raw_vendor() {
        let rules = RuleSet::new(vec![rule(1, "paypal", MatchType::Contains, 50)]);
        assert!(rules.match_rule("PAYPAL *Spotify", "SPOTIFY").is_some());
        assert!(rules.match_rule("Spotify", "SPOTIFY").is_none());
    }

    #[test]
    fn test_pattern_is_case_insensitive() {
        let rules = RuleSet::new(vec![rule(1, r"^db\s+(vertrieb|fernverkehr)", MatchType::Pattern, 50)]);
        assert!(rules.match_rule("DB Vertrieb GmbH", "DEUTSCHE BAHN").is_some());
    }

    #[test]
    fn test_invalid_and_inactive_rules_skipped() {
        let mut inactive = rule(2, "REWE", MatchType::Contains, 1);
        inactive.active = false;
        let rules = RuleSet::new(vec![rule(1, "([", MatchType::Pattern, 1), inactive]);
        assert!(rules.is_empty());
        assert!(rules.match_rule("REWE", "REWE").is_none());
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(rule_confidence(&rule(1, "X", MatchType::Exact, 90)), Confidence::High);
        assert_eq!(rule_confidence(&rule(1, "X", MatchType::Contains, 15)), Confidence::High);
        assert_eq!(rule_confidence(&rule(1, "X", MatchType::Contains, 16)), Confidence::Medium);
        assert_eq!(rule_confidence(&rule(1, "X", MatchType::Pattern, 1)), Confidence::Medium);
    }

    #[test]
    fn test_classify_uses_rule_vendor() {
        let mut netflix = rule(1, "NETFLIX", MatchType::Contains, 50);
        netflix.normalized_vendor = "Netflix".into();
        let rules = RuleSet::new(vec![netflix, rule(2, "REWE", MatchType::Contains, 50)]);

        let result = rules.classify("NETFLIX.COM 866-579", "NETFLIX.COM 866-579");
        assert_eq!(result.category_id, Some(10));
        assert_eq!(result.confidence, Some(Confidence::Medium));
        assert_eq!(result.vendor_override.as_deref(), Some("Netflix"));

        let result = rules.classify("REWE", "REWE");
        assert_eq!(result.vendor_override, None);

        let result = rules.classify("UNKNOWN", "UNKNOWN");
        assert!(result.needs_review());
        assert_eq!(result.confidence, None);
    }

    #[tokio::test]
    async fn test_fallback_maps_known_categories() {
        let ai = AIClient::mock();
        let outcomes = classify_fallback(
            &ai,
            vec!["REWE MARKT".into(), "NETFLIX".into(), "UNKNOWN GMBH".into()],
            &categories(),
            FallbackLimits::default(),
        )
        .await;

        assert_eq!(
            outcomes["REWE MARKT"],
            FallbackOutcome::Classified { category_id: 1 }
        );
        assert_eq!(
            outcomes["NETFLIX"].classification().confidence,
            Some(Confidence::Low)
        );
        // The mock answers "Other", which is not a known category
        assert_eq!(
            outcomes["UNKNOWN GMBH"],
            FallbackOutcome::Unrecognized("Other".into())
        );
        assert!(outcomes["UNKNOWN GMBH"].classification().needs_review());
    }

    #[tokio::test]
    async fn test_fallback_failure_degrades() {
        let ai = AIClient::Mock(MockBackend::failing());
        let outcomes = classify_fallback(
            &ai,
            vec!["REWE".into()],
            &categories(),
            FallbackLimits::default(),
        )
        .await;
        assert!(matches!(outcomes["REWE"], FallbackOutcome::Failed(_)));
        assert!(outcomes["REWE"].classification().needs_review());
    }

    #[tokio::test]
    async fn test_fallback_timeout() {
        let ai = AIClient::Mock(MockBackend::slow(Duration::from_secs(5)));
        let started = std::time::Instant::now();
        let outcomes = classify_fallback(
            &ai,
            vec!["REWE".into(), "EDEKA".into()],
            &categories(),
            FallbackLimits {
                timeout: Duration::from_millis(50),
                max_concurrent: 2,
            },
        )
        .await;
        assert_eq!(outcomes["REWE"], FallbackOutcome::TimedOut);
        assert_eq!(outcomes["EDEKA"], FallbackOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
