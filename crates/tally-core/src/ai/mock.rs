//! Mock backend for testing
//!
//! Deterministic keyword table plus failing and slow variants, so the
//! fallback path can be exercised without a running model server.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::MerchantClassification;
use super::AIBackend;

/// Vendor keyword → category
const KEYWORDS: &[(&str, &str, &str)] = &[
    ("NETFLIX", "Netflix", "Subscriptions"),
    ("SPOTIFY", "Spotify", "Subscriptions"),
    ("AMAZON", "Amazon", "Shopping"),
    ("REWE", "REWE", "Groceries"),
    ("EDEKA", "EDEKA", "Groceries"),
    ("LIDL", "Lidl", "Groceries"),
    ("ALDI", "Aldi", "Groceries"),
    ("DEUTSCHE BAHN", "Deutsche Bahn", "Transport"),
    ("SHELL", "Shell", "Transport"),
    ("ARAL", "Aral", "Transport"),
    ("HOTEL", "Hotel", "Travel"),
    ("RESTAURANT", "Restaurant", "Dining"),
    ("VERSICHERUNG", "Versicherung", "Insurance"),
];

/// Look the vendor up in the keyword table; unknown vendors land in "Other"
pub fn keyword_classification(merchant: &str) -> MerchantClassification {
    let upper = merchant.to_uppercase();
    let (name, category) = KEYWORDS
        .iter()
        .find(|(keyword, _, _)| upper.contains(keyword))
        .map(|(_, name, category)| (name.to_string(), category.to_string()))
        .unwrap_or_else(|| (merchant.to_string(), "Other".to_string()));

    MerchantClassification {
        merchant: name,
        category,
    }
}

#[derive(Clone, Debug)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    /// Every classification fails when set
    pub failing: bool,
    /// Artificial latency per call
    pub delay: Option<Duration>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            failing: false,
            delay: None,
        }
    }

    /// A backend whose calls always fail, as if the service were unreachable
    pub fn failing() -> Self {
        Self {
            healthy: false,
            failing: true,
            delay: None,
        }
    }

    /// A backend that answers only after `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn classify_merchant(
        &self,
        merchant: &str,
        _categories: &[String],
    ) -> Result<MerchantClassification> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(Error::Classification("mock backend unavailable".into()));
        }

        Ok(keyword_classification(merchant))
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_table() {
        let mock = MockBackend::new();
        let result = mock.classify_merchant("REWE MARKT 123", &[]).await.unwrap();
        assert_eq!(result.category, "Groceries");

        let result = mock.classify_merchant("UNKNOWN GMBH", &[]).await.unwrap();
        assert_eq!(result.category, "Other");
        assert_eq!(result.merchant, "UNKNOWN GMBH");
    }

    #[tokio::test]
    async fn test_failing_variant() {
        let mock = MockBackend::failing();
        assert!(mock.classify_merchant("NETFLIX", &[]).await.is_err());
        assert!(!mock.health_check().await);
    }

    #[tokio::test]
    async fn test_slow_variant_waits() {
        let mock = MockBackend::slow(Duration::from_millis(50));
        let started = std::time::Instant::now();
        mock.classify_merchant("NETFLIX", &[]).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
