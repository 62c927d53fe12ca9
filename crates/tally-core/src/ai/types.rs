//! Classification fallback response types

use serde::{Deserialize, Serialize};

/// Reply of the external classifier for one vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantClassification {
    /// Cleaned merchant name as the model sees it (e.g., "Netflix" from "NETFLIX.COM*1234")
    #[serde(default)]
    pub merchant: String,
    /// Category name; only used when it matches a known category
    pub category: String,
}
