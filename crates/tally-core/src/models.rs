//! Domain models for Tally

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Open string-keyed map carried by drafts and statements
/// (reference numbers, foreign-currency amount/rate, transaction status, ...)
pub type Metadata = BTreeMap<String, String>;

/// Statement issuers with dedicated parsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Issuer {
    /// Current (giro) account at the bank
    Giro,
    /// Credit card issued by the same bank
    Card,
}

impl Issuer {
    pub const ALL: [Issuer; 2] = [Issuer::Giro, Issuer::Card];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Giro => "giro",
            Self::Card => "card",
        }
    }
}

impl std::str::FromStr for Issuer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "giro" | "girokonto" | "checking" => Ok(Self::Giro),
            "card" | "kreditkarte" | "credit" | "visa" => Ok(Self::Card),
            _ => Err(format!("Unknown issuer: {}", s)),
        }
    }
}

impl std::fmt::Display for Issuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a statement is serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Field-separated export (one record per row)
    Delimited,
    /// Extracted document text (one transaction may span several lines)
    FreeText,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delimited => "delimited",
            Self::FreeText => "free_text",
        }
    }
}

/// One of the four supported parser variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementFormat {
    pub issuer: Issuer,
    pub layout: Layout,
}

impl StatementFormat {
    pub fn new(issuer: Issuer, layout: Layout) -> Self {
        Self { issuer, layout }
    }
}

impl std::fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.issuer.as_str(), self.layout.as_str())
    }
}

/// Money direction; amounts themselves are never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Money leaving the account
    Debit,
    /// Money entering the account
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }

    /// Split a signed minor-unit amount into magnitude and direction
    pub fn split_signed(signed: i64) -> (i64, Direction) {
        if signed < 0 {
            (signed.saturating_abs(), Direction::Debit)
        } else {
            (signed, Direction::Credit)
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a category was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown confidence: {}", s)),
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transaction candidate produced by a statement parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftTransaction {
    pub date: NaiveDate,
    /// Minor units (cents), never negative
    pub amount: i64,
    pub direction: Direction,
    pub raw_vendor: String,
    /// Filled from `raw_vendor` by the orchestrator when a client omits it
    #[serde(default)]
    pub normalized_vendor: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_label: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A line or record that could not be parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-based line number in the source text
    pub line: usize,
    pub message: String,
    pub raw: String,
}

/// Parser output for one uploaded document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub transactions: Vec<DraftTransaction>,
    pub warnings: Vec<ParseWarning>,
    pub metadata: Metadata,
}

/// An account transactions are imported into
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub issuer: Issuer,
    pub created_at: DateTime<Utc>,
}

/// A category transactions are assigned to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// The dedicated category for linked internal transfers
    pub is_transfer: bool,
}

/// A persisted ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: i64,
    pub account_id: i64,
    pub import_job_id: Option<i64>,
    pub date: NaiveDate,
    pub amount: i64,
    pub direction: Direction,
    pub raw_vendor: String,
    pub normalized_vendor: String,
    pub description: String,
    pub type_label: Option<String>,
    pub metadata: Metadata,
    pub category_id: Option<i64>,
    pub confidence: Option<Confidence>,
    pub needs_review: bool,
    pub is_transfer: bool,
    pub is_reviewed: bool,
    pub transfer_group: Option<String>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Vendor rule match strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Case-insensitive equality against the normalized vendor
    Exact,
    /// Case-insensitive substring of the raw or normalized vendor
    Contains,
    /// Regular expression against the raw or normalized vendor
    Pattern,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Pattern => "pattern",
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "pattern" | "regex" => Ok(Self::Pattern),
            _ => Err(format!("Unknown match type: {}", s)),
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a vendor rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    #[default]
    Manual,
    /// Synthesized from repeated category corrections
    Learned,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Learned => "learned",
        }
    }
}

impl std::str::FromStr for RuleSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "learned" => Ok(Self::Learned),
            _ => Err(format!("Unknown rule source: {}", s)),
        }
    }
}

/// A vendor → category rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorRule {
    pub id: i64,
    pub match_pattern: String,
    pub match_type: MatchType,
    /// Canonical vendor name stored on matching transactions
    pub normalized_vendor: String,
    pub category_id: i64,
    /// Lower wins
    pub priority: i64,
    pub active: bool,
    pub source: RuleSource,
    pub created_at: DateTime<Utc>,
}

/// A rule to be inserted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVendorRule {
    pub match_pattern: String,
    pub match_type: MatchType,
    #[serde(default)]
    pub normalized_vendor: String,
    pub category_id: i64,
    #[serde(default = "default_rule_priority")]
    pub priority: i64,
    #[serde(default)]
    pub source: RuleSource,
}

fn default_rule_priority() -> i64 {
    50
}

/// Append-only audit record of a manual category change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryOverride {
    pub id: i64,
    pub transaction_id: i64,
    pub old_category_id: Option<i64>,
    pub new_category_id: i64,
    /// Vendor of the transaction at the time of the change
    pub normalized_vendor: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// Import job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    #[default]
    Received,
    Parsing,
    Importing,
    Completed,
    Failed,
    RolledBack,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Parsing => "parsing",
            Self::Importing => "importing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Whether rows can still be imported under this job
    pub fn accepts_rows(&self) -> bool {
        matches!(self, Self::Received | Self::Parsing | Self::Failed)
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "received" => Ok(Self::Received),
            "parsing" => Ok(Self::Parsing),
            "importing" => Ok(Self::Importing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            _ => Err(format!("Unknown import status: {}", s)),
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate counts of one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    #[serde(rename = "total")]
    pub total_seen: i64,
    pub inserted: i64,
    pub duplicates: i64,
    pub classified: i64,
    pub transfers: i64,
}

/// One uploaded statement and the batch of transactions it produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: i64,
    pub account_id: i64,
    pub filename: Option<String>,
    /// SHA-256 over the uploaded bytes
    pub file_fingerprint: Option<String>,
    pub format: Option<String>,
    pub status: ImportStatus,
    pub counts: ImportCounts,
    pub warnings: Vec<ParseWarning>,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
