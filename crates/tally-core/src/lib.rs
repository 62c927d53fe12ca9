//! Tally Core Library
//!
//! Shared functionality for the Tally statement ingestion pipeline:
//! - Text extraction and format detection for giro and card statements
//! - Statement parsers (delimited exports and free-text PDF statements)
//! - Normalization of amounts, dates and vendor names
//! - Duplicate detection by content fingerprint
//! - Rule-based classification with a local AI fallback
//! - Transfer pairing across accounts
//! - Import jobs with atomic commit and rollback
//! - Rule learning from manual category corrections

pub mod ai;
pub mod classify;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod learn;
pub mod models;
pub mod normalize;
pub mod parsers;
pub mod pipeline;
pub mod transfer;

/// Test utilities including mock Ollama server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIBackend, AIClient, MerchantClassification, MockBackend, OllamaBackend};
pub use classify::{Classification, FallbackLimits, FallbackOutcome, RuleSet};
pub use config::TallyConfig;
pub use db::{Database, RollbackSummary, TransactionFilter};
pub use error::{Error, ErrorKind, Result};
pub use learn::{correct_category, CorrectionLearner, CorrectionOutcome, LearnOutcome, LearningStore};
pub use normalize::Normalizer;
pub use parsers::{detect_format, parse_document};
pub use pipeline::{ImportOrchestrator, UploadOutcome};
