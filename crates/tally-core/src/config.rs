//! Pipeline configuration
//!
//! Loaded from TOML. The embedded default (`config/tally.toml`) is used unless
//! an override file exists, either passed explicitly, via `TALLY_CONFIG`, or at
//! the platform config directory (`~/.config/tally/tally.toml` on Linux).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("../../../config/tally.toml");

/// Resolved configuration for the ingestion pipeline
#[derive(Debug, Clone)]
pub struct TallyConfig {
    /// Per-call timeout for the classification fallback
    pub fallback_timeout: Duration,
    pub max_concurrent_fallbacks: usize,
    /// Overrides of one vendor to one category needed before a rule is learned
    pub learner_threshold: i64,
    pub learned_rule_priority: i64,
    pub transfer_category: String,
    pub seed_categories: Vec<String>,
    pub extra_processor_prefixes: Vec<String>,
    /// (pattern, canonical) pairs appended to the built-in alias table
    pub extra_aliases: Vec<(String, String)>,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            fallback_timeout: Duration::from_secs(10),
            max_concurrent_fallbacks: 4,
            learner_threshold: 2,
            learned_rule_priority: 10,
            transfer_category: "Transfer".to_string(),
            seed_categories: Vec::new(),
            extra_processor_prefixes: Vec::new(),
            extra_aliases: Vec::new(),
        }
    }
}

impl TallyConfig {
    /// Load from `TALLY_CONFIG`, the platform config directory, or the embedded default
    pub fn load() -> Result<Self> {
        let override_path = std::env::var("TALLY_CONFIG").ok().map(PathBuf::from);
        load_config(override_path.as_deref())
    }

    /// Load from an explicit file, falling back to the embedded default if it is missing
    pub fn from_path(path: &Path) -> Result<Self> {
        load_config(Some(path))
    }

    /// Parse TOML content on top of the defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        parse_config(content)
    }

    /// The embedded default configuration
    pub fn embedded() -> Self {
        parse_config(DEFAULT_CONFIG).unwrap_or_default()
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tally").join("tally.toml"))
}

fn load_config(override_path: Option<&Path>) -> Result<TallyConfig> {
    let candidate = override_path
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .filter(|p| p.exists());

    let content = match candidate {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", path.display(), e))
            })?
        }
        None => DEFAULT_CONFIG.to_string(),
    };

    parse_config(&content)
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    classifier: Option<RawClassifier>,
    learner: Option<RawLearner>,
    categories: Option<RawCategories>,
    normalizer: Option<RawNormalizer>,
}

#[derive(Debug, Deserialize)]
struct RawClassifier {
    fallback_timeout_secs: Option<u64>,
    max_concurrent_fallbacks: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawLearner {
    threshold: Option<i64>,
    rule_priority: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawCategories {
    transfer: Option<String>,
    seed: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawNormalizer {
    processor_prefixes: Option<Vec<String>>,
    aliases: Option<Vec<RawAlias>>,
}

#[derive(Debug, Deserialize)]
struct RawAlias {
    pattern: String,
    canonical: String,
}

fn parse_config(content: &str) -> Result<TallyConfig> {
    let raw: RawConfig = toml::from_str(content)?;
    let mut config = TallyConfig::default();

    if let Some(classifier) = raw.classifier {
        if let Some(secs) = classifier.fallback_timeout_secs {
            config.fallback_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = classifier.max_concurrent_fallbacks {
            config.max_concurrent_fallbacks = max.max(1);
        }
    }

    if let Some(learner) = raw.learner {
        if let Some(threshold) = learner.threshold {
            if threshold < 1 {
                return Err(Error::Config(
                    "learner.threshold must be at least 1".to_string(),
                ));
            }
            config.learner_threshold = threshold;
        }
        if let Some(priority) = learner.rule_priority {
            config.learned_rule_priority = priority;
        }
    }

    if let Some(categories) = raw.categories {
        if let Some(transfer) = categories.transfer {
            config.transfer_category = transfer;
        }
        if let Some(seed) = categories.seed {
            config.seed_categories = seed;
        }
    }

    if let Some(normalizer) = raw.normalizer {
        if let Some(prefixes) = normalizer.processor_prefixes {
            config.extra_processor_prefixes = prefixes;
        }
        if let Some(aliases) = normalizer.aliases {
            config.extra_aliases = aliases
                .into_iter()
                .map(|a| (a.pattern, a.canonical))
                .collect();
        }
    }

    Ok(config)
}
