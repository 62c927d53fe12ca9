//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Missing, empty or otherwise unusable upload
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// No parser signature matched and no issuer hint was given
    #[error("Unrecognized statement format (expected issuer hint: {hint})")]
    UnrecognizedFormat { hint: String },

    /// The document could not be turned into text
    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Classification fallback failed: {0}")]
    Classification(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Coarse grouping used by callers to decide how to report an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before anything is persisted; the caller should fix the request
    Input,
    /// An external step (text extraction, classification service) failed
    Upstream,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedInput(_)
            | Error::UnsupportedFileType(_)
            | Error::UnrecognizedFormat { .. }
            | Error::InvalidData(_) => ErrorKind::Input,
            Error::Extraction(_) | Error::Classification(_) | Error::Http(_) => {
                ErrorKind::Upstream
            }
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Upstream
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
