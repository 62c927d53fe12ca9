//! Format routing
//!
//! Content signatures decide first. Without a signature match an issuer hint
//! is required; the layout is then guessed from the filename or the presence
//! of a field separator, defaulting to free text.

use tracing::debug;

use super::{card, giro, parse_statement};
use crate::error::{Error, Result};
use crate::models::{Issuer, Layout, ParsedStatement, StatementFormat};
use crate::normalize::Normalizer;

/// Lines inspected when guessing whether unsigned content is delimited
const SEPARATOR_PROBE_LINES: usize = 20;

/// Pick the parser for `text`
pub fn detect_format(
    text: &str,
    filename: Option<&str>,
    hint: Option<Issuer>,
) -> Result<StatementFormat> {
    if let Some(format) = match_signature(text) {
        if hint.is_some_and(|h| h != format.issuer) {
            debug!(
                "Signature says {} but caller hinted {:?}; using signature",
                format, hint
            );
        }
        return Ok(format);
    }

    let Some(issuer) = hint else {
        return Err(Error::UnrecognizedFormat {
            hint: Issuer::ALL
                .iter()
                .map(Issuer::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        });
    };

    let layout = if looks_delimited(text, filename) {
        Layout::Delimited
    } else {
        Layout::FreeText
    };
    debug!("No signature matched; {} by hint", layout.as_str());
    Ok(StatementFormat::new(issuer, layout))
}

/// Detect the format and parse in one step
pub fn parse_document(
    text: &str,
    filename: Option<&str>,
    hint: Option<Issuer>,
    normalizer: &Normalizer,
) -> Result<(StatementFormat, ParsedStatement)> {
    let format = detect_format(text, filename, hint)?;
    Ok((format, parse_statement(text, format, normalizer)))
}

fn match_signature(text: &str) -> Option<StatementFormat> {
    if card::matches_delimited(text) {
        Some(StatementFormat::new(Issuer::Card, Layout::Delimited))
    } else if giro::matches_delimited(text) {
        Some(StatementFormat::new(Issuer::Giro, Layout::Delimited))
    } else if giro::matches_free_text(text) {
        Some(StatementFormat::new(Issuer::Giro, Layout::FreeText))
    } else if card::matches_free_text(text) {
        Some(StatementFormat::new(Issuer::Card, Layout::FreeText))
    } else {
        None
    }
}

fn looks_delimited(text: &str, filename: Option<&str>) -> bool {
    let csv_name = filename.is_some_and(|name| name.to_lowercase().ends_with(".csv"));
    csv_name
        || text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(SEPARATOR_PROBE_LINES)
            .any(|line| line.contains(';'))
}
