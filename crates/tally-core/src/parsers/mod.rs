//! Statement parsers
//!
//! Two issuers, each exported either as a delimited file or as a document whose
//! extracted text is parsed line by line. Every parser returns a
//! [`ParsedStatement`]; lines that cannot be read become warnings instead of
//! failing the document.

pub mod card;
mod delimited;
mod freetext;
pub mod giro;
mod router;

use std::sync::OnceLock;

use regex::Regex;

pub use router::{detect_format, parse_document};

use crate::models::{Issuer, Layout, Metadata, ParseWarning, ParsedStatement, StatementFormat};
use crate::normalize::{parse_date, Normalizer};

/// Parse text with a known format and fill in normalized vendors
pub fn parse_statement(
    text: &str,
    format: StatementFormat,
    normalizer: &Normalizer,
) -> ParsedStatement {
    let mut statement = match (format.issuer, format.layout) {
        (Issuer::Giro, Layout::Delimited) => giro::parse_delimited(text),
        (Issuer::Giro, Layout::FreeText) => giro::parse_free_text(text),
        (Issuer::Card, Layout::Delimited) => card::parse_delimited(text),
        (Issuer::Card, Layout::FreeText) => card::parse_free_text(text),
    };

    for draft in &mut statement.transactions {
        draft.normalized_vendor = normalizer.normalize_vendor(&draft.raw_vendor);
    }

    statement
        .metadata
        .insert("issuer".into(), format.issuer.as_str().into());
    statement
        .metadata
        .insert("layout".into(), format.layout.as_str().into());

    statement
}

/// Document-level warning (line 0) when a delimited export has no header row
pub(crate) fn note_missing_header(statement: &mut ParsedStatement, header_found: bool) {
    if !header_found {
        statement.warnings.push(ParseWarning {
            line: 0,
            message: "No header row found".to_string(),
            raw: String::new(),
        });
    }
}

fn period_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2}\.\d{1,2}\.\d{2,4})\s*(?:-|bis)\s*(\d{1,2}\.\d{1,2}\.\d{2,4})")
            .expect("period regex")
    })
}

/// Record the first `date - date` / `date bis date` range as the statement period
pub(crate) fn insert_period(metadata: &mut Metadata, text: &str) {
    let Some(caps) = period_re().captures(text) else {
        return;
    };
    if let (Ok(from), Ok(to)) = (parse_date(&caps[1]), parse_date(&caps[2])) {
        metadata.insert("period_from".into(), from.to_string());
        metadata.insert("period_to".into(), to.to_string());
    }
}
