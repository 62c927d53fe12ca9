//! Credit card statements
//!
//! The delimited export's first line names the card product and the masked
//! card number; data rows carry receipt date, execution date, settlement
//! status and the original foreign-currency amount. The PDF statement is
//! recognised by its billing period phrase and prints amounts with a
//! trailing sign.

use std::sync::OnceLock;

use regex::Regex;

use super::delimited::{self, DelimitedLayout, Row, RowOutcome};
use super::freetext::{self, FreeTextLayout, MetadataMarker};
use crate::models::{Direction, DraftTransaction, Metadata, ParsedStatement};
use crate::normalize::{parse_amount, parse_date};

/// Billing period phrase of the PDF statement
pub const FREE_TEXT_PHRASE: &str = "Abrechnungszeitraum";

const HEADER_TOKENS: &[&str] = &["Belegdatum", "Beschreibung", "Betrag"];

const DELIMITED_LAYOUT: DelimitedLayout = DelimitedLayout {
    separator: b';',
    header_tokens: HEADER_TOKENS,
    skip_markers: &["Saldo", "Summe"],
};

const TYPE_LABELS: &[&str] = &["Gutschrift", "Lastschrift", "Bargeldauszahlung", "Einzahlung"];

const FREE_TEXT_SKIP: &[&str] = &[
    FREE_TEXT_PHRASE,
    "Ihre Kreditkartenabrechnung",
    "Belegdatum Buchungsdatum",
    "Alter Saldo",
    "Neuer Saldo",
    "Saldo aus",
];

fn product_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)^\s*"?(?:kreditkarte|[\w-]*visa[\w-]*|[\w-]*mastercard[\w-]*):?"?\s*;\s*"?(\d{4}[\d*]*\*{4,}[\d*]*\d{4})"#,
        )
        .expect("card product regex")
    })
}

fn masked_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4} ?[\d* ]*\*{4,}[\d* ]*\d{4})\b").expect("masked number regex")
    })
}

/// First non-empty line names a card product and a masked card number
pub fn matches_delimited(text: &str) -> bool {
    text.lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| product_line_re().is_match(line))
}

pub fn matches_free_text(text: &str) -> bool {
    text.contains(FREE_TEXT_PHRASE)
}

pub(crate) fn parse_delimited(text: &str) -> ParsedStatement {
    let output = delimited::parse_delimited(text, &DELIMITED_LAYOUT, map_row);
    let mut statement = output.statement;

    if let Some(caps) = text.lines().next().and_then(|l| product_line_re().captures(l)) {
        statement
            .metadata
            .insert("card_number".into(), caps[1].to_string());
    }

    for fields in &output.preamble {
        let key = fields
            .first()
            .map(|f| f.trim_end_matches(':').to_lowercase())
            .unwrap_or_default();
        let value = fields.get(1).map(|v| v.trim().to_string()).unwrap_or_default();
        let slot = match key.as_str() {
            "von" => "period_from",
            "bis" => "period_to",
            "saldo" => "balance",
            "datum" => "statement_date",
            _ => continue,
        };
        let value = parse_date(&value)
            .map(|d| d.to_string())
            .unwrap_or(value);
        statement.metadata.insert(slot.into(), value);
    }

    super::note_missing_header(&mut statement, output.header_found);
    statement
}

/// Map the export's settlement flag onto `booked` / `pending`
fn normalize_status(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "ja" | "gebucht" | "booked" | "abgerechnet" => "booked".to_string(),
        "nein" | "vorgemerkt" | "pending" | "offen" => "pending".to_string(),
        other => other.to_string(),
    }
}

fn map_row(row: &Row<'_>) -> RowOutcome {
    let receipt_date = parse_date(row.get("belegdatum")).ok();
    let execution_date = parse_date(row.get_any(&["wertstellung", "ausführungsdatum"])).ok();
    let Some(date) = execution_date.or(receipt_date) else {
        return RowOutcome::Ignore;
    };

    let signed = match parse_amount(row.get("betrag")) {
        Ok(value) => value,
        Err(e) => return RowOutcome::Warn(e.to_string()),
    };
    let (amount, direction) = Direction::split_signed(signed);

    let mut metadata = Metadata::new();
    let status = row.get_any(&["umsatz abgerechnet", "status"]);
    if !status.is_empty() {
        metadata.insert("status".into(), normalize_status(status));
    }
    if let Some(receipt) = receipt_date {
        metadata.insert("receipt_date".into(), receipt.to_string());
    }
    let foreign = row.get_any(&["ursprünglicher betrag", "fremdwährungsbetrag"]);
    if !foreign.is_empty() {
        metadata.insert("foreign_amount".into(), foreign.to_string());
    }

    RowOutcome::Draft(DraftTransaction {
        date,
        amount,
        direction,
        raw_vendor: row.get("beschreibung").to_string(),
        normalized_vendor: String::new(),
        description: String::new(),
        type_label: None,
        metadata,
    })
}

fn free_text_layout() -> FreeTextLayout {
    FreeTextLayout {
        type_labels: TYPE_LABELS,
        metadata_markers: vec![
            MetadataMarker::new("foreign_amount", r"Fremdwährung:?\s*([A-Z]{3}\s*[\d.,]+)"),
            MetadataMarker::new("exchange_rate", r"Kurs:?\s*([\d.,]+)"),
            MetadataMarker::new("reference", r"Referenz(?:nummer)?:?\s*(\S+)"),
        ],
        skip_markers: FREE_TEXT_SKIP,
        secondary_date_key: Some("booking_date"),
    }
}

pub(crate) fn parse_free_text(text: &str) -> ParsedStatement {
    let mut statement = freetext::parse_free_text(text, &free_text_layout());

    if let Some(caps) = masked_number_re().captures(text) {
        statement
            .metadata
            .insert("card_number".into(), caps[1].split_whitespace().collect());
    }
    super::insert_period(&mut statement.metadata, text);

    statement
}
