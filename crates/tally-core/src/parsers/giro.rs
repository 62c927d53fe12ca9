//! Giro (current) account statements
//!
//! Delimited exports start with a title row and carry a header row of
//! `Buchungstag;Wertstellung (Valuta);Vorgang;Buchungstext;Umsatz in EUR`.
//! The PDF statement opens with a fixed heading and prints one booking per
//! start line followed by SEPA reference lines.

use std::sync::OnceLock;

use regex::Regex;

use super::delimited::{self, DelimitedLayout, Row, RowOutcome};
use super::freetext::{self, FreeTextLayout, MetadataMarker};
use crate::models::{Direction, DraftTransaction, Metadata, ParsedStatement};
use crate::normalize::{parse_amount, parse_date};

/// Title row of the delimited export
pub const DELIMITED_TITLE: &str = "Umsätze Girokonto";

/// Heading of the PDF statement
pub const FREE_TEXT_HEADING: &str = "Kontoauszug Girokonto";

const HEADER_TOKENS: &[&str] = &["Buchungstag", "Buchungstext", "Umsatz in"];

const DELIMITED_LAYOUT: DelimitedLayout = DelimitedLayout {
    separator: b';',
    header_tokens: HEADER_TOKENS,
    skip_markers: &["Alter Kontostand", "Neuer Kontostand", "Kontostand"],
};

const TYPE_LABELS: &[&str] = &[
    "Lastschrift",
    "Überweisung",
    "Gutschrift",
    "Kartenzahlung",
    "Dauerauftrag",
    "Bargeldauszahlung",
    "Umbuchung",
    "Entgelt",
    "Zinsen",
];

const FREE_TEXT_SKIP: &[&str] = &[
    FREE_TEXT_HEADING,
    "Alter Kontostand",
    "Neuer Kontostand",
    "Kontostand am",
    "Übertrag auf Blatt",
    "Übertrag von Blatt",
    "Buchungstag Vorgang",
];

pub fn matches_delimited(text: &str) -> bool {
    text.contains(DELIMITED_TITLE) && delimited::has_header_line(text, HEADER_TOKENS)
}

pub fn matches_free_text(text: &str) -> bool {
    text.contains(FREE_TEXT_HEADING)
}

pub(crate) fn parse_delimited(text: &str) -> ParsedStatement {
    let output = delimited::parse_delimited(text, &DELIMITED_LAYOUT, map_row);
    let mut statement = output.statement;

    for fields in &output.preamble {
        let key = fields.first().map(|f| f.trim_end_matches(':')).unwrap_or_default();
        let value = fields.get(1).cloned().unwrap_or_default();
        match key {
            DELIMITED_TITLE => {
                statement
                    .metadata
                    .insert("period".into(), value.trim_start_matches("Zeitraum:").trim().into());
            }
            "Neuer Kontostand" | "Kontostand" => {
                statement.metadata.insert("balance".into(), value);
            }
            _ => {}
        }
    }

    super::note_missing_header(&mut statement, output.header_found);
    statement
}

fn map_row(row: &Row<'_>) -> RowOutcome {
    let Ok(date) = parse_date(row.get("buchungstag")) else {
        return RowOutcome::Ignore;
    };
    let signed = match parse_amount(row.get("umsatz")) {
        Ok(value) => value,
        Err(e) => return RowOutcome::Warn(e.to_string()),
    };
    let (amount, direction) = Direction::split_signed(signed);

    let booking = BookingText::parse(row.get("buchungstext"));
    let mut metadata = booking.metadata;
    if let Ok(value_date) = parse_date(row.get("wertstellung")) {
        metadata.insert("value_date".into(), value_date.to_string());
    }

    let type_label = Some(row.get("vorgang"))
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    RowOutcome::Draft(DraftTransaction {
        date,
        amount,
        direction,
        raw_vendor: booking.vendor,
        normalized_vendor: String::new(),
        description: booking.description,
        type_label,
        metadata,
    })
}

fn booking_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(Auftraggeber:|Empfänger:|Kto/IBAN:|BLZ/BIC:|Buchungstext:|Ref\.)")
            .expect("booking text regex")
    })
}

/// The packed `Buchungstext` column split into its labelled parts
#[derive(Debug, Default, PartialEq)]
struct BookingText {
    vendor: String,
    description: String,
    metadata: Metadata,
}

impl BookingText {
    fn parse(text: &str) -> Self {
        let text = text.trim();
        let keys: Vec<_> = booking_key_re().find_iter(text).collect();

        let mut party = None;
        let mut purpose = None;
        let mut metadata = Metadata::new();

        let leading = keys.first().map_or(text, |m| &text[..m.start()]).trim();
        if !leading.is_empty() {
            purpose = Some(leading.to_string());
        }

        for (i, key) in keys.iter().enumerate() {
            let end = keys.get(i + 1).map_or(text.len(), |next| next.start());
            let value = text[key.end()..end].trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "Auftraggeber:" | "Empfänger:" => party = Some(value),
                "Buchungstext:" => purpose = Some(value),
                "Kto/IBAN:" => {
                    metadata.insert("iban".into(), value);
                }
                "BLZ/BIC:" => {
                    metadata.insert("bic".into(), value);
                }
                _ => {
                    metadata.insert("reference".into(), value);
                }
            }
        }

        let (vendor, description) = match (party, purpose) {
            (Some(party), purpose) => (party, purpose.unwrap_or_default()),
            (None, Some(purpose)) => (purpose, String::new()),
            (None, None) => (text.to_string(), String::new()),
        };

        Self {
            vendor,
            description,
            metadata,
        }
    }
}

fn free_text_layout() -> FreeTextLayout {
    FreeTextLayout {
        type_labels: TYPE_LABELS,
        metadata_markers: vec![
            MetadataMarker::new("mandate_reference", r"Mandatsreferenz:?\s*(\S+)"),
            MetadataMarker::new("creditor_id", r"Gläubiger-ID:?\s*(\S+)"),
            MetadataMarker::new("end_to_end_reference", r"End-to-End-Ref(?:erenz)?\.?:?\s*(\S+)"),
            MetadataMarker::new("customer_reference", r"Kundenreferenz:?\s*(\S+)"),
        ],
        skip_markers: FREE_TEXT_SKIP,
        secondary_date_key: None,
    }
}

fn statement_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Kontoauszug Girokonto\s+Nr\.?\s*(\S+)").expect("statement number regex")
    })
}

pub(crate) fn parse_free_text(text: &str) -> ParsedStatement {
    let mut statement = freetext::parse_free_text(text, &free_text_layout());

    if let Some(caps) = statement_number_re().captures(text) {
        statement
            .metadata
            .insert("statement_number".into(), caps[1].to_string());
    }
    super::insert_period(&mut statement.metadata, text);

    statement
}
