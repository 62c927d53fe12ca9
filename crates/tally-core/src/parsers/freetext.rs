//! Free-text statement engine
//!
//! Extracted statement text is read line by line. A transaction starts on a
//! line with a date at the start and an amount at the end; following lines
//! either fill named metadata slots or extend the description. The open
//! transaction is flushed by the next start line or the end of input.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Direction, DraftTransaction, Metadata, ParseWarning, ParsedStatement};
use crate::normalize::{parse_amount, parse_date};

/// A continuation line pattern that fills a metadata slot
pub(crate) struct MetadataMarker {
    pub key: &'static str,
    /// First capture group is the value
    pub pattern: Regex,
}

impl MetadataMarker {
    pub fn new(key: &'static str, pattern: &str) -> Self {
        Self {
            key,
            pattern: Regex::new(pattern).expect("metadata marker regex"),
        }
    }
}

/// Issuer-specific vocabulary for a free-text statement
pub(crate) struct FreeTextLayout {
    /// Transaction-type labels looked for between date and amount
    pub type_labels: &'static [&'static str],
    pub metadata_markers: Vec<MetadataMarker>,
    /// Lines containing any of these are ignored (balances, headers); page footers always are
    pub skip_markers: &'static [&'static str],
    /// Metadata key for a second date printed right after the first one
    pub secondary_date_key: Option<&'static str>,
}

/// Classification of one input line
#[derive(Debug, PartialEq)]
pub(crate) enum LineEvent {
    Start(DraftTransaction),
    Metadata(Vec<(&'static str, String)>),
    Continuation(String),
    /// Looked like a start line but could not be read
    Invalid(String),
    Ignore,
}

/// Two-state parser: nothing open, or one draft collecting continuation lines
#[derive(Debug, PartialEq)]
pub(crate) enum ParserState {
    Idle,
    Open(DraftTransaction),
}

impl ParserState {
    /// Apply one line event; returns the next state and a draft if one was flushed
    pub fn step(self, event: LineEvent) -> (ParserState, Option<DraftTransaction>) {
        match (self, event) {
            (state, LineEvent::Start(draft)) => (ParserState::Open(draft), state.finish()),
            (state, LineEvent::Invalid(_)) => (ParserState::Idle, state.finish()),
            (ParserState::Open(mut draft), LineEvent::Metadata(pairs)) => {
                for (key, value) in pairs {
                    draft.metadata.insert(key.to_string(), value);
                }
                (ParserState::Open(draft), None)
            }
            (ParserState::Open(mut draft), LineEvent::Continuation(text)) => {
                if !draft.description.is_empty() {
                    draft.description.push(' ');
                }
                draft.description.push_str(&text);
                (ParserState::Open(draft), None)
            }
            (state, _) => (state, None),
        }
    }

    /// End of input
    pub fn finish(self) -> Option<DraftTransaction> {
        match self {
            ParserState::Idle => None,
            ParserState::Open(draft) => Some(draft),
        }
    }
}

fn start_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(\d{1,2}\.\d{1,2}\.\d{2,4})\s+(?:(.*?)\s+)?([+-]?\s?(?:\d{1,3}(?:\.\d{3})+|\d+),\d{2}(?:\s?[+-])?)\s*$",
        )
        .expect("start line regex")
    })
}

/// Page footers such as `Seite 2 von 3`
fn page_footer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Seite\s+\d+").expect("page footer regex"))
}

fn leading_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}\.\d{1,2}\.\d{2,4})\s+").expect("leading date regex"))
}

/// Classify a single line against the layout
pub(crate) fn classify_line(layout: &FreeTextLayout, line: &str) -> LineEvent {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineEvent::Ignore;
    }
    if page_footer_re().is_match(trimmed)
        || layout.skip_markers.iter().any(|m| trimmed.contains(m))
    {
        return LineEvent::Ignore;
    }

    if let Some(caps) = start_line_re().captures(trimmed) {
        let span = caps.get(2).map_or("", |m| m.as_str());
        return match build_draft(layout, &caps[1], span, &caps[3]) {
            Ok(draft) => LineEvent::Start(draft),
            Err(message) => LineEvent::Invalid(message),
        };
    }

    let pairs: Vec<(&'static str, String)> = layout
        .metadata_markers
        .iter()
        .filter_map(|marker| {
            marker
                .pattern
                .captures(trimmed)
                .and_then(|c| c.get(1))
                .map(|m| (marker.key, m.as_str().trim().to_string()))
        })
        .collect();
    if !pairs.is_empty() {
        return LineEvent::Metadata(pairs);
    }

    LineEvent::Continuation(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn build_draft(
    layout: &FreeTextLayout,
    date_text: &str,
    span: &str,
    amount_text: &str,
) -> Result<DraftTransaction, String> {
    let date = parse_date(date_text).map_err(|e| e.to_string())?;
    let signed = parse_amount(amount_text).map_err(|e| e.to_string())?;
    let (amount, direction) = Direction::split_signed(signed);

    let mut metadata = Metadata::new();
    let mut span = span.trim();
    if let Some(key) = layout.secondary_date_key {
        if let Some(caps) = leading_date_re().captures(span) {
            if let Ok(second) = parse_date(&caps[1]) {
                metadata.insert(key.to_string(), second.to_string());
                span = span[caps[0].len()..].trim();
            }
        }
    }

    let (type_label, vendor) = split_type_label(layout.type_labels, span);

    Ok(DraftTransaction {
        date,
        amount,
        direction,
        raw_vendor: vendor,
        normalized_vendor: String::new(),
        description: String::new(),
        type_label,
        metadata,
    })
}

/// Find the earliest type label at a word start; the text after it is the vendor
fn split_type_label(labels: &[&str], span: &str) -> (Option<String>, String) {
    let found = labels
        .iter()
        .filter_map(|label| {
            span.match_indices(label)
                .find(|(idx, _)| *idx == 0 || span[..*idx].ends_with(char::is_whitespace))
                .map(|(idx, _)| (idx, *label))
        })
        .min_by_key(|(idx, label)| (*idx, std::cmp::Reverse(label.len())));

    match found {
        Some((idx, label)) => {
            let after = span[idx + label.len()..].trim();
            let vendor = if after.is_empty() {
                span[..idx].trim()
            } else {
                after
            };
            let vendor = if vendor.is_empty() { label } else { vendor };
            (Some(label.to_string()), vendor.to_string())
        }
        None => (None, span.to_string()),
    }
}

/// Run the state machine over all lines of `text`
pub(crate) fn parse_free_text(text: &str, layout: &FreeTextLayout) -> ParsedStatement {
    let mut statement = ParsedStatement::default();
    let mut state = ParserState::Idle;

    for (idx, line) in text.lines().enumerate() {
        let event = classify_line(layout, line);
        if let LineEvent::Invalid(message) = &event {
            statement.warnings.push(ParseWarning {
                line: idx + 1,
                message: message.clone(),
                raw: line.to_string(),
            });
        }

        let (next, flushed) = state.step(event);
        state = next;
        statement.transactions.extend(flushed);
    }
    statement.transactions.extend(state.finish());

    statement
}
