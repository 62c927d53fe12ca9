//! Delimited-record statement engine
//!
//! Rows before the header row are preamble, the header row is located by its
//! tokens, and every later row is handed to an issuer-specific mapper.

use std::collections::HashMap;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::models::{DraftTransaction, ParseWarning, ParsedStatement};

/// Issuer-specific shape of a delimited export
pub(crate) struct DelimitedLayout {
    pub separator: u8,
    /// A row containing all of these (case-insensitive substrings of its fields) is the header
    pub header_tokens: &'static [&'static str],
    /// Rows whose first field starts with one of these are ignored
    pub skip_markers: &'static [&'static str],
}

/// What a mapper decided about one data row
pub(crate) enum RowOutcome {
    Draft(DraftTransaction),
    /// Not a transaction (missing or unparseable date, balance line, ...)
    Ignore,
    /// A transaction row that could not be read
    Warn(String),
}

/// One data row with access to fields by header name
pub(crate) struct Row<'a> {
    record: &'a StringRecord,
    columns: &'a HashMap<String, usize>,
}

impl<'a> Row<'a> {
    /// Field under the first header starting with `name` (case-insensitive), or ""
    pub fn get(&self, name: &str) -> &'a str {
        let name = name.to_lowercase();
        self.columns
            .iter()
            .filter(|(header, _)| header.starts_with(&name))
            .min_by_key(|(_, idx)| **idx)
            .and_then(|(_, idx)| self.record.get(*idx))
            .unwrap_or_default()
    }

    /// First non-empty field among several candidate headers
    pub fn get_any(&self, names: &[&str]) -> &'a str {
        names
            .iter()
            .map(|n| self.get(n))
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }

    fn raw(&self, separator: u8) -> String {
        let sep = (separator as char).to_string();
        self.record.iter().collect::<Vec<_>>().join(&sep)
    }
}

/// Result of running the engine before issuer-level post-processing
pub(crate) struct DelimitedOutput {
    pub statement: ParsedStatement,
    /// Rows seen before the header, as trimmed fields
    pub preamble: Vec<Vec<String>>,
    pub header_found: bool,
}

pub(crate) fn parse_delimited<F>(text: &str, layout: &DelimitedLayout, mut map_row: F) -> DelimitedOutput
where
    F: FnMut(&Row<'_>) -> RowOutcome,
{
    let mut reader = ReaderBuilder::new()
        .delimiter(layout.separator)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut statement = ParsedStatement::default();
    let mut preamble = Vec::new();
    let mut columns: Option<HashMap<String, usize>> = None;
    let mut record = StringRecord::new();
    let mut last_line = 0;

    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                // Malformed rows are skipped; positions come from the error when available
                let line = e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(last_line + 1);
                statement.warnings.push(ParseWarning {
                    line,
                    message: format!("Unreadable record: {}", e),
                    raw: text.lines().nth(line.saturating_sub(1)).unwrap_or_default().to_string(),
                });
                last_line = line;
                continue;
            }
        }

        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(last_line + 1);
        last_line = line;

        if record.iter().all(str::is_empty) {
            continue;
        }

        let Some(header) = columns.as_ref() else {
            if is_header(&record, layout.header_tokens) {
                columns = Some(
                    record
                        .iter()
                        .enumerate()
                        .map(|(idx, name)| (name.to_lowercase(), idx))
                        .collect(),
                );
            } else {
                preamble.push(record.iter().map(str::to_string).collect());
            }
            continue;
        };

        let first = record.get(0).unwrap_or_default();
        if layout
            .skip_markers
            .iter()
            .any(|marker| first.starts_with(marker))
        {
            continue;
        }

        let row = Row {
            record: &record,
            columns: header,
        };
        match map_row(&row) {
            RowOutcome::Draft(draft) => statement.transactions.push(draft),
            RowOutcome::Ignore => {}
            RowOutcome::Warn(message) => statement.warnings.push(ParseWarning {
                line,
                message,
                raw: row.raw(layout.separator),
            }),
        }
    }

    DelimitedOutput {
        header_found: columns.is_some(),
        statement,
        preamble,
    }
}

fn is_header(record: &StringRecord, tokens: &[&str]) -> bool {
    tokens.iter().all(|token| {
        let token = token.to_lowercase();
        record.iter().any(|field| field.to_lowercase().contains(&token))
    })
}

/// Whether any line of `text` looks like the header row described by `tokens`
pub(crate) fn has_header_line(text: &str, tokens: &[&str]) -> bool {
    text.lines().any(|line| {
        let lower = line.to_lowercase();
        tokens.iter().all(|t| lower.contains(&t.to_lowercase()))
    })
}
