//! Locale-aware value parsing and vendor canonicalization
//!
//! Statements use German conventions: `,` is the decimal separator, `.` groups
//! thousands, dates are `DD.MM.YY` or `DD.MM.YYYY`. Amounts are carried as
//! signed integers of minor units (cents) until a parser splits them into
//! magnitude and [`Direction`](crate::models::Direction).

use chrono::NaiveDate;

use crate::config::TallyConfig;
use crate::error::{Error, Result};

/// Payment processors that prefix the real vendor name
const PROCESSOR_PREFIXES: &[&str] = &[
    "PAYPAL *",
    "PAYPAL*",
    "PP*",
    "SUMUP *",
    "SUMUP*",
    "SQ *",
    "ZETTLE_*",
    "IZ *",
    "KLARNA*",
    "STRIPE*",
    "VISA ",
];

/// (contained text, canonical vendor); first match wins, so specific entries go first
const VENDOR_ALIASES: &[(&str, &str)] = &[
    ("AMZN MKTP", "AMAZON"),
    ("AMAZON.DE", "AMAZON"),
    ("AMZN", "AMAZON"),
    ("NETFLIX", "NETFLIX"),
    ("SPOTIFY", "SPOTIFY"),
    ("APPLE.COM/BILL", "APPLE"),
    ("DB VERTRIEB", "DEUTSCHE BAHN"),
    ("DB FERNVERKEHR", "DEUTSCHE BAHN"),
    ("DM DROGERIE", "DM"),
    ("DM-DROGERIE", "DM"),
    ("REWE MARKT", "REWE"),
    ("LIDL DIENSTL", "LIDL"),
    ("EDEKA", "EDEKA"),
];

const SMART_QUOTES: &[char] = &[
    '"', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201F}', '\u{2018}', '\u{2019}', '\u{201A}',
    '\u{201B}', '\u{00AB}', '\u{00BB}',
];

/// Characters statements leave dangling at the end of a vendor
const TRAILING_MARKERS: &[char] = &['*', '/', '-', '.', ',', ':', '#', '+', '_'];

/// Parse a German-formatted amount into signed minor units.
///
/// A leading or trailing `-` makes the value negative. A trailing `+` forces a
/// positive value even when a leading `-` is present.
pub fn parse_amount(text: &str) -> Result<i64> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    let compact = compact.replace("EUR", "").replace('€', "");

    let mut body = compact.as_str();
    let mut negative = false;
    let mut force_positive = false;

    if let Some(rest) = body.strip_suffix('+') {
        force_positive = true;
        body = rest;
    } else if let Some(rest) = body.strip_suffix('-') {
        negative = true;
        body = rest;
    }

    if let Some(rest) = body.strip_prefix('-') {
        negative = true;
        body = rest;
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest;
    }

    if force_positive {
        negative = false;
    }

    let invalid = || Error::InvalidData(format!("Invalid amount: {:?}", text));

    let (int_part, frac_part) = match body.split_once(',') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() || frac_part.len() > 2 || frac_part.contains(',') {
        return Err(invalid());
    }

    // Thousands groups after the first must be exactly three digits
    let mut groups = int_part.split('.');
    let first = groups.next().unwrap_or_default();
    if first.is_empty() || (first.len() > 3 && int_part.contains('.')) {
        return Err(invalid());
    }
    let mut digits = first.to_string();
    for group in groups {
        if group.len() != 3 {
            return Err(invalid());
        }
        digits.push_str(group);
    }

    if !digits.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i128 = digits.parse().map_err(|_| invalid())?;
    let cents: i128 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i128>().map_err(|_| invalid())? * 10,
        _ => frac_part.parse().map_err(|_| invalid())?,
    };

    let magnitude = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(invalid)?;
    let signed = if negative { -magnitude } else { magnitude };

    i64::try_from(signed).map_err(|_| invalid())
}

/// Format signed minor units the way statements print them (`-1.234,56`)
pub fn format_amount(minor: i64) -> String {
    let magnitude = minor.unsigned_abs();
    let whole = (magnitude / 100).to_string();
    let cents = magnitude % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    let sign = if minor < 0 { "-" } else { "" };
    format!("{}{},{:02}", sign, grouped, cents)
}

/// Parse `DD.MM.YYYY` or `DD.MM.YY`; two-digit years below 50 are 20xx, else 19xx
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    let invalid = || Error::InvalidData(format!("Invalid date: {:?}", text));
    let trimmed = text.trim();

    let parts: Vec<&str> = trimmed.split('.').collect();
    let [day, month, year] = parts.as_slice() else {
        return Err(invalid());
    };

    let numeric = |s: &str, max_len: usize| {
        !s.is_empty() && s.len() <= max_len && s.chars().all(|c| c.is_ascii_digit())
    };
    if !numeric(day, 2) || !numeric(month, 2) || !numeric(year, 4) {
        return Err(invalid());
    }

    let day: u32 = day.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let year: i32 = match year.len() {
        2 => {
            let yy: i32 = year.parse().map_err(|_| invalid())?;
            if yy < 50 {
                2000 + yy
            } else {
                1900 + yy
            }
        }
        4 => year.parse().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Canonicalize a vendor using the built-in tables
pub fn normalize_vendor(raw: &str) -> String {
    Normalizer::default().normalize_vendor(raw)
}

/// Vendor canonicalizer with optional extra prefixes and aliases from config
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    extra_prefixes: Vec<String>,
    extra_aliases: Vec<(String, String)>,
}

impl Normalizer {
    pub fn new(extra_prefixes: Vec<String>, extra_aliases: Vec<(String, String)>) -> Self {
        Self {
            extra_prefixes: extra_prefixes.iter().map(|p| p.to_uppercase()).collect(),
            extra_aliases: extra_aliases
                .into_iter()
                .map(|(p, c)| (p.to_uppercase(), c.to_uppercase()))
                .collect(),
        }
    }

    pub fn from_config(config: &TallyConfig) -> Self {
        Self::new(
            config.extra_processor_prefixes.clone(),
            config.extra_aliases.clone(),
        )
    }

    /// Canonical vendor name; never fails, empty input gives empty output
    pub fn normalize_vendor(&self, raw: &str) -> String {
        let trimmed = raw.trim();

        let upper_raw = trimmed.to_uppercase();
        let prefix_len = PROCESSOR_PREFIXES
            .iter()
            .copied()
            .chain(self.extra_prefixes.iter().map(String::as_str))
            .find(|prefix| !prefix.is_empty() && upper_raw.starts_with(prefix))
            .map(|prefix| prefix.len());
        let without_prefix = match prefix_len {
            Some(len) => strip_upper_prefix(trimmed, len),
            None => trimmed,
        };

        let without_location = without_prefix
            .split(',')
            .next()
            .unwrap_or_default();

        let cleaned: String = without_location
            .to_uppercase()
            .chars()
            .filter(|c| !SMART_QUOTES.contains(c))
            .collect();
        let mut vendor = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

        let alias = VENDOR_ALIASES
            .iter()
            .map(|(p, c)| (*p, *c))
            .chain(
                self.extra_aliases
                    .iter()
                    .map(|(p, c)| (p.as_str(), c.as_str())),
            )
            .find(|(pattern, _)| !pattern.is_empty() && vendor.contains(pattern));
        if let Some((_, canonical)) = alias {
            vendor = canonical.to_string();
        }

        vendor
            .trim_end_matches(|c: char| TRAILING_MARKERS.contains(&c) || c.is_whitespace())
            .to_string()
    }
}

/// Drop the first `upper_len` bytes of the uppercased text from the original.
/// Uppercasing can change byte lengths, so walk characters in step.
fn strip_upper_prefix(original: &str, upper_len: usize) -> &str {
    let mut consumed = 0;
    for (idx, ch) in original.char_indices() {
        if consumed >= upper_len {
            return &original[idx..];
        }
        consumed += ch.to_uppercase().map(char::len_utf8).sum::<usize>();
    }
    ""
}
