//! Content fingerprints for deduplication
//!
//! A transaction's fingerprint is a SHA-256 over its account, date, amount,
//! direction and normalized vendor. The database keeps (account, fingerprint)
//! unique, so storing a fingerprint twice is impossible even under concurrent
//! imports.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::models::{Direction, DraftTransaction};

/// Separates fields so ("AB", "C") and ("A", "BC") hash differently
const FIELD_SEPARATOR: &[u8] = b"\x1f";

/// Deterministic fingerprint of one transaction
pub fn fingerprint(
    account_id: i64,
    date: NaiveDate,
    amount: i64,
    direction: Direction,
    normalized_vendor: &str,
) -> String {
    let fields = [
        account_id.to_string(),
        date.to_string(),
        amount.to_string(),
        direction.as_str().to_string(),
        normalized_vendor.trim().to_lowercase(),
    ];

    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(FIELD_SEPARATOR);
        }
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint of a draft as it would be stored for `account_id`
pub fn draft_fingerprint(account_id: i64, draft: &DraftTransaction) -> String {
    fingerprint(
        account_id,
        draft.date,
        draft.amount,
        draft.direction,
        &draft.normalized_vendor,
    )
}

/// SHA-256 over an uploaded file
pub fn file_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(1, date(2024, 1, 15), 999, Direction::Debit, "AMAZON");
        let b = fingerprint(1, date(2024, 1, 15), 999, Direction::Debit, "AMAZON");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_vendor_case_and_whitespace_ignored() {
        let a = fingerprint(1, date(2024, 1, 15), 999, Direction::Debit, "AMAZON");
        let b = fingerprint(1, date(2024, 1, 15), 999, Direction::Debit, "  amazon ");
        assert_eq!(a, b);
    }

    #[test]
    fn test_each_field_matters() {
        let base = fingerprint(1, date(2024, 1, 15), 999, Direction::Debit, "NETFLIX");
        assert_ne!(base, fingerprint(2, date(2024, 1, 15), 999, Direction::Debit, "NETFLIX"));
        // Same charge one month later is a new transaction
        assert_ne!(base, fingerprint(1, date(2024, 2, 15), 999, Direction::Debit, "NETFLIX"));
        assert_ne!(base, fingerprint(1, date(2024, 1, 15), 998, Direction::Debit, "NETFLIX"));
        assert_ne!(base, fingerprint(1, date(2024, 1, 15), 999, Direction::Credit, "NETFLIX"));
        assert_ne!(base, fingerprint(1, date(2024, 1, 15), 999, Direction::Debit, "SPOTIFY"));
    }

    #[test]
    fn test_field_boundaries() {
        // account 1 + amount 12 vs account 11 + amount 2
        let a = fingerprint(1, date(2024, 1, 1), 12, Direction::Debit, "X");
        let b = fingerprint(11, date(2024, 1, 1), 2, Direction::Debit, "X");
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_fingerprint() {
        assert_eq!(file_fingerprint(b"abc"), file_fingerprint(b"abc"));
        assert_ne!(file_fingerprint(b"abc"), file_fingerprint(b"abd"));
    }
}
