//! Transfer pairing
//!
//! Money moved between two of the user's own accounts shows up twice: a
//! debit in one account and a credit of the same amount in another. Rows
//! whose vendor or description mentions such a movement are matched against
//! the other accounts and both sides are linked under one transfer group.

use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use crate::db::{find_transfer_candidates, link_transfer_pair, Database};
use crate::error::Result;
use crate::models::{Direction, StoredTransaction};

/// Partners may be booked up to this many days before or after each other
pub const TRANSFER_WINDOW_DAYS: i64 = 5;

/// Terms marking internal money movement, matched case-insensitively
const TRANSFER_KEYWORDS: &[&str] = &[
    "TRANSFER",
    "UMBUCHUNG",
    "ÜBERTRAG",
    "UEBERTRAG",
    "KREDITKARTENABRECHNUNG",
    "KREDITKARTENAUSGLEICH",
    "AUSGLEICH KREDITKARTE",
    "LASTSCHRIFTEINZUG",
    "DIRECT DEBIT",
];

/// Whether vendor or description names an internal movement
pub fn detect_transfer_keywords(vendor: &str, description: &str) -> bool {
    let vendor = vendor.to_uppercase();
    let description = description.to_uppercase();
    TRANSFER_KEYWORDS
        .iter()
        .any(|keyword| vendor.contains(keyword) || description.contains(keyword))
}

/// Candidate closest in date; ties go to the older row
pub fn closest_candidate(
    date: NaiveDate,
    candidates: Vec<StoredTransaction>,
) -> Option<StoredTransaction> {
    candidates
        .into_iter()
        .min_by_key(|c| ((c.date - date).num_days().abs(), c.id))
}

/// Find an unlinked mirror transaction in another account within the window
pub fn find_pair(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    amount: i64,
    direction: Direction,
) -> Result<Option<StoredTransaction>> {
    let candidates = find_transfer_candidates(
        conn,
        account_id,
        date,
        amount,
        direction,
        TRANSFER_WINDOW_DAYS,
    )?;
    Ok(closest_candidate(date, candidates))
}

/// Link two transactions; returns the new transfer group id
pub fn pair(conn: &Connection, a: i64, b: i64) -> Result<String> {
    let group = link_transfer_pair(conn, a, b)?;
    info!("Linked transactions {} and {} as transfer {}", a, b, group);
    Ok(group)
}

impl Database {
    pub fn find_transfer_pair(
        &self,
        account_id: i64,
        date: NaiveDate,
        amount: i64,
        direction: Direction,
    ) -> Result<Option<StoredTransaction>> {
        let conn = self.conn()?;
        find_pair(&conn, account_id, date, amount, direction)
    }

    /// Link two stored transactions as one transfer
    pub fn pair_transfer(&self, a: i64, b: i64) -> Result<String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let group = pair(&tx, a, b)?;
        tx.commit()?;
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_transaction, NewTransaction, TransactionInsertResult};
    use crate::dedup::draft_fingerprint;
    use crate::error::Error;
    use crate::models::{DraftTransaction, Issuer};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn draft(on: NaiveDate, amount: i64, direction: Direction, vendor: &str) -> DraftTransaction {
        DraftTransaction {
            date: on,
            amount,
            direction,
            raw_vendor: vendor.to_string(),
            normalized_vendor: vendor.to_uppercase(),
            description: String::new(),
            type_label: None,
            metadata: Default::default(),
        }
    }

    fn store(db: &Database, account_id: i64, draft: &DraftTransaction) -> i64 {
        let conn = db.conn().unwrap();
        let fingerprint = draft_fingerprint(account_id, draft);
        let result = insert_transaction(
            &conn,
            &NewTransaction {
                account_id,
                import_job_id: None,
                draft,
                normalized_vendor: &draft.normalized_vendor,
                category_id: None,
                confidence: None,
                needs_review: true,
                fingerprint: &fingerprint,
            },
        )
        .unwrap();
        match result {
            TransactionInsertResult::Inserted(id) => id,
            TransactionInsertResult::Duplicate => panic!("unexpected duplicate"),
        }
    }

    fn setup() -> (Database, i64, i64) {
        let db = Database::in_memory().unwrap();
        let giro = db.upsert_account("Girokonto", Issuer::Giro).unwrap();
        let card = db.upsert_account("Visa", Issuer::Card).unwrap();
        (db, giro, card)
    }

    #[test]
    fn test_detect_keywords() {
        assert!(detect_transfer_keywords("Umbuchung", ""));
        assert!(detect_transfer_keywords("DKB", "Kreditkartenabrechnung 11/2017"));
        assert!(detect_transfer_keywords("Ausgleich Kreditkarte", ""));
        assert!(detect_transfer_keywords("Übertrag auf Sparkonto", ""));
        assert!(!detect_transfer_keywords("REWE", "Kartenzahlung"));
    }

    #[test]
    fn test_closest_candidate() {
        let (db, giro, card) = setup();
        let far = store(&db, card, &draft(date(2024, 3, 6), 50000, Direction::Credit, "A"));
        let near = store(&db, card, &draft(date(2024, 3, 2), 50000, Direction::Credit, "B"));

        let found = db
            .find_transfer_pair(giro, date(2024, 3, 1), 50000, Direction::Debit)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, near);
        assert_ne!(found.id, far);
    }

    #[test]
    fn test_pair_scenario() {
        let (db, giro, card) = setup();
        let transfer = db.upsert_transfer_category("Transfer").unwrap();
        let debit = store(
            &db,
            giro,
            &draft(date(2017, 12, 1), 50000, Direction::Debit, "Umbuchung"),
        );
        let credit = store(
            &db,
            card,
            &draft(date(2017, 12, 4), 50000, Direction::Credit, "Einzahlung"),
        );

        let found = db
            .find_transfer_pair(giro, date(2017, 12, 1), 50000, Direction::Debit)
            .unwrap()
            .expect("partner within window");
        assert_eq!(found.id, credit);

        let group = db.pair_transfer(debit, credit).unwrap();
        let a = db.get_transaction(debit).unwrap().unwrap();
        let b = db.get_transaction(credit).unwrap().unwrap();
        assert_eq!(a.transfer_group.as_deref(), Some(group.as_str()));
        assert_eq!(b.transfer_group.as_deref(), Some(group.as_str()));
        assert!(a.is_transfer && b.is_transfer);
        assert_eq!(a.category_id, Some(transfer));
        assert_eq!(b.category_id, Some(transfer));
        assert!(!a.needs_review && !b.needs_review);

        // Neither side can join a second group
        let other = store(
            &db,
            card,
            &draft(date(2017, 12, 2), 50000, Direction::Credit, "Umbuchung 2"),
        );
        assert!(matches!(
            db.pair_transfer(debit, other),
            Err(Error::InvalidData(_))
        ));
        assert!(db.get_transaction(other).unwrap().unwrap().transfer_group.is_none());
        assert!(db
            .find_transfer_pair(card, date(2017, 12, 4), 50000, Direction::Credit)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_window_and_mirror_rules() {
        let (db, giro, card) = setup();
        // Six days apart: outside the window
        store(&db, card, &draft(date(2024, 3, 7), 50000, Direction::Credit, "A"));
        // Same direction
        store(&db, card, &draft(date(2024, 3, 1), 50000, Direction::Debit, "B"));
        // Different amount
        store(&db, card, &draft(date(2024, 3, 1), 49999, Direction::Credit, "C"));
        // Same account
        store(&db, giro, &draft(date(2024, 3, 1), 50000, Direction::Credit, "D"));

        assert!(db
            .find_transfer_pair(giro, date(2024, 3, 1), 50000, Direction::Debit)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_pair_without_transfer_category_stays_in_review() {
        let (db, giro, card) = setup();
        let a = store(&db, giro, &draft(date(2024, 1, 1), 100, Direction::Debit, "A"));
        let b = store(&db, card, &draft(date(2024, 1, 1), 100, Direction::Credit, "B"));
        db.pair_transfer(a, b).unwrap();
        for id in [a, b] {
            let tx = db.get_transaction(id).unwrap().unwrap();
            assert!(tx.is_transfer);
            assert_eq!(tx.category_id, None);
            assert!(tx.needs_review);
        }
    }

    #[test]
    fn test_pair_rejects_dates_outside_window() {
        let (db, giro, card) = setup();
        let a = store(&db, giro, &draft(date(2024, 1, 1), 100, Direction::Debit, "A"));
        let b = store(&db, card, &draft(date(2024, 6, 1), 100, Direction::Credit, "B"));
        assert!(matches!(db.pair_transfer(a, b), Err(Error::InvalidData(_))));
        assert!(db.get_transaction(a).unwrap().unwrap().transfer_group.is_none());
        assert!(db.get_transaction(b).unwrap().unwrap().transfer_group.is_none());

        // The window edge itself is allowed
        let c = store(&db, card, &draft(date(2024, 1, 6), 100, Direction::Credit, "C"));
        assert!(db.pair_transfer(a, c).is_ok());
    }

    #[test]
    fn test_pair_rejects_same_account() {
        let (db, giro, _) = setup();
        let a = store(&db, giro, &draft(date(2024, 1, 1), 100, Direction::Debit, "A"));
        let b = store(&db, giro, &draft(date(2024, 1, 1), 100, Direction::Credit, "B"));
        assert!(db.pair_transfer(a, b).is_err());
    }
}
