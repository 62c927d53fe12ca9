//! Transfer candidate search and pairing

use chrono::{Duration, NaiveDate};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::categories::transfer_category_id;
use super::transactions::{get_transaction, map_transaction, TRANSACTION_COLUMNS};
use crate::error::{Error, Result};
use crate::models::{Direction, StoredTransaction};
use crate::transfer::TRANSFER_WINDOW_DAYS;

/// Unlinked rows in other accounts with the same amount and the opposite
/// direction, dated within `window_days` of `date`
pub(crate) fn find_transfer_candidates(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    amount: i64,
    direction: Direction,
    window_days: i64,
) -> Result<Vec<StoredTransaction>> {
    let from = date - Duration::days(window_days);
    let to = date + Duration::days(window_days);

    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM transactions
        WHERE account_id != ? AND amount = ? AND direction = ?
          AND transfer_group IS NULL
          AND date BETWEEN ? AND ?
        ORDER BY date, id
        "#,
        TRANSACTION_COLUMNS
    ))?;
    let candidates = stmt
        .query_map(
            params![
                account_id,
                amount,
                direction.opposite().as_str(),
                from.to_string(),
                to.to_string(),
            ],
            map_transaction,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(candidates)
}

/// Link two rows into a new transfer group
///
/// Both rows move to the transfer category when one exists; without one they
/// keep their category and review state. The update only touches unlinked
/// rows, so a row can never join a second group.
pub(crate) fn link_transfer_pair(conn: &Connection, a: i64, b: i64) -> Result<String> {
    let first = get_transaction(conn, a)?
        .ok_or_else(|| Error::NotFound(format!("transaction {}", a)))?;
    let second = get_transaction(conn, b)?
        .ok_or_else(|| Error::NotFound(format!("transaction {}", b)))?;

    if first.account_id == second.account_id {
        return Err(Error::InvalidData(
            "transfer pair must span two accounts".to_string(),
        ));
    }
    if first.amount != second.amount || first.direction == second.direction {
        return Err(Error::InvalidData(format!(
            "transactions {} and {} are not mirror images",
            a, b
        )));
    }
    let gap = (first.date - second.date).num_days().abs();
    if gap > TRANSFER_WINDOW_DAYS {
        return Err(Error::InvalidData(format!(
            "transactions {} and {} are {} days apart (at most {})",
            a, b, gap, TRANSFER_WINDOW_DAYS
        )));
    }

    let group = Uuid::new_v4().to_string();
    let category = transfer_category_id(conn)?;

    let updated = conn.execute(
        r#"
        UPDATE transactions
        SET transfer_group = ?1, is_transfer = 1,
            needs_review = CASE WHEN ?2 IS NULL THEN needs_review ELSE 0 END,
            category_id = COALESCE(?2, category_id), updated_at = CURRENT_TIMESTAMP
        WHERE id IN (?3, ?4) AND transfer_group IS NULL
        "#,
        params![group, category, a, b],
    )?;

    if updated != 2 {
        return Err(Error::InvalidData(format!(
            "transaction {} or {} is already part of a transfer",
            a, b
        )));
    }

    Ok(group)
}

/// Detach every member of `group`; the rows go back to review
pub(crate) fn unlink_transfer_group(conn: &Connection, group: &str) -> Result<usize> {
    let updated = conn.execute(
        r#"
        UPDATE transactions
        SET transfer_group = NULL, is_transfer = 0, category_id = NULL, confidence = NULL,
            needs_review = 1, updated_at = CURRENT_TIMESTAMP
        WHERE transfer_group = ?
        "#,
        params![group],
    )?;
    Ok(updated)
}
