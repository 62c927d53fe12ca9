//! Transaction handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, MAX_PAGE_LIMIT};
use tally_core::models::{CategoryOverride, StoredTransaction};
use tally_core::{correct_category, CorrectionOutcome, TransactionFilter};

/// Query parameters for listing transactions
#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    pub account_id: Option<i64>,
    pub needs_review: Option<bool>,
    pub import_job_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    200
}

/// Request body for a manual category change
#[derive(Debug, Deserialize)]
pub struct CorrectCategoryRequest {
    pub category_id: i64,
    #[serde(default)]
    pub actor: String,
}

/// GET /api/transactions - List transactions, newest first
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionQuery>,
) -> Result<Json<Vec<StoredTransaction>>, AppError> {
    // Input validation: clamp pagination parameters
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);

    let filter = TransactionFilter::new()
        .account_id(params.account_id)
        .needs_review(params.needs_review)
        .import_job_id(params.import_job_id)
        .limit(Some(limit));
    Ok(Json(state.db.list_transactions(&filter)?))
}

/// POST /api/transactions/:id/category - Record a correction and learn from it
pub async fn correct_transaction_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<CorrectCategoryRequest>,
) -> Result<Json<CorrectionOutcome>, AppError> {
    let outcome = correct_category(&state.db, &state.learner, id, req.category_id, &req.actor)?;
    Ok(Json(outcome))
}

/// GET /api/transactions/:id/overrides - Correction history of a transaction
pub async fn list_transaction_overrides(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<CategoryOverride>>, AppError> {
    if state.db.get_transaction(id)?.is_none() {
        // History outlives the row after a rollback
        let overrides = state.db.list_overrides_for_transaction(id)?;
        if overrides.is_empty() {
            return Err(AppError::not_found(&format!("Transaction {} not found", id)));
        }
        return Ok(Json(overrides));
    }
    Ok(Json(state.db.list_overrides_for_transaction(id)?))
}
