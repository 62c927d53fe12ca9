//! Import job handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, MAX_PAGE_LIMIT};
use tally_core::models::{DraftTransaction, ImportCounts, ImportJob};
use tally_core::RollbackSummary;

/// Request body for importing a batch of drafts
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub account_id: i64,
    pub import_job_id: i64,
    pub transactions: Vec<DraftTransaction>,
}

/// Query parameters for listing import jobs
#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub account_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// POST /api/imports - Import drafts under an open job
///
/// Either every row is committed together with the job status or none is.
pub async fn import_transactions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportCounts>, AppError> {
    let counts = state
        .orchestrator
        .import(req.import_job_id, req.account_id, req.transactions)
        .await?;
    Ok(Json(counts))
}

/// GET /api/imports - List import jobs, newest first
pub async fn list_imports(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ImportQuery>,
) -> Result<Json<Vec<ImportJob>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.db.list_import_jobs(params.account_id, limit)?))
}

/// GET /api/imports/:id - Get one import job
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ImportJob>, AppError> {
    let job = state
        .db
        .get_import_job(id)?
        .ok_or_else(|| AppError::not_found(&format!("Import job {} not found", id)))?;
    Ok(Json(job))
}

/// POST /api/imports/:id/rollback - Delete everything a job imported
pub async fn rollback_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RollbackSummary>, AppError> {
    Ok(Json(state.db.rollback_import(id)?))
}
