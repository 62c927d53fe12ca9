//! Account and category handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{AppError, AppState};
use tally_core::models::{Account, Category, Issuer};

/// Request body for creating an account
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub issuer: String,
}

/// GET /api/accounts - List all accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Account>>, AppError> {
    Ok(Json(state.db.list_accounts()?))
}

/// POST /api/accounts - Create an account (or return the existing one)
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Account name is required"));
    }
    let issuer: Issuer = req
        .issuer
        .parse()
        .map_err(|_| AppError::bad_request(&format!("Unknown issuer: {}", req.issuer)))?;

    let account_id = state.db.upsert_account(name, issuer)?;
    let account = state
        .db
        .get_account(account_id)?
        .ok_or_else(|| AppError::internal("Account not found after creation"))?;

    Ok(Json(account))
}

/// GET /api/categories - List categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.db.list_categories()?))
}
