//! Vendor rule handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState};
use tally_core::models::{NewVendorRule, VendorRule};

/// Query parameters for listing rules
#[derive(Debug, Deserialize)]
pub struct RuleQuery {
    /// Only active rules
    #[serde(default)]
    pub active: bool,
}

/// GET /api/rules - List rules in priority order
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RuleQuery>,
) -> Result<Json<Vec<VendorRule>>, AppError> {
    let rules = if params.active {
        state.db.list_active_rules()?
    } else {
        state.db.list_rules()?
    };
    Ok(Json(rules))
}

/// POST /api/rules - Create a rule
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<NewVendorRule>,
) -> Result<Json<VendorRule>, AppError> {
    let id = state.db.create_rule(&rule)?;
    let rule = state
        .db
        .get_rule(id)?
        .ok_or_else(|| AppError::internal("Rule not found after creation"))?;
    Ok(Json(rule))
}
