//! Tally Web Server
//!
//! Axum-based REST API for statement ingestion:
//! - Statement upload (extract, route, parse, open an import job)
//! - Batch import of reviewed drafts under a job, and rollback
//! - Category corrections feeding the rule learner
//! - Rule store lookups
//!
//! Error responses are sanitized: input problems come back as 400 with the
//! reason, upstream failures as 502 marked retryable, everything else as a
//! generic 500 with the detail only in the log.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use tally_core::{
    AIBackend, AIClient, CorrectionLearner, Database, ErrorKind, ImportOrchestrator, TallyConfig,
};

mod handlers;

/// Maximum file upload size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub orchestrator: ImportOrchestrator,
    pub learner: CorrectionLearner,
    pub config: ServerConfig,
}

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(
    db: Database,
    ai: Option<AIClient>,
    tally: &TallyConfig,
    config: ServerConfig,
) -> Router {
    match &ai {
        Some(client) => info!(
            "Classification fallback: {} (model: {})",
            client.host(),
            client.model()
        ),
        None => info!("ℹ️  Classification fallback not configured (set OLLAMA_HOST to enable)"),
    }

    let state = Arc::new(AppState {
        orchestrator: ImportOrchestrator::new(db.clone(), ai, tally),
        learner: CorrectionLearner::from_config(tally),
        db,
        config: config.clone(),
    });

    let api_routes = Router::new()
        .route("/health", get(health))
        // Accounts and categories
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route("/categories", get(handlers::list_categories))
        // Statements
        .route("/statements", post(handlers::upload_statement))
        // Imports
        .route(
            "/imports",
            get(handlers::list_imports).post(handlers::import_transactions),
        )
        .route("/imports/:id", get(handlers::get_import))
        .route("/imports/:id/rollback", post(handlers::rollback_import))
        // Transactions
        .route("/transactions", get(handlers::list_transactions))
        .route(
            "/transactions/:id/category",
            post(handlers::correct_transaction_category),
        )
        .route(
            "/transactions/:id/overrides",
            get(handlers::list_transaction_overrides),
        )
        // Rules
        .route("/rules", get(handlers::list_rules).post(handlers::create_rule));

    // CORS: same-origin unless origins are configured
    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// GET /api/health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Start the server
pub async fn serve(
    db: Database,
    tally: &TallyConfig,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    // Jobs a previous process left half-way cannot have written rows
    match db.recover_interrupted_imports() {
        Ok(count) if count > 0 => {
            warn!(
                "⚠️  Marked {} interrupted import(s) from a previous session as failed",
                count
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to recover interrupted imports: {}", e);
        }
    }

    let ai = AIClient::from_env();
    check_ai_connection(ai.as_ref()).await;

    let app = create_router(db, ai, tally, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log classification backend status
async fn check_ai_connection(ai: Option<&AIClient>) {
    let Some(client) = ai else {
        return;
    };
    if client.health_check().await {
        info!(
            "✅ Classification backend connected: {} (model: {})",
            client.host(),
            client.model()
        );
    } else {
        warn!(
            "⚠️  Classification backend configured but not responding: {}; unmatched vendors go to review",
            client.host()
        );
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    /// Extra fields merged into the JSON body
    details: serde_json::Map<String, serde_json::Value>,
    internal: Option<anyhow::Error>,
}

impl AppError {
    fn new(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
            details: serde_json::Map::new(),
            internal: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal(msg: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    fn from_core(err: &tally_core::Error) -> Option<Self> {
        use tally_core::Error;

        let mapped = match err {
            Error::NotFound(what) => Self::not_found(&format!("{} not found", what)),
            Error::UnrecognizedFormat { hint } => Self::bad_request(&err.to_string())
                .with_detail("code", "unrecognized_format".into())
                .with_detail(
                    "expected_issuers",
                    hint.split(", ").collect::<Vec<_>>().into(),
                ),
            _ => match err.kind() {
                ErrorKind::Input => Self::bad_request(&err.to_string()),
                ErrorKind::Upstream => {
                    Self::new(StatusCode::BAD_GATEWAY, &err.to_string())
                        .with_detail("retryable", true.into())
                }
                ErrorKind::Internal => return None,
            },
        };
        Some(mapped)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let mut body = self.details;
        body.insert("error".to_string(), self.message.into());

        (self.status, Json(serde_json::Value::Object(body))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        if let Some(mapped) = err
            .downcast_ref::<tally_core::Error>()
            .and_then(AppError::from_core)
        {
            return mapped;
        }
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            details: serde_json::Map::new(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
