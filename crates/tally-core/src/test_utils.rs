//! Test utilities for tally-core
//!
//! A mock Ollama server speaking just enough of the HTTP API for the
//! classification fallback: `/api/tags` for health checks and
//! `/api/generate` answering from the mock keyword table.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::ai::keyword_classification;

/// How the mock server answers generate requests
#[derive(Debug, Clone, Copy, Default)]
pub enum MockBehavior {
    /// Keyword table answer as JSON
    #[default]
    Classify,
    /// HTTP 500 on every generate call
    ServerError,
    /// Prose with no JSON object in it
    Garbage,
    /// Keyword table answer after a delay
    Slow(Duration),
}

/// Mock Ollama server for testing and development
pub struct MockOllamaServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(MockBehavior::Classify).await
    }

    pub async fn start_with(behavior: MockBehavior) -> anyhow::Result<Self> {
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate))
            .with_state(behavior);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await;
            if let Err(e) = served {
                tracing::warn!("Mock Ollama server stopped: {}", e);
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ollama tags endpoint response (health check)
async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![ModelInfo {
            name: "llama3.2:latest".to_string(),
            size: 2_000_000_000,
        }],
    })
}

/// Ollama generate endpoint
async fn handle_generate(
    State(behavior): State<MockBehavior>,
    Json(request): Json<GenerateRequest>,
) -> std::result::Result<Json<GenerateResponse>, StatusCode> {
    let response = match behavior {
        MockBehavior::ServerError => return Err(StatusCode::INTERNAL_SERVER_ERROR),
        MockBehavior::Garbage => "I am not sure what this vendor sells.".to_string(),
        MockBehavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            classification_json(&request.prompt)
        }
        MockBehavior::Classify => classification_json(&request.prompt),
    };

    Ok(Json(GenerateResponse {
        model: request.model,
        response,
        done: true,
    }))
}

fn classification_json(prompt: &str) -> String {
    let merchant = extract_vendor_from_prompt(prompt);
    serde_json::to_string(&keyword_classification(&merchant))
        .unwrap_or_else(|_| "{}".to_string())
}

/// Pull the vendor out of the "Vendor: ..." prompt line
fn extract_vendor_from_prompt(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix("Vendor:"))
        .map(|vendor| vendor.trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[derive(Debug, Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}
