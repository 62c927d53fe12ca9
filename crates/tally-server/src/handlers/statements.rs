//! Statement upload handler

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    Json,
};

use crate::{AppError, AppState, MAX_UPLOAD_SIZE};
use tally_core::{models::Issuer, UploadOutcome};

/// POST /api/statements - Upload a statement document
///
/// Expects multipart form with:
/// - file: statement export or PDF (required, max 10MB)
/// - account_id: Account the statement belongs to (required)
/// - issuer: `giro` or `card` (optional; needed only when the format is not recognized)
///
/// The document is parsed and an import job opened; nothing is written to the
/// ledger until the drafts are posted to `/api/imports`.
pub async fn upload_statement(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut account_id: Option<i64> = None;
    let mut issuer: Option<Issuer> = None;

    // Extract fields from multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("statement").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read file data"))?;

                // Check file size limit
                if bytes.len() > MAX_UPLOAD_SIZE {
                    return Err(AppError::bad_request(&format!(
                        "File too large. Maximum size is {} MB",
                        MAX_UPLOAD_SIZE / 1024 / 1024
                    )));
                }

                file = Some((filename, bytes.to_vec()));
            }
            "account_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read account_id"))?;
                account_id = Some(value.trim().parse().map_err(|_| {
                    AppError::bad_request(&format!("Invalid account_id: {}", value))
                })?);
            }
            "issuer" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read issuer"))?;
                if !value.trim().is_empty() {
                    issuer = Some(value.trim().parse().map_err(|_| {
                        AppError::bad_request(&format!("Unknown issuer: {}", value))
                    })?);
                }
            }
            _ => {}
        }
    }

    // Validate required fields
    let (filename, bytes) = file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("Uploaded file is empty"));
    }
    let account_id = account_id.ok_or_else(|| AppError::bad_request("Missing account_id field"))?;

    // PDF extraction and parsing are CPU-bound
    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        orchestrator.prepare_upload(account_id, &filename, &bytes, issuer)
    })
    .await??;

    Ok(Json(outcome))
}
