//! JSON parsing helpers for model responses
//!
//! Models often wrap the JSON payload in extra prose, so the object between
//! the first `{` and the last `}` is parsed.

use crate::error::{Error, Result};

use super::types::MerchantClassification;

/// Cap for raw text echoed in error messages
const RAW_PREVIEW_CHARS: usize = 200;

fn preview(text: &str) -> String {
    if text.chars().count() > RAW_PREVIEW_CHARS {
        let cut: String = text.chars().take(RAW_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Parse a classification from a model response
pub fn parse_classification(response: &str) -> Result<MerchantClassification> {
    let response = response.trim();
    let start = response.find('{');
    let end = response.rfind('}');

    match (start, end) {
        (Some(s), Some(e)) if s < e => {
            let json_str = &response[s..=e];
            let classification: MerchantClassification = serde_json::from_str(json_str)
                .map_err(|e| {
                    Error::Classification(format!(
                        "invalid JSON from model: {} | Raw: {}",
                        e,
                        preview(json_str)
                    ))
                })?;
            if classification.category.trim().is_empty() {
                return Err(Error::Classification("model returned no category".into()));
            }
            Ok(classification)
        }
        _ => Err(Error::Classification(format!(
            "no JSON found in model response | Raw: {}",
            preview(response)
        ))),
    }
}
