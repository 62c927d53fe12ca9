//! Ollama backend implementation
//!
//! HTTP client for the Ollama generate API. The prompt lists the known
//! categories and asks for a single JSON object back.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::parsing::parse_classification;
use super::types::MerchantClassification;
use super::AIBackend;

/// Default model when `OLLAMA_MODEL` is not set
pub const DEFAULT_MODEL: &str = "llama3.2";

#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Some(Self::new(&host, &model))
    }
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

fn classification_prompt(merchant: &str, categories: &[String]) -> String {
    format!(
        "You categorize entries of German bank and credit card statements.\n\
         Vendor: {merchant}\n\
         Pick exactly one category from this list: {}.\n\
         Reply with JSON only: {{\"merchant\": \"<clean vendor name>\", \"category\": \"<category>\"}}",
        categories.join(", ")
    )
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn classify_merchant(
        &self,
        merchant: &str,
        categories: &[String],
    ) -> Result<MerchantClassification> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: classification_prompt(merchant, categories),
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Classification(format!(
                "Ollama returned HTTP {}",
                status
            )));
        }

        let ollama_response: OllamaResponse = response.json().await?;
        debug!("Ollama response: {}", ollama_response.response);

        parse_classification(&ollama_response.response)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let backend = OllamaBackend::new("http://localhost:11434/", "llama3.2");
        assert_eq!(backend.host(), "http://localhost:11434");
        assert_eq!(backend.model(), "llama3.2");
    }

    #[test]
    fn test_prompt_lists_categories() {
        let prompt = classification_prompt(
            "REWE",
            &["Groceries".to_string(), "Dining".to_string()],
        );
        assert!(prompt.contains("Vendor: REWE"));
        assert!(prompt.contains("Groceries, Dining"));
        assert!(prompt.contains("\"category\""));
    }
}
