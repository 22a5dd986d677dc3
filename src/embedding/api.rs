//! API-based embedding provider (OpenAI-compatible).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{resolve_secret, EmbeddingConfig};
use crate::error::{EmbeddingError, Result};

use super::EmbeddingProvider;

/// OpenAI-compatible API embedding provider.
pub struct ApiEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

/// OpenAI embedding request format.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_format: Option<&'a str>,
}

/// OpenAI embedding response format.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI error response format.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: ApiError,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub(crate) message: String,
}

impl ApiEmbeddingProvider {
    /// Create a provider from configuration, sharing the given HTTP client.
    ///
    /// The API key is optional so self-hosted OpenAI-compatible servers
    /// without auth work unchanged.
    pub fn from_config(config: &EmbeddingConfig, client: Client) -> Self {
        let api_key = resolve_secret(config.api_key.as_deref(), Some(&config.api_key_env));
        if api_key.is_none() {
            tracing::debug!(
                env = %config.api_key_env,
                "No embedding API key configured, sending unauthenticated requests"
            );
        }

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Make an embedding request to the API.
    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: Some("float"),
        };

        let mut builder = self.client.post(&url).timeout(self.timeout).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Api("Request timed out".to_string())
            } else if e.is_connect() {
                EmbeddingError::Api(format!("Connection failed: {}", e))
            } else {
                EmbeddingError::Api(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();

        if status.is_success() {
            let result: EmbeddingResponse = response.json().await.map_err(|e| {
                EmbeddingError::Api(format!("Failed to parse response: {}", e))
            })?;

            let mut embeddings = result.data;
            embeddings.sort_by_key(|d| d.index);

            Ok(embeddings.into_iter().map(|d| d.embedding).collect())
        } else if status.as_u16() == 429 {
            Err(EmbeddingError::RateLimited.into())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                Err(EmbeddingError::Api(format!(
                    "API error ({}): {}",
                    status, error_response.error.message
                ))
                .into())
            } else {
                Err(EmbeddingError::Api(format!("API error ({}): {}", status, error_text)).into())
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request_embeddings(texts).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}
