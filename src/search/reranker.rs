//! Cross-encoder reranking of the fused head.
//!
//! A [`Reranker`] scores `(query, passage)` pairs. [`RerankGateway`] decides
//! which fused candidates are sent, enforces the per-call timeout and turns
//! the scores into an ordering. Reranking only reorders: every output doc id
//! comes from the input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{resolve_secret, RerankConfig};
use crate::error::RerankError;

use super::RerankedResult;

/// Trait for passage scorers.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each passage against the query, one score per passage, in order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError>;

    /// Get the name of this reranker.
    fn name(&self) -> &str;
}

/// Cross-encoder served over HTTP.
///
/// Posts `{"query": …, "documents": […]}` and accepts either
/// `{"scores": […]}` or the indexed form
/// `{"results": [{"index": 0, "relevance_score": 0.9}, …]}`.
pub struct CrossEncoderReranker {
    /// API endpoint for cross-encoder
    api_url: String,
    /// API key
    api_key: Option<String>,
    /// HTTP client
    client: reqwest::Client,
}

impl CrossEncoderReranker {
    /// Create a new cross-encoder reranker.
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, client: reqwest::Client) -> Self {
        Self {
            api_url: api_url.into(),
            api_key,
            client,
        }
    }

    /// Create a reranker from configuration.
    pub fn from_config(config: &RerankConfig, client: reqwest::Client) -> Self {
        let api_key = resolve_secret(config.api_key.as_deref(), config.api_key_env.as_deref());
        Self::new(config.url.clone(), api_key, client)
    }
}

#[derive(Serialize)]
struct CrossEncoderRequest<'a> {
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CrossEncoderResponse {
    Scores { scores: Vec<f32> },
    Indexed { results: Vec<IndexedScore> },
}

#[derive(Deserialize)]
struct IndexedScore {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}

impl CrossEncoderResponse {
    fn into_scores(self, expected: usize) -> Result<Vec<f32>, RerankError> {
        match self {
            CrossEncoderResponse::Scores { scores } => Ok(scores),
            CrossEncoderResponse::Indexed { results } => {
                let mut scores = vec![None; expected];
                for item in results {
                    let slot = scores.get_mut(item.index).ok_or_else(|| {
                        RerankError::MalformedResponse(format!(
                            "result index {} out of range",
                            item.index
                        ))
                    })?;
                    if slot.replace(item.relevance_score).is_some() {
                        return Err(RerankError::MalformedResponse(format!(
                            "duplicate result index {}",
                            item.index
                        )));
                    }
                }
                scores
                    .into_iter()
                    .collect::<Option<Vec<f32>>>()
                    .ok_or_else(|| RerankError::MalformedResponse("missing result index".into()))
            }
        }
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
        if passages.is_empty() {
            return Ok(vec![]);
        }

        let request = CrossEncoderRequest {
            query,
            documents: passages,
        };

        let mut req_builder = self.client.post(&self.api_url).json(&request);
        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let response = req_builder.send().await.map_err(|e| {
            RerankError::ServiceUnavailable(format!("Cross-encoder API error: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(RerankError::ServiceUnavailable(format!(
                "Cross-encoder API returned status: {}",
                response.status()
            )));
        }

        let parsed: CrossEncoderResponse = response.json().await.map_err(|e| {
            RerankError::MalformedResponse(format!("Failed to parse response: {}", e))
        })?;

        parsed.into_scores(passages.len())
    }

    fn name(&self) -> &str {
        "cross_encoder"
    }
}

/// Applies a [`Reranker`] to the head of a fused list.
#[derive(Clone)]
pub struct RerankGateway {
    reranker: Arc<dyn Reranker>,
    budget: usize,
    timeout: Duration,
}

impl RerankGateway {
    pub fn new(reranker: Arc<dyn Reranker>, budget: usize, timeout: Duration) -> Self {
        Self {
            reranker,
            budget,
            timeout,
        }
    }

    /// Create a gateway from configuration.
    pub fn from_config(config: &RerankConfig, client: reqwest::Client) -> Self {
        Self::new(
            Arc::new(CrossEncoderReranker::from_config(config, client)),
            config.budget,
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Number of head candidates that will be reranked.
    pub fn rerank_len(&self, top_k: usize, available: usize) -> usize {
        top_k.min(available).min(self.budget)
    }

    /// Rerank the first `min(top_k, candidates.len(), budget)` candidates.
    ///
    /// `candidates` holds `(doc_id, passage)` pairs in fused order.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[(String, String)],
        top_k: usize,
    ) -> Result<Vec<RerankedResult>, RerankError> {
        let head = &candidates[..self.rerank_len(top_k, candidates.len())];
        if head.is_empty() {
            return Ok(vec![]);
        }

        let passages: Vec<String> = head.iter().map(|(_, p)| p.clone()).collect();
        let scores = tokio::time::timeout(self.timeout, self.reranker.score(query, &passages))
            .await
            .map_err(|_| RerankError::Timeout(self.timeout.as_millis() as u64))??;

        if scores.len() != head.len() {
            return Err(RerankError::MalformedResponse(format!(
                "expected {} scores, got {}",
                head.len(),
                scores.len()
            )));
        }

        let doc_ids: Vec<&str> = head.iter().map(|(id, _)| id.as_str()).collect();
        Ok(order_by_scores(&doc_ids, &scores))
    }

    pub fn name(&self) -> &str {
        self.reranker.name()
    }
}

/// Order doc ids by score, highest first.
///
/// The sort is stable, so equal scores keep their fused order. NaN scores
/// sort last.
pub fn order_by_scores(doc_ids: &[&str], scores: &[f32]) -> Vec<RerankedResult> {
    let mut results: Vec<RerankedResult> = doc_ids
        .iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (id, &score))| RerankedResult {
            doc_id: id.to_string(),
            rerank_score: score,
            original_fused_rank: i + 1,
        })
        .collect();

    results.sort_by(|a, b| match (a.rerank_score.is_nan(), b.rerank_score.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => b.rerank_score.total_cmp(&a.rerank_score),
    });
    results
}
