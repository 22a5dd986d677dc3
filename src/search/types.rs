//! Request, response and intermediate result types for the search pipeline.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::retrieval::{RetrievalMode, SourceBackend};

/// One document after rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub doc_id: String,
    /// Sum of the document's RRF contributions
    pub fused_score: f32,
    /// Sources that returned the document
    pub contributing_sources: BTreeSet<SourceBackend>,
    /// Best (lowest) rank across contributing sources
    pub best_rank: usize,
}

/// One document after cross-encoder reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedResult {
    pub doc_id: String,
    pub rerank_score: f32,
    /// 1-based position in the fused list
    pub original_fused_rank: usize,
}

/// Inbound search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Raw user query
    pub query: String,
    /// Retrieval mode (defaults to the configured mode)
    #[serde(default)]
    pub mode: Option<RetrievalMode>,
    /// Number of results (defaults to the configured value)
    #[serde(default, alias = "top_k")]
    pub top_k: Option<usize>,
    /// Set to `false` to skip query expansion
    #[serde(default)]
    pub expand: Option<bool>,
    /// Set to `false` to skip reranking
    #[serde(default)]
    pub rerank: Option<bool>,
}

impl SearchRequest {
    /// Create a request with default options.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Set the retrieval mode.
    pub fn mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the number of results.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Enable or disable query expansion for this request.
    pub fn expand(mut self, expand: bool) -> Self {
        self.expand = Some(expand);
        self
    }

    /// Enable or disable reranking for this request.
    pub fn rerank(mut self, rerank: bool) -> Self {
        self.rerank = Some(rerank);
        self
    }
}

/// One entry of the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub doc_id: String,
    /// Cross-encoder score for the first `stats.reranked_count` results,
    /// RRF score for the rest. The two scales are not comparable.
    pub score: f32,
    pub snippet: String,
}

/// Outbound search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<ResultItem>,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded_query: Option<String>,
    pub stats: SearchStats,
}

/// What happened to the query before retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionOutcome {
    /// Expanded by the rewriting service
    Expanded,
    /// Expansion failed and the raw query was used
    Fallback,
    /// Expansion was disabled
    #[default]
    Skipped,
}

/// A backend that did not contribute to the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendFailure {
    pub backend: String,
    pub kind: String,
    pub message: String,
}

/// Per-request execution statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub mode: RetrievalMode,
    pub top_k: usize,
    pub expansion: ExpansionOutcome,
    pub backends_queried: Vec<String>,
    pub backends_succeeded: Vec<String>,
    pub backend_failures: Vec<BackendFailure>,
    pub candidates_retrieved: usize,
    pub fused_count: usize,
    pub reranked: bool,
    /// Leading results whose score came from the reranker.
    pub reranked_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_error: Option<String>,
}

/// Stages of one pipeline execution, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Expanding,
    Retrieving,
    Fusing,
    Reranking,
    Highlighting,
    Assembled,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Received => "received",
            PipelineStage::Expanding => "expanding",
            PipelineStage::Retrieving => "retrieving",
            PipelineStage::Fusing => "fusing",
            PipelineStage::Reranking => "reranking",
            PipelineStage::Highlighting => "highlighting",
            PipelineStage::Assembled => "assembled",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}
