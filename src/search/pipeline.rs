//! The search pipeline.
//!
//! One request runs through
//! `Received → Expanding → Retrieving → Fusing → Reranking → Highlighting → Assembled`.
//! Backends are queried concurrently, each under its own timeout. A failed
//! or timed-out backend is left out of fusion; the request only fails when
//! the query is invalid or no backend answered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::config::{expand_path, Config, PipelineConfig};
use crate::embedding::{ApiEmbeddingProvider, EmbeddingProvider};
use crate::error::{RetrievalError, Result, SearchError};
use crate::handles::http_client;
use crate::metrics::{get_metrics, Metrics};
use crate::passages::{PassageStore, TsvPassageStore};
use crate::retrieval::{
    Candidate, LexicalBackend, QdrantIndex, RetrievalBackend, RetrievalMode, SourceBackend,
    VectorBackend,
};

use super::{
    highlight, rrf_fuse, BackendFailure, ExpandedQuery, ExpansionOutcome, FusedResult,
    LlmQueryExpander, PipelineStage, QueryExpander, RerankGateway, ResultItem, SearchRequest,
    SearchResponse, SearchStats,
};

/// A backend registered with the pipeline.
#[derive(Clone)]
pub struct BackendSlot {
    pub source: SourceBackend,
    pub backend: Arc<dyn RetrievalBackend>,
    pub timeout: Duration,
}

/// Outcome of one dispatched backend call.
struct BackendOutcome {
    source: SourceBackend,
    name: String,
    elapsed: Duration,
    result: std::result::Result<Vec<Candidate>, RetrievalError>,
}

/// The search orchestrator.
pub struct SearchPipeline {
    settings: PipelineConfig,
    expander: Option<Arc<dyn QueryExpander>>,
    backends: Vec<BackendSlot>,
    reranker: Option<RerankGateway>,
    passages: Option<Arc<dyn PassageStore>>,
}

impl SearchPipeline {
    /// Start building a pipeline.
    pub fn builder(settings: PipelineConfig) -> SearchPipelineBuilder {
        SearchPipelineBuilder {
            settings,
            expander: None,
            backends: Vec::new(),
            reranker: None,
            passages: None,
        }
    }

    /// Build the full pipeline described by `config`.
    ///
    /// No connection is opened here; every external handle is created on
    /// first use.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let client = http_client().await.map_err(|e| {
            crate::error::ConfigError::Invalid(format!("failed to build HTTP client: {}", e))
        })?;

        let mut builder = Self::builder(config.pipeline.clone());

        if config.expansion.enabled {
            builder = builder.expander(Arc::new(LlmQueryExpander::from_config(
                &config.expansion,
                client.clone(),
            )));
        }

        if config.lexical.enabled {
            builder = builder.backend(
                SourceBackend::Lexical,
                Arc::new(LexicalBackend::new(&config.lexical)),
                Duration::from_millis(config.lexical.timeout_ms),
            );
        }

        if !config.vector.is_empty() {
            let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
                ApiEmbeddingProvider::from_config(&config.embedding, client.clone()),
            );
            for (position, index_config) in config.vector.iter().enumerate() {
                let backend = VectorBackend::new(
                    index_config.display_name(position),
                    position,
                    Arc::clone(&embedder),
                    Arc::new(QdrantIndex::new(index_config.clone())),
                );
                builder = builder.backend(
                    SourceBackend::Vector(position),
                    Arc::new(backend),
                    Duration::from_millis(index_config.timeout_ms),
                );
            }
        }

        if config.reranking.enabled {
            builder = builder.reranker(RerankGateway::from_config(&config.reranking, client));
        }

        let collection = config
            .passages
            .collection_path
            .as_deref()
            .or(config.lexical.enabled.then_some(config.lexical.collection_path.as_str()));
        if let Some(path) = collection {
            let store = TsvPassageStore::new(expand_path(path));
            if let Err(e) = store.warm().await {
                tracing::warn!(error = %e, "Passage collection unavailable, snippets may be empty");
            }
            builder = builder.passages(Arc::new(store));
        }

        Ok(builder.build())
    }

    /// Names of the registered backends, in source order.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends
            .iter()
            .map(|slot| slot.backend.name().to_string())
            .collect()
    }

    /// Pipeline settings.
    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    /// Run one search request.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let metrics = get_metrics();
        metrics.search_requests_total.inc();
        let _timer = Metrics::start_timer(&metrics.search_duration_seconds);

        let result = self.execute(request).await;
        if let Err(e) = &result {
            metrics.search_failures_total.inc();
            tracing::warn!(stage = %PipelineStage::Failed, error = %e, "Search failed");
        }
        result
    }

    async fn execute(&self, request: SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();

        // Received
        if request.query.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query must not be empty".to_string()).into());
        }
        let top_k = match request.top_k {
            Some(0) => {
                return Err(SearchError::InvalidQuery("topK must be > 0".to_string()).into());
            }
            Some(k) => k.min(self.settings.max_top_k),
            None => self.settings.default_top_k,
        };
        let mode = request.mode.unwrap_or(self.settings.default_mode);
        let mut stats = SearchStats {
            mode,
            top_k,
            ..Default::default()
        };
        tracing::debug!(stage = %PipelineStage::Received, %mode, top_k, "Search request");

        // Expanding
        let expanded = self.expand(&request, &mut stats).await?;

        // Retrieving
        let limit = top_k.saturating_mul(self.settings.fetch_multiplier.max(1));
        let lists = self
            .retrieve(&expanded.text, mode, limit, &mut stats)
            .await?;

        // Fusing
        let fused = rrf_fuse(&lists, self.settings.rrf_k);
        stats.fused_count = fused.len();
        tracing::debug!(stage = %PipelineStage::Fusing, fused = fused.len(), "Fused candidates");

        let head: Vec<&FusedResult> = fused.iter().take(top_k).collect();
        let passages = self.resolve_passages(&lists, &head).await;

        // Reranking
        let ordered = self
            .rerank(&request, &expanded, &head, &passages, top_k, &mut stats)
            .await;

        // Highlighting
        let terms = expanded.highlight_terms();
        tracing::debug!(stage = %PipelineStage::Highlighting, terms = terms.len(), "Building snippets");
        let results: Vec<ResultItem> = ordered
            .into_iter()
            .map(|(doc_id, score)| {
                let passage = passages.get(&doc_id).map(String::as_str).unwrap_or("");
                ResultItem {
                    snippet: highlight(passage, &terms, self.settings.highlight_window),
                    doc_id,
                    score,
                }
            })
            .collect();

        // Assembled
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(
            stage = %PipelineStage::Assembled,
            results = results.len(),
            failed_backends = stats.backend_failures.len(),
            elapsed_ms,
            "Search complete"
        );
        Ok(SearchResponse {
            results,
            processing_time_ms: elapsed_ms,
            expanded_query: expanded.was_expanded.then(|| expanded.text.clone()),
            stats,
        })
    }

    async fn expand(
        &self,
        request: &SearchRequest,
        stats: &mut SearchStats,
    ) -> Result<ExpandedQuery> {
        let expander = match &self.expander {
            Some(expander) if request.expand != Some(false) => expander,
            _ => {
                stats.expansion = ExpansionOutcome::Skipped;
                return Ok(ExpandedQuery::unchanged(&request.query));
            }
        };

        tracing::debug!(stage = %PipelineStage::Expanding, expander = expander.name(), "Expanding query");
        match expander.expand(&request.query).await {
            Ok(expanded) => {
                stats.expansion = ExpansionOutcome::Expanded;
                Ok(expanded)
            }
            Err(e) => {
                get_metrics().expansion_failures_total.inc();
                if self.settings.strict_expansion {
                    return Err(SearchError::ExpansionFailed(e).into());
                }
                tracing::warn!(error = %e, "Query expansion failed, using the raw query");
                get_metrics().expansion_fallbacks_total.inc();
                stats.expansion = ExpansionOutcome::Fallback;
                Ok(ExpandedQuery::unchanged(&request.query))
            }
        }
    }

    /// Dispatch every backend that serves `mode` and collect the successful lists.
    async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        limit: usize,
        stats: &mut SearchStats,
    ) -> Result<HashMap<SourceBackend, Vec<Candidate>>> {
        let dispatched: Vec<(&BackendSlot, RetrievalMode)> = self
            .backends
            .iter()
            .filter_map(|slot| {
                let backend_mode = match slot.source {
                    SourceBackend::Lexical => mode,
                    SourceBackend::Vector(_) => RetrievalMode::VectorTopK,
                };
                slot.backend
                    .supports(backend_mode)
                    .then_some((slot, backend_mode))
            })
            .collect();

        if dispatched.is_empty() {
            return Err(SearchError::NoBackends(mode.to_string()).into());
        }
        stats.backends_queried = dispatched
            .iter()
            .map(|(slot, _)| slot.backend.name().to_string())
            .collect();
        tracing::debug!(
            stage = %PipelineStage::Retrieving,
            backends = dispatched.len(),
            limit,
            "Dispatching backends"
        );

        let calls = dispatched.into_iter().map(|(slot, backend_mode)| async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(
                slot.timeout,
                slot.backend.retrieve(query, backend_mode, limit),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RetrievalError::BackendTimeout(slot.timeout.as_millis() as u64)),
            };
            BackendOutcome {
                source: slot.source,
                name: slot.backend.name().to_string(),
                elapsed: started.elapsed(),
                result,
            }
        });
        let outcomes = join_all(calls).await;

        let metrics = get_metrics();
        let mut lists = HashMap::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            metrics
                .retrieval_duration_seconds
                .with_label_values(&[outcome.name.as_str()])
                .observe(outcome.elapsed.as_secs_f64());

            match outcome.result {
                Ok(candidates) => {
                    tracing::debug!(
                        backend = %outcome.name,
                        candidates = candidates.len(),
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Backend returned"
                    );
                    metrics
                        .backend_candidates_total
                        .with_label_values(&[outcome.name.as_str()])
                        .inc_by(candidates.len() as u64);
                    stats.candidates_retrieved += candidates.len();
                    stats.backends_succeeded.push(outcome.name);
                    lists.insert(outcome.source, candidates);
                }
                Err(e) => {
                    tracing::warn!(
                        backend = %outcome.name,
                        kind = e.label(),
                        error = %e,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Backend failed"
                    );
                    metrics.record_backend_failure(&outcome.name, e.label());
                    stats.backend_failures.push(BackendFailure {
                        backend: outcome.name.clone(),
                        kind: e.label().to_string(),
                        message: e.to_string(),
                    });
                    failures.push((outcome.name, e));
                }
            }
        }

        if lists.is_empty() {
            return Err(SearchError::AllBackendsUnavailable(failures).into());
        }
        Ok(lists)
    }

    /// Passage text for the head, from backend output first, then the store.
    async fn resolve_passages(
        &self,
        lists: &HashMap<SourceBackend, Vec<Candidate>>,
        head: &[&FusedResult],
    ) -> HashMap<String, String> {
        let mut sources: Vec<&SourceBackend> = lists.keys().collect();
        sources.sort();

        let mut passages: HashMap<String, String> = HashMap::new();
        for source in sources {
            for candidate in &lists[source] {
                if let Some(text) = &candidate.passage {
                    passages
                        .entry(candidate.doc_id.clone())
                        .or_insert_with(|| text.clone());
                }
            }
        }

        let missing: Vec<String> = head
            .iter()
            .filter(|r| !passages.contains_key(&r.doc_id))
            .map(|r| r.doc_id.clone())
            .collect();
        if missing.is_empty() {
            return passages;
        }

        if let Some(store) = &self.passages {
            match store.get_many(&missing).await {
                Ok(found) => {
                    for (doc_id, text) in missing.into_iter().zip(found) {
                        if let Some(text) = text {
                            passages.insert(doc_id, text);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Passage lookup failed, snippets will be empty");
                }
            }
        }
        passages
    }

    /// Final `(doc_id, score)` order for the head.
    ///
    /// Reranked documents come first in rerank order; head documents beyond
    /// the rerank budget follow in fused order. Any rerank failure keeps the
    /// fused order.
    async fn rerank(
        &self,
        request: &SearchRequest,
        expanded: &ExpandedQuery,
        head: &[&FusedResult],
        passages: &HashMap<String, String>,
        top_k: usize,
        stats: &mut SearchStats,
    ) -> Vec<(String, f32)> {
        let fused_order: Vec<(String, f32)> = head
            .iter()
            .map(|r| (r.doc_id.clone(), r.fused_score))
            .collect();

        let gateway = match &self.reranker {
            Some(gateway) if request.rerank != Some(false) && !head.is_empty() => gateway,
            _ => return fused_order,
        };

        let inputs: Vec<(String, String)> = head
            .iter()
            .map(|r| {
                let passage = passages.get(&r.doc_id).cloned().unwrap_or_default();
                (r.doc_id.clone(), passage)
            })
            .collect();

        tracing::debug!(
            stage = %PipelineStage::Reranking,
            reranker = gateway.name(),
            candidates = gateway.rerank_len(top_k, inputs.len()),
            "Reranking"
        );
        let metrics = get_metrics();
        let timer = Metrics::start_timer(&metrics.rerank_duration_seconds);
        let outcome = gateway.rerank(&expanded.corrected, &inputs, top_k).await;
        drop(timer);

        match outcome {
            Ok(reranked) => {
                stats.reranked = true;
                let reranked_len = reranked.len();
                stats.reranked_count = reranked_len;
                let mut ordered: Vec<(String, f32)> = reranked
                    .into_iter()
                    .map(|r| (r.doc_id, r.rerank_score))
                    .collect();
                ordered.extend(fused_order.into_iter().skip(reranked_len));
                ordered
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reranking failed, keeping fused order");
                metrics.rerank_failures_total.inc();
                stats.rerank_error = Some(e.to_string());
                fused_order
            }
        }
    }
}

/// Builder for [`SearchPipeline`].
pub struct SearchPipelineBuilder {
    settings: PipelineConfig,
    expander: Option<Arc<dyn QueryExpander>>,
    backends: Vec<BackendSlot>,
    reranker: Option<RerankGateway>,
    passages: Option<Arc<dyn PassageStore>>,
}

impl SearchPipelineBuilder {
    /// Set the query expander.
    pub fn expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Register a retrieval backend. Registering a source twice replaces it.
    pub fn backend(
        mut self,
        source: SourceBackend,
        backend: Arc<dyn RetrievalBackend>,
        timeout: Duration,
    ) -> Self {
        self.backends.retain(|slot| slot.source != source);
        self.backends.push(BackendSlot {
            source,
            backend,
            timeout,
        });
        self
    }

    /// Set the reranking gateway.
    pub fn reranker(mut self, reranker: RerankGateway) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Set the passage store.
    pub fn passages(mut self, passages: Arc<dyn PassageStore>) -> Self {
        self.passages = Some(passages);
        self
    }

    /// Build the pipeline.
    pub fn build(mut self) -> SearchPipeline {
        self.backends.sort_by_key(|slot| slot.source);
        SearchPipeline {
            settings: self.settings,
            expander: self.expander,
            backends: self.backends,
            reranker: self.reranker,
            passages: self.passages,
        }
    }
}
