//! Vector backend: query embedding plus nearest-neighbour search.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{ScoredPoint, SearchPointsBuilder, Value};
use qdrant_client::Qdrant;

use crate::config::{resolve_secret, VectorIndexConfig, VectorMetric};
use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::handles::SharedHandle;
use crate::metrics::get_metrics;

use super::{
    assign_ranks, check_request, Candidate, RetrievalBackend, RetrievalMode, SourceBackend,
};

/// One nearest-neighbour hit as reported by the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub doc_id: String,
    /// Raw value from the index; its direction depends on the metric
    pub distance: f32,
    pub passage: Option<String>,
}

impl VectorMetric {
    /// Convert a raw index value to a higher-is-better similarity.
    pub fn to_similarity(self, raw: f32) -> f32 {
        match self {
            VectorMetric::Cosine | VectorMetric::Dot => raw,
            VectorMetric::Euclid | VectorMetric::Manhattan => -raw,
        }
    }
}

/// A nearest-neighbour index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `limit` neighbours of `vector`, best first.
    async fn search(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<Neighbor>, RetrievalError>;

    /// Metric the index reports values in.
    fn metric(&self) -> VectorMetric;
}

/// Adapter from a [`VectorIndex`] to a [`RetrievalBackend`].
pub struct VectorBackend {
    name: String,
    position: usize,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl VectorBackend {
    /// Create the adapter for the vector index at `position`.
    pub fn new(
        name: impl Into<String>,
        position: usize,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            embedder,
            index,
        }
    }

    /// Source identity of this backend.
    pub fn source(&self) -> SourceBackend {
        SourceBackend::Vector(self.position)
    }
}

#[async_trait]
impl RetrievalBackend for VectorBackend {
    async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        check_request(query, limit)?;
        if mode != RetrievalMode::VectorTopK {
            return Err(RetrievalError::UnsupportedMode(mode.to_string()));
        }

        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| RetrievalError::BackendUnreachable(format!("query embedding failed: {e}")))?;

        let metric = self.index.metric();
        let mut hits: Vec<(String, f32, Option<String>)> = self
            .index
            .search(vector, limit)
            .await?
            .into_iter()
            .filter(|n| n.distance.is_finite())
            .map(|n| (n.doc_id, metric.to_similarity(n.distance), n.passage))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));

        tracing::debug!(backend = %self.name, hits = hits.len(), "Vector search complete");

        Ok(assign_ranks(self.source(), hits, limit))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, mode: RetrievalMode) -> bool {
        mode == RetrievalMode::VectorTopK
    }
}

/// A Qdrant collection.
///
/// The client is created on the first search and shared afterwards.
pub struct QdrantIndex {
    config: VectorIndexConfig,
    client: SharedHandle<Qdrant>,
}

impl QdrantIndex {
    /// Create an index handle. No connection is made until the first search.
    pub fn new(config: VectorIndexConfig) -> Self {
        Self {
            config,
            client: SharedHandle::new("qdrant"),
        }
    }

    async fn client(&self) -> Result<Arc<Qdrant>, RetrievalError> {
        self.client
            .get_or_try_init(|| async {
                let api_key = resolve_secret(
                    self.config.api_key.as_deref(),
                    self.config.api_key_env.as_deref(),
                );
                Qdrant::from_url(&self.config.url)
                    .api_key(api_key)
                    .timeout(Duration::from_millis(self.config.timeout_ms))
                    .build()
                    .map_err(|e| RetrievalError::BackendUnreachable(e.to_string()))
            })
            .await
    }

    fn doc_id(&self, point: &ScoredPoint) -> Option<String> {
        if let Some(value) = point.payload.get(&self.config.doc_id_field) {
            if let Some(id) = payload_to_string(value) {
                return Some(id);
            }
        }
        match point.id.as_ref()?.point_id_options.as_ref()? {
            PointIdOptions::Num(n) => Some(n.to_string()),
            PointIdOptions::Uuid(s) => Some(s.clone()),
        }
    }

    /// Convert scored points, dropping and counting those without a doc id.
    fn neighbors(&self, points: &[ScoredPoint]) -> Vec<Neighbor> {
        let mut skipped = 0usize;
        let neighbors: Vec<Neighbor> = points
            .iter()
            .filter_map(|point| {
                let Some(doc_id) = self.doc_id(point) else {
                    skipped += 1;
                    return None;
                };
                let passage = point
                    .payload
                    .get(&self.config.text_field)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                Some(Neighbor {
                    doc_id,
                    distance: point.score,
                    passage,
                })
            })
            .collect();

        if skipped > 0 {
            tracing::warn!(
                collection = %self.config.collection,
                dropped = skipped,
                "Dropping points without a usable doc id"
            );
            get_metrics().record_malformed(&self.config.collection, skipped);
        }
        neighbors
    }
}

fn payload_to_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| value.as_integer().map(|n| n.to_string()))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<Neighbor>, RetrievalError> {
        let client = self.client().await?;

        let mut builder = SearchPointsBuilder::new(&self.config.collection, vector, limit as u64)
            .with_payload(true);
        if let Some(name) = &self.config.vector_name {
            builder = builder.vector_name(name.clone());
        }

        let response = client
            .search_points(builder)
            .await
            .map_err(|e| RetrievalError::BackendUnreachable(e.to_string()))?;

        Ok(self.neighbors(&response.result))
    }

    fn metric(&self) -> VectorMetric {
        self.config.metric
    }
}
