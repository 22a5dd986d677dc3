//! Vector retrieval through the embedding API and the index adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::post, Json, Router};

use tributary::config::{
    Config, EmbeddingConfig, PipelineConfig, VectorIndexConfig, VectorMetric,
};
use tributary::embedding::ApiEmbeddingProvider;
use tributary::error::RetrievalError;
use tributary::retrieval::Neighbor;
use tributary::search::{SearchPipeline, SearchRequest};
use tributary::{QdrantIndex, RetrievalMode, SourceBackend, VectorBackend, VectorIndex};

/// Brute-force index over a handful of unit vectors.
struct MemoryIndex {
    docs: Vec<(&'static str, [f32; 2], &'static str)>,
    metric: VectorMetric,
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<Neighbor>, RetrievalError> {
        Ok(self
            .docs
            .iter()
            .map(|(id, v, passage)| {
                let value = match self.metric {
                    VectorMetric::Euclid => {
                        ((v[0] - vector[0]).powi(2) + (v[1] - vector[1]).powi(2)).sqrt()
                    }
                    _ => v[0] * vector[0] + v[1] * vector[1],
                };
                Neighbor {
                    doc_id: id.to_string(),
                    distance: value,
                    passage: Some(passage.to_string()),
                }
            })
            .take(limit)
            .collect())
    }

    fn metric(&self) -> VectorMetric {
        self.metric
    }
}

async fn embedding_server() -> String {
    let router = Router::new().route(
        "/embeddings",
        post(|| async {
            Json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0], "index": 0}]
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn embedder(base_url: String) -> Arc<ApiEmbeddingProvider> {
    Arc::new(ApiEmbeddingProvider::from_config(
        &EmbeddingConfig {
            base_url,
            api_key: Some("test-key".to_string()),
            timeout_secs: 2,
            ..Default::default()
        },
        reqwest::Client::new(),
    ))
}

fn docs() -> Vec<(&'static str, [f32; 2], &'static str)> {
    vec![
        ("far", [0.0, 1.0], "an unrelated passage"),
        ("near", [1.0, 0.0], "the closest passage"),
        ("mid", [0.7, 0.7], "a somewhat related passage"),
    ]
}

#[tokio::test]
async fn test_indexes_with_different_metrics_fuse() {
    let embedder = embedder(embedding_server().await);

    let cosine = VectorBackend::new(
        "cosine",
        0,
        embedder.clone(),
        Arc::new(MemoryIndex {
            docs: docs(),
            metric: VectorMetric::Cosine,
        }),
    );
    let euclid = VectorBackend::new(
        "euclid",
        1,
        embedder,
        Arc::new(MemoryIndex {
            docs: docs(),
            metric: VectorMetric::Euclid,
        }),
    );

    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(euclid.source(), Arc::new(euclid), Duration::from_secs(2))
        .backend(SourceBackend::Vector(0), Arc::new(cosine), Duration::from_secs(2))
        .build();

    let response = pipeline
        .search(SearchRequest::new("closest").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap();

    let ids: Vec<_> = response.results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["near", "mid", "far"]);
    assert!((response.results[0].score - 2.0 / 61.0).abs() < 1e-7);
    assert_eq!(response.stats.backends_succeeded, vec!["cosine", "euclid"]);
    assert_eq!(response.results[0].snippet, "the closest passage");
}

#[tokio::test]
async fn test_unreachable_qdrant_is_absorbed() {
    let embedder = embedder(embedding_server().await);

    let reachable = VectorBackend::new(
        "memory",
        0,
        embedder.clone(),
        Arc::new(MemoryIndex {
            docs: docs(),
            metric: VectorMetric::Cosine,
        }),
    );
    let unreachable = VectorBackend::new(
        "qdrant",
        1,
        embedder,
        Arc::new(QdrantIndex::new(VectorIndexConfig {
            url: "http://127.0.0.1:1".to_string(),
            collection: "passages".to_string(),
            timeout_ms: 500,
            ..Default::default()
        })),
    );

    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(SourceBackend::Vector(0), Arc::new(reachable), Duration::from_secs(2))
        .backend(SourceBackend::Vector(1), Arc::new(unreachable), Duration::from_secs(2))
        .build();

    let response = pipeline
        .search(SearchRequest::new("closest").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap();

    assert_eq!(response.results[0].doc_id, "near");
    assert_eq!(response.stats.backend_failures.len(), 1);
    assert_eq!(response.stats.backend_failures[0].backend, "qdrant");
}

#[tokio::test]
async fn test_embedding_outage_fails_vector_search() {
    let embedder = embedder("http://127.0.0.1:1".to_string());
    let backend = VectorBackend::new(
        "memory",
        0,
        embedder,
        Arc::new(MemoryIndex {
            docs: docs(),
            metric: VectorMetric::Cosine,
        }),
    );
    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(SourceBackend::Vector(0), Arc::new(backend), Duration::from_secs(2))
        .build();

    let err = pipeline
        .search(SearchRequest::new("closest").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.kind(), tributary::ErrorKind::AllBackendsUnavailable);
}

#[tokio::test]
#[ignore = "requires a running Qdrant instance and an embedding API"]
async fn test_live_vector_search_from_config() {
    let mut config = Config::default();
    config.lexical.enabled = false;
    config.expansion.enabled = false;
    config.vector.push(VectorIndexConfig {
        collection: "passages".to_string(),
        ..Default::default()
    });

    let pipeline = SearchPipeline::from_config(&config).await.unwrap();
    let response = pipeline
        .search(SearchRequest::new("what is rust").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap();
    assert!(response.results.len() <= config.pipeline.default_top_k);
}
