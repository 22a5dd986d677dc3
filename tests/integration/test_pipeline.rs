//! Pipeline behaviour with in-process backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tributary::config::PipelineConfig;
use tributary::error::{ExpansionError, RerankError, RetrievalError, SearchError};
use tributary::search::{
    ExpandedQuery, ExpansionOutcome, QueryExpander, RerankGateway, Reranker, SearchPipeline,
    SearchPipelineBuilder, SearchRequest,
};
use tributary::{
    Candidate, MemoryPassageStore, RetrievalBackend, RetrievalMode, SourceBackend, TributaryError,
};

/// Backend with a scripted outcome.
enum Script {
    Hits(Vec<(&'static str, Option<&'static str>)>),
    Fail(RetrievalError),
    Hang,
    Slow(Duration, &'static str),
}

struct ScriptedBackend {
    name: &'static str,
    source: SourceBackend,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(name: &'static str, source: SourceBackend, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name,
            source,
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RetrievalBackend for ScriptedBackend {
    async fn retrieve(
        &self,
        _query: &str,
        _mode: RetrievalMode,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Hits(hits) => Ok(hits
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, (id, passage))| Candidate {
                    doc_id: id.to_string(),
                    source: self.source,
                    rank: i + 1,
                    raw_score: 10.0 - i as f32,
                    passage: passage.map(str::to_string),
                })
                .collect()),
            Script::Fail(e) => Err(e.clone()),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(vec![])
            }
            Script::Slow(delay, id) => {
                tokio::time::sleep(*delay).await;
                Ok(vec![Candidate {
                    doc_id: id.to_string(),
                    source: self.source,
                    rank: 1,
                    raw_score: 1.0,
                    passage: None,
                }])
            }
        }
    }

    fn name(&self) -> &str {
        self.name
    }

    fn supports(&self, mode: RetrievalMode) -> bool {
        match self.source {
            SourceBackend::Lexical => mode.uses_lexical(),
            SourceBackend::Vector(_) => mode == RetrievalMode::VectorTopK,
        }
    }
}

struct StaticExpander;

#[async_trait]
impl QueryExpander for StaticExpander {
    async fn expand(&self, query: &str) -> Result<ExpandedQuery, ExpansionError> {
        ExpandedQuery::assemble(query, "machine learning", &["neural".to_string()], 2, 3)
    }

    fn name(&self) -> &str {
        "static"
    }
}

struct DownExpander;

#[async_trait]
impl QueryExpander for DownExpander {
    async fn expand(&self, _query: &str) -> Result<ExpandedQuery, ExpansionError> {
        Err(ExpansionError::Timeout(10_000))
    }

    fn name(&self) -> &str {
        "down"
    }
}

/// Scores passages by length, longest first.
struct LengthReranker;

#[async_trait]
impl Reranker for LengthReranker {
    async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
        Ok(passages.iter().map(|p| p.len() as f32).collect())
    }

    fn name(&self) -> &str {
        "length"
    }
}

struct BrokenReranker;

#[async_trait]
impl Reranker for BrokenReranker {
    async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>, RerankError> {
        Err(RerankError::ServiceUnavailable("connection refused".into()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn lexical(script: Script) -> Arc<ScriptedBackend> {
    ScriptedBackend::new("lexical", SourceBackend::Lexical, script)
}

fn dense(script: Script) -> Arc<ScriptedBackend> {
    ScriptedBackend::new("dense", SourceBackend::Vector(0), script)
}

fn builder(lexical: Arc<ScriptedBackend>, dense: Arc<ScriptedBackend>) -> SearchPipelineBuilder {
    SearchPipeline::builder(PipelineConfig::default())
        .backend(SourceBackend::Lexical, lexical, Duration::from_millis(500))
        .backend(SourceBackend::Vector(0), dense, Duration::from_millis(500))
}

fn ids(response: &tributary::SearchResponse) -> Vec<&str> {
    response.results.iter().map(|r| r.doc_id.as_str()).collect()
}

#[tokio::test]
async fn test_failed_backend_is_excluded_from_fusion() {
    let pipeline = builder(
        lexical(Script::Fail(RetrievalError::BackendUnreachable(
            "no such file".into(),
        ))),
        dense(Script::Hits(vec![("d1", None), ("d2", None)])),
    )
    .build();

    let response = pipeline.search(SearchRequest::new("q")).await.unwrap();
    assert_eq!(ids(&response), vec!["d1", "d2"]);
    assert!((response.results[0].score - 1.0 / 61.0).abs() < 1e-7);
    assert_eq!(response.stats.backends_succeeded, vec!["dense"]);
    assert_eq!(response.stats.backend_failures[0].backend, "lexical");
    assert_eq!(response.stats.backend_failures[0].kind, "unreachable");
}

#[tokio::test]
async fn test_partial_failure_still_answers() {
    let broken_vector = ScriptedBackend::new(
        "sparse",
        SourceBackend::Vector(1),
        Script::Fail(RetrievalError::BackendProtocolError("bad frame".into())),
    );
    let pipeline = builder(
        lexical(Script::Hits(vec![])),
        dense(Script::Hits(vec![("d1", None), ("d2", None)])),
    )
    .backend(
        SourceBackend::Vector(1),
        broken_vector,
        Duration::from_millis(500),
    )
    .build();

    let response = pipeline
        .search(SearchRequest::new("q").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap();

    assert_eq!(ids(&response), vec!["d1", "d2"]);
    assert_eq!(response.stats.backends_queried, vec!["dense", "sparse"]);
    assert_eq!(response.stats.backends_succeeded, vec!["dense"]);
    assert_eq!(response.stats.backend_failures.len(), 1);
    assert_eq!(response.stats.backend_failures[0].backend, "sparse");
    assert_eq!(response.stats.backend_failures[0].kind, "protocol");
}

#[tokio::test]
async fn test_hanging_backend_times_out() {
    let hanging = ScriptedBackend::new("slow", SourceBackend::Vector(1), Script::Hang);
    let pipeline = builder(
        lexical(Script::Hits(vec![])),
        dense(Script::Hits(vec![("d1", None)])),
    )
    .backend(SourceBackend::Vector(1), hanging, Duration::from_millis(50))
    .build();

    let started = std::time::Instant::now();
    let response = pipeline
        .search(SearchRequest::new("q").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(ids(&response), vec!["d1"]);
    assert_eq!(response.stats.backend_failures[0].kind, "timeout");
}

#[tokio::test]
async fn test_backends_are_queried_concurrently() {
    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(
            SourceBackend::Vector(0),
            ScriptedBackend::new(
                "first",
                SourceBackend::Vector(0),
                Script::Slow(Duration::from_millis(200), "a"),
            ),
            Duration::from_secs(1),
        )
        .backend(
            SourceBackend::Vector(1),
            ScriptedBackend::new(
                "second",
                SourceBackend::Vector(1),
                Script::Slow(Duration::from_millis(200), "b"),
            ),
            Duration::from_secs(1),
        )
        .build();

    let started = std::time::Instant::now();
    let response = pipeline
        .search(SearchRequest::new("q").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(350), "took {elapsed:?}");
    assert_eq!(response.stats.backends_succeeded, vec!["first", "second"]);
    assert_eq!(ids(&response), vec!["a", "b"]);
}

#[tokio::test]
async fn test_all_backends_failing_is_an_error() {
    let pipeline = builder(
        lexical(Script::Fail(RetrievalError::BackendUnreachable("down".into()))),
        dense(Script::Fail(RetrievalError::BackendTimeout(500))),
    )
    .build();

    let err = pipeline.search(SearchRequest::new("q")).await.unwrap_err();
    match &err {
        TributaryError::Search(SearchError::AllBackendsUnavailable(failures)) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].0, "lexical");
            assert_eq!(failures[1].0, "dense");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_empty_results_are_not_an_error() {
    let pipeline = builder(lexical(Script::Hits(vec![])), dense(Script::Hits(vec![]))).build();
    let response = pipeline.search(SearchRequest::new("q")).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.stats.backends_succeeded, vec!["lexical", "dense"]);
    assert_eq!(response.stats.fused_count, 0);
}

#[tokio::test]
async fn test_expansion_failure_falls_back_to_raw_query() {
    let backend = lexical(Script::Hits(vec![("d1", Some("a raw query passage"))]));
    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(SourceBackend::Lexical, backend.clone(), Duration::from_millis(500))
        .expander(Arc::new(DownExpander))
        .build();

    let response = pipeline.search(SearchRequest::new("raw")).await.unwrap();
    assert_eq!(response.stats.expansion, ExpansionOutcome::Fallback);
    assert!(response.expanded_query.is_none());
    assert_eq!(response.results[0].snippet, "a raw query passage");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expanded_terms_drive_highlighting() {
    let passage = "one two three four five six seven eight nine ten eleven twelve \
                   machine learning thirteen fourteen";
    let pipeline = SearchPipeline::builder(PipelineConfig {
        highlight_window: 1,
        ..Default::default()
    })
    .backend(
        SourceBackend::Lexical,
        lexical(Script::Hits(vec![("d1", Some(passage))])),
        Duration::from_millis(500),
    )
    .expander(Arc::new(StaticExpander))
    .build();

    let response = pipeline.search(SearchRequest::new("machne lerning")).await.unwrap();
    assert_eq!(response.stats.expansion, ExpansionOutcome::Expanded);
    assert_eq!(
        response.expanded_query.as_deref(),
        Some("machine learning machine learning neural")
    );
    assert_eq!(
        response.results[0].snippet,
        "... twelve machine learning thirteen ..."
    );
}

#[tokio::test]
async fn test_rerank_reorders_only_the_budgeted_head() {
    let gateway = RerankGateway::new(Arc::new(LengthReranker), 2, Duration::from_secs(1));
    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(
            SourceBackend::Lexical,
            lexical(Script::Hits(vec![
                ("d1", Some("short")),
                ("d2", Some("a much longer passage")),
                ("d3", Some("the longest passage of them all by far")),
            ])),
            Duration::from_millis(500),
        )
        .reranker(gateway)
        .build();

    let response = pipeline
        .search(SearchRequest::new("q").top_k(3))
        .await
        .unwrap();

    assert!(response.stats.reranked);
    assert_eq!(response.stats.reranked_count, 2);
    assert_eq!(ids(&response), vec!["d2", "d1", "d3"]);
    assert_eq!(response.results[0].score, "a much longer passage".len() as f32);
    assert!((response.results[2].score - 1.0 / 63.0).abs() < 1e-7);
}

#[tokio::test]
async fn test_rerank_failure_keeps_fused_order() {
    let gateway = RerankGateway::new(Arc::new(BrokenReranker), 100, Duration::from_secs(1));
    let pipeline = builder(
        lexical(Script::Hits(vec![("d1", Some("x")), ("d2", Some("y"))])),
        dense(Script::Hits(vec![])),
    )
    .reranker(gateway)
    .build();

    let response = pipeline.search(SearchRequest::new("q")).await.unwrap();
    assert_eq!(ids(&response), vec!["d1", "d2"]);
    assert!(!response.stats.reranked);
    assert_eq!(response.stats.reranked_count, 0);
    assert!(response.stats.rerank_error.is_some());
}

#[tokio::test]
async fn test_rerank_can_be_disabled_per_request() {
    let gateway = RerankGateway::new(Arc::new(LengthReranker), 100, Duration::from_secs(1));
    let pipeline = builder(
        lexical(Script::Hits(vec![("d1", Some("x")), ("d2", Some("longer"))])),
        dense(Script::Hits(vec![])),
    )
    .reranker(gateway)
    .build();

    let response = pipeline
        .search(SearchRequest::new("q").rerank(false))
        .await
        .unwrap();
    assert_eq!(ids(&response), vec!["d1", "d2"]);
    assert!(!response.stats.reranked);
}

#[tokio::test]
async fn test_passage_store_fills_missing_text() {
    let mut store = MemoryPassageStore::new();
    store.insert("d1", "stored passage for d1");

    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(
            SourceBackend::Vector(0),
            dense(Script::Hits(vec![("d1", None), ("d2", None)])),
            Duration::from_millis(500),
        )
        .passages(Arc::new(store))
        .build();

    let response = pipeline
        .search(SearchRequest::new("stored").mode(RetrievalMode::VectorTopK))
        .await
        .unwrap();
    assert_eq!(response.results[0].snippet, "stored passage for d1");
    assert_eq!(response.results[1].snippet, "");
}

#[tokio::test]
async fn test_repeated_requests_are_deterministic() {
    let pipeline = SearchPipeline::builder(PipelineConfig::default())
        .backend(
            SourceBackend::Lexical,
            lexical(Script::Hits(vec![("a", None), ("b", None), ("c", None)])),
            Duration::from_millis(500),
        )
        .backend(
            SourceBackend::Vector(0),
            ScriptedBackend::new(
                "dense",
                SourceBackend::Vector(0),
                Script::Hits(vec![("c", None), ("b", None), ("d", None)]),
            ),
            Duration::from_millis(500),
        )
        .build();

    let first = pipeline.search(SearchRequest::new("q")).await.unwrap();
    let second = pipeline.search(SearchRequest::new("q")).await.unwrap();
    assert_eq!(first.results, second.results);
    assert_eq!(ids(&first), vec!["c", "b", "a", "d"]);
}
