//! End-to-end tests against a scripted lexical engine and mock HTTP services.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::{extract::State, routing::post, Json, Router};
use tempfile::TempDir;

use tributary::config::{Config, LexicalConfig};
use tributary::error::RetrievalError;
use tributary::search::{ExpansionOutcome, SearchPipeline, SearchRequest};
use tributary::{LexicalBackend, RetrievalBackend, RetrievalMode};

const ENGINE_OUTPUT: &str = r#"
printf '%s\n%s\n' "$4" "$5" > "$(dirname "$0")/args.txt"
echo "Top 3 documents:"
echo "DocID: 7, Score: 3.5"
echo "Passage: the tokio runtime drives async rust code"
echo "DocID: abc, Score: 2.0"
echo "Passage: dropped"
echo "DocID: 3, Score: 1.25"
echo "Passage: writing rust without async"
"#;

fn write_engine(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("query_processor");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn lexical_config(executable: &Path) -> LexicalConfig {
    LexicalConfig {
        executable: executable.to_string_lossy().to_string(),
        timeout_ms: 5_000,
        ..Default::default()
    }
}

fn recorded_args(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("args.txt"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_engine_output_is_parsed() {
    let dir = TempDir::new().unwrap();
    let engine = write_engine(dir.path(), ENGINE_OUTPUT);
    let backend = LexicalBackend::new(&lexical_config(&engine));

    let candidates = backend
        .retrieve("rust async", RetrievalMode::Disjunctive, 10)
        .await
        .unwrap();

    let ids: Vec<_> = candidates.iter().map(|c| c.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["7", "3"]);
    assert_eq!(candidates[1].rank, 2);
    assert_eq!(candidates[1].raw_score, 1.25);
    assert_eq!(
        candidates[0].passage.as_deref(),
        Some("the tokio runtime drives async rust code")
    );
    assert_eq!(recorded_args(dir.path()), vec!["rust async", "0"]);
}

#[tokio::test]
async fn test_engine_limit_is_applied() {
    let dir = TempDir::new().unwrap();
    let engine = write_engine(dir.path(), ENGINE_OUTPUT);
    let backend = LexicalBackend::new(&lexical_config(&engine));

    let candidates = backend
        .retrieve("rust", RetrievalMode::Conjunctive, 1)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(recorded_args(dir.path())[1], "1");
}

#[tokio::test]
async fn test_engine_no_match_is_empty() {
    let dir = TempDir::new().unwrap();
    let engine = write_engine(dir.path(), "echo 'No matching documents found.'\n");
    let backend = LexicalBackend::new(&lexical_config(&engine));

    let candidates = backend
        .retrieve("zzz", RetrievalMode::Conjunctive, 10)
        .await
        .unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_engine_failure_is_protocol_error() {
    let dir = TempDir::new().unwrap();
    let engine = write_engine(dir.path(), "echo 'cannot open index' >&2\nexit 2\n");
    let backend = LexicalBackend::new(&lexical_config(&engine));

    let err = backend
        .retrieve("rust", RetrievalMode::Conjunctive, 10)
        .await
        .unwrap_err();
    match err {
        RetrievalError::BackendProtocolError(message) => {
            assert!(message.contains("cannot open index"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_garbage_is_protocol_error() {
    let dir = TempDir::new().unwrap();
    let engine = write_engine(dir.path(), "echo 'segmentation fault'\n");
    let backend = LexicalBackend::new(&lexical_config(&engine));

    let err = backend
        .retrieve("rust", RetrievalMode::Conjunctive, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::BackendProtocolError(_)));
}

#[derive(Default)]
struct Seen {
    rerank_query: Mutex<Option<String>>,
    rerank_documents: Mutex<Vec<String>>,
}

#[tokio::test]
async fn test_search_from_config_end_to_end() {
    let seen = Arc::new(Seen::default());

    let llm = serve(Router::new().route(
        "/chat/completions",
        post(|| async {
            Json(serde_json::json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": "corrected: rust async\nterms: tokio, futures, executor"
                }}]
            }))
        }),
    ))
    .await;

    let reranker = serve(
        Router::new()
            .route(
                "/rerank",
                post(
                    |State(seen): State<Arc<Seen>>, Json(body): Json<serde_json::Value>| async move {
                        *seen.rerank_query.lock().unwrap() =
                            body["query"].as_str().map(str::to_string);
                        *seen.rerank_documents.lock().unwrap() = body["documents"]
                            .as_array()
                            .unwrap()
                            .iter()
                            .filter_map(|d| d.as_str().map(str::to_string))
                            .collect();
                        Json(serde_json::json!({
                            "results": [
                                {"index": 1, "relevance_score": 0.9},
                                {"index": 0, "relevance_score": 0.2}
                            ]
                        }))
                    },
                ),
            )
            .with_state(seen.clone()),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let engine = write_engine(dir.path(), ENGINE_OUTPUT);

    let mut config = Config::default();
    config.lexical = lexical_config(&engine);
    config.expansion.base_url = llm;
    config.expansion.api_key = Some("test-key".to_string());
    config.expansion.repetitions = 2;
    config.reranking.enabled = true;
    config.reranking.url = format!("{}/rerank", reranker);
    config.passages.collection_path = Some(dir.path().join("missing.tsv").to_string_lossy().to_string());

    let pipeline = SearchPipeline::from_config(&config).await.unwrap();
    let response = pipeline.search(SearchRequest::new("rust asynk")).await.unwrap();

    assert_eq!(response.stats.expansion, ExpansionOutcome::Expanded);
    assert_eq!(
        response.expanded_query.as_deref(),
        Some("rust async rust async tokio futures executor")
    );
    assert_eq!(
        recorded_args(dir.path()),
        vec!["rust async rust async tokio futures executor", "1"]
    );

    assert!(response.stats.reranked);
    let ids: Vec<_> = response.results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["3", "7"]);
    assert_eq!(response.results[0].score, 0.9);
    assert_eq!(response.results[0].snippet, "writing rust without async");

    assert_eq!(seen.rerank_query.lock().unwrap().as_deref(), Some("rust async"));
    assert_eq!(
        *seen.rerank_documents.lock().unwrap(),
        vec![
            "the tokio runtime drives async rust code".to_string(),
            "writing rust without async".to_string()
        ]
    );
}
