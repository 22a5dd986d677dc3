//! Tributary: hybrid retrieval orchestration.
//!
//! Expands a query with an LLM, fans it out to a lexical engine and any
//! number of vector indexes, fuses the rankings with Reciprocal Rank Fusion,
//! optionally reranks the head with a cross-encoder and returns snippets
//! built around the query terms.

pub mod api;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod handles;
pub mod metrics;
pub mod passages;
pub mod retrieval;
pub mod search;

pub use api::{create_router, serve, ApiState};
pub use cache::ExpansionCache;
pub use config::Config;
pub use error::{ErrorKind, Result, TributaryError};
pub use metrics::{get_metrics, HealthState, HealthStatus, Metrics, MetricsSnapshot};
pub use passages::{MemoryPassageStore, PassageStore, TsvPassageStore};
pub use retrieval::{
    Candidate, LexicalBackend, QdrantIndex, RetrievalBackend, RetrievalMode, SourceBackend,
    VectorBackend, VectorIndex,
};
pub use search::{
    highlight, rrf_fuse, ExpandedQuery, FusedResult, QueryExpander, RerankGateway, Reranker,
    ResultItem, SearchPipeline, SearchRequest, SearchResponse, SearchStats,
};
