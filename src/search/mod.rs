//! Hybrid search orchestration.
//!
//! A request is expanded, sent to every backend that serves its mode, and
//! the per-backend rankings are merged with Reciprocal Rank Fusion. The
//! fused head is optionally reranked by a cross-encoder and each result gets
//! a snippet built around the query terms.
//!
//! # Architecture
//!
//! ```text
//! Query Text
//!     │
//!     ▼
//! Query Expansion (LLM, cached) ── failure ──► raw query
//!     │
//!     ├─────────────────┬───────────────────┐
//!     ▼                 ▼                   ▼
//! Lexical engine   Vector index 0  ...  Vector index N
//!     │                 │                   │
//!     └────────┬────────┴───────────────────┘
//!              ▼
//!         Fusion (RRF)
//!              │
//!              ├─── Reranking (optional) ── failure ──► fused order
//!              ▼
//!         Highlighting
//!              │
//!              ▼
//!        Ranked Results
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tributary::search::{SearchPipeline, SearchRequest};
//! use tributary::retrieval::RetrievalMode;
//!
//! let pipeline = SearchPipeline::from_config(&config).await?;
//!
//! let request = SearchRequest::new("machine learning")
//!     .mode(RetrievalMode::Disjunctive)
//!     .top_k(10);
//!
//! let response = pipeline.search(request).await?;
//!
//! for result in response.results {
//!     println!("{}: {:.4} {}", result.doc_id, result.score, result.snippet);
//! }
//! ```

mod expansion;
mod fusion;
mod highlight;
mod pipeline;
mod reranker;
mod types;

pub use expansion::*;
pub use fusion::*;
pub use highlight::*;
pub use pipeline::*;
pub use reranker::*;
pub use types::*;
