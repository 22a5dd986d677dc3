//! Retrieval backend adapters.
//!
//! Each adapter wraps one external ranked-retrieval call and normalises its
//! output into [`Candidate`]s:
//!
//! - [`LexicalBackend`]: runs the inverted-index engine executable and parses
//!   its line protocol.
//! - [`VectorBackend`]: embeds the query and runs a nearest-neighbour search
//!   against a [`VectorIndex`] (Qdrant in production).
//!
//! Adapters never see each other. The pipeline dispatches them concurrently
//! and treats every error as a per-backend failure.

mod lexical;
mod protocol;
mod vector;

pub use lexical::*;
pub use protocol::*;
pub use vector::*;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// How a query is matched against a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "RawMode", rename_all = "snake_case")]
pub enum RetrievalMode {
    /// All query terms must match (lexical only).
    #[default]
    Conjunctive,
    /// Any query term may match (lexical only).
    Disjunctive,
    /// Nearest-neighbour search over embeddings.
    #[serde(rename = "vector")]
    VectorTopK,
}

impl RetrievalMode {
    /// Whether the lexical backend takes part in this mode.
    pub fn uses_lexical(self) -> bool {
        !matches!(self, RetrievalMode::VectorTopK)
    }

    /// Flag passed to the lexical engine (`1` conjunctive, `0` disjunctive).
    pub fn lexical_flag(self) -> Option<&'static str> {
        match self {
            RetrievalMode::Conjunctive => Some("1"),
            RetrievalMode::Disjunctive => Some("0"),
            RetrievalMode::VectorTopK => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalMode::Conjunctive => "conjunctive",
            RetrievalMode::Disjunctive => "disjunctive",
            RetrievalMode::VectorTopK => "vector",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conjunctive" | "and" | "1" => Ok(RetrievalMode::Conjunctive),
            "disjunctive" | "or" | "0" => Ok(RetrievalMode::Disjunctive),
            "vector" | "vector_top_k" | "vectortopk" | "semantic" => Ok(RetrievalMode::VectorTopK),
            other => Err(format!("unknown retrieval mode: {other}")),
        }
    }
}

/// Accepted wire shapes for a mode: a name, or the legacy numeric flag.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawMode {
    Text(String),
    Flag(u64),
}

impl TryFrom<RawMode> for RetrievalMode {
    type Error = String;

    fn try_from(raw: RawMode) -> Result<Self, Self::Error> {
        match raw {
            RawMode::Text(s) => s.parse(),
            RawMode::Flag(1) => Ok(RetrievalMode::Conjunctive),
            RawMode::Flag(0) => Ok(RetrievalMode::Disjunctive),
            RawMode::Flag(n) => Err(format!("unknown retrieval mode flag: {n}")),
        }
    }
}

/// Identity of a retrieval source.
///
/// The derived ordering (lexical first, then vector indexes by position) is
/// the iteration order used wherever results from several sources are
/// combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceBackend {
    Lexical,
    Vector(usize),
}

impl fmt::Display for SourceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceBackend::Lexical => f.write_str("lexical"),
            SourceBackend::Vector(i) => write!(f, "vector{i}"),
        }
    }
}

/// One ranked hit from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Document ID, unique within one source's result set
    pub doc_id: String,
    /// Source that produced the hit
    pub source: SourceBackend,
    /// 1-based rank within the source
    pub rank: usize,
    /// Source-specific score; higher is better, comparable only within the source
    pub raw_score: f32,
    /// Passage text, when the backend returned it with the hit
    pub passage: Option<String>,
}

/// Trait for retrieval backends.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Return up to `limit` candidates ranked best first.
    async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError>;

    /// Human-readable backend name for logs and metric labels.
    fn name(&self) -> &str;

    /// Modes this backend can serve.
    fn supports(&self, mode: RetrievalMode) -> bool;
}

/// Check the preconditions shared by every backend.
pub(crate) fn check_request(query: &str, limit: usize) -> Result<(), RetrievalError> {
    if query.trim().is_empty() {
        return Err(RetrievalError::InvalidRequest("query is empty".into()));
    }
    if limit == 0 {
        return Err(RetrievalError::InvalidRequest("limit must be > 0".into()));
    }
    Ok(())
}

/// Number candidates 1..n, keeping the first occurrence of each doc id.
pub(crate) fn assign_ranks(
    source: SourceBackend,
    hits: impl IntoIterator<Item = (String, f32, Option<String>)>,
    limit: usize,
) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|(doc_id, _, _)| seen.insert(doc_id.clone()))
        .take(limit)
        .enumerate()
        .map(|(i, (doc_id, raw_score, passage))| Candidate {
            doc_id,
            source,
            rank: i + 1,
            raw_score,
            passage,
        })
        .collect()
}
