//! Error types for the Tributary retrieval pipeline.

use serde::Serialize;
use thiserror::Error;

/// Main error type for Tributary operations.
#[derive(Error, Debug)]
pub enum TributaryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Query expansion error: {0}")]
    Expansion(#[from] ExpansionError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Reranking error: {0}")]
    Rerank(#[from] RerankError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Passage store error: {0}")]
    Passage(#[from] PassageError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors from the query expansion gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpansionError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Expansion service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Expansion timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed expansion response: {0}")]
    MalformedResponse(String),
}

impl ExpansionError {
    /// Whether a retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExpansionError::ServiceUnavailable(_) | ExpansionError::Timeout(_)
        )
    }
}

/// Errors from a single retrieval backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Backend timed out after {0}ms")]
    BackendTimeout(u64),

    #[error("Backend protocol error: {0}")]
    BackendProtocolError(String),

    #[error("Mode {0} not supported by this backend")]
    UnsupportedMode(String),

    #[error("Invalid retrieval request: {0}")]
    InvalidRequest(String),
}

impl RetrievalError {
    /// Short label used for logging and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            RetrievalError::BackendUnreachable(_) => "unreachable",
            RetrievalError::BackendTimeout(_) => "timeout",
            RetrievalError::BackendProtocolError(_) => "protocol",
            RetrievalError::UnsupportedMode(_) => "unsupported_mode",
            RetrievalError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Errors from the reranking gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RerankError {
    #[error("Reranker unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Reranking timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed rerank response: {0}")]
    MalformedResponse(String),
}

/// Errors from the query embedding provider.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Empty embedding returned")]
    Empty,
}

/// Errors from the passage store.
#[derive(Error, Debug)]
pub enum PassageError {
    #[error("Failed to load passage collection {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Request-level search errors.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Query expansion failed: {0}")]
    ExpansionFailed(#[source] ExpansionError),

    #[error("All retrieval backends unavailable ({} failed)", .0.len())]
    AllBackendsUnavailable(Vec<(String, RetrievalError)>),

    #[error("No retrieval backends configured for mode {0}")]
    NoBackends(String),
}

/// Machine-readable error kind reported at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    UnsupportedMediaType,
    MethodNotAllowed,
    ExpansionFailed,
    BackendUnreachable,
    BackendTimeout,
    BackendProtocolError,
    AllBackendsUnavailable,
    RerankFailed,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidQuery => 400,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::UnsupportedMediaType => 415,
            _ => 500,
        }
    }
}

impl TributaryError {
    /// Classify this error for the request boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TributaryError::Search(SearchError::InvalidQuery(_))
            | TributaryError::Expansion(ExpansionError::InvalidQuery(_))
            | TributaryError::Retrieval(RetrievalError::InvalidRequest(_)) => {
                ErrorKind::InvalidQuery
            }
            TributaryError::Search(SearchError::ExpansionFailed(_))
            | TributaryError::Expansion(_) => ErrorKind::ExpansionFailed,
            TributaryError::Search(SearchError::AllBackendsUnavailable(_))
            | TributaryError::Search(SearchError::NoBackends(_)) => {
                ErrorKind::AllBackendsUnavailable
            }
            TributaryError::Retrieval(RetrievalError::BackendTimeout(_)) => {
                ErrorKind::BackendTimeout
            }
            TributaryError::Retrieval(RetrievalError::BackendProtocolError(_)) => {
                ErrorKind::BackendProtocolError
            }
            TributaryError::Retrieval(_) => ErrorKind::BackendUnreachable,
            TributaryError::Rerank(_) => ErrorKind::RerankFailed,
            TributaryError::Config(_) => ErrorKind::Configuration,
            _ => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

/// Result type alias for Tributary operations.
pub type Result<T> = std::result::Result<T, TributaryError>;
