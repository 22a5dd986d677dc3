//! Configuration settings for the Tributary pipeline.

use crate::error::{ConfigError, Result};
use crate::retrieval::RetrievalMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on `expansion.max_retries`.
pub const MAX_EXPANSION_RETRIES: usize = 10;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub expansion: ExpansionConfig,
    pub embedding: EmbeddingConfig,
    pub lexical: LexicalConfig,
    pub vector: Vec<VectorIndexConfig>,
    pub reranking: RerankConfig,
    pub passages: PassageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("tributary.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("tributary/config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".tributary/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.default_top_k == 0 {
            return Err(ConfigError::Invalid("pipeline.default_top_k must be > 0".into()).into());
        }
        if pipeline.max_top_k < pipeline.default_top_k {
            return Err(ConfigError::Invalid(
                "pipeline.max_top_k must be >= pipeline.default_top_k".into(),
            )
            .into());
        }
        if pipeline.fetch_multiplier == 0 {
            return Err(ConfigError::Invalid("pipeline.fetch_multiplier must be > 0".into()).into());
        }
        if !pipeline.rrf_k.is_finite() || pipeline.rrf_k < 0.0 {
            return Err(ConfigError::Invalid("pipeline.rrf_k must be a finite value >= 0".into()).into());
        }

        if self.expansion.enabled {
            if self.expansion.base_url.is_empty() {
                return Err(ConfigError::MissingField("expansion.base_url".into()).into());
            }
            if self.expansion.model.is_empty() {
                return Err(ConfigError::MissingField("expansion.model".into()).into());
            }
            if self.expansion.repetitions == 0 {
                return Err(ConfigError::Invalid("expansion.repetitions must be > 0".into()).into());
            }
            if self.expansion.timeout_ms == 0 {
                return Err(ConfigError::Invalid("expansion.timeout_ms must be > 0".into()).into());
            }
            if self.expansion.max_retries > MAX_EXPANSION_RETRIES {
                return Err(ConfigError::Invalid(format!(
                    "expansion.max_retries must be <= {MAX_EXPANSION_RETRIES}"
                ))
                .into());
            }
        }

        if self.lexical.enabled {
            if self.lexical.executable.is_empty() {
                return Err(ConfigError::MissingField("lexical.executable".into()).into());
            }
            if self.lexical.timeout_ms == 0 {
                return Err(ConfigError::Invalid("lexical.timeout_ms must be > 0".into()).into());
            }
        }

        let mut names = std::collections::HashSet::new();
        for (i, index) in self.vector.iter().enumerate() {
            if index.collection.is_empty() {
                return Err(ConfigError::MissingField(format!("vector[{i}].collection")).into());
            }
            if index.url.is_empty() {
                return Err(ConfigError::MissingField(format!("vector[{i}].url")).into());
            }
            if index.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!("vector[{i}].timeout_ms must be > 0")).into());
            }
            if !names.insert(index.display_name(i)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate vector index name: {}",
                    index.display_name(i)
                ))
                .into());
            }
        }

        if self.reranking.enabled {
            if self.reranking.url.is_empty() {
                return Err(ConfigError::MissingField("reranking.url".into()).into());
            }
            if self.reranking.budget == 0 {
                return Err(ConfigError::Invalid("reranking.budget must be > 0".into()).into());
            }
        }

        Ok(())
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a credential from an inline value or a named environment variable.
///
/// The inline value wins; an empty string counts as unset.
pub fn resolve_secret(inline: Option<&str>, env_var: Option<&str>) -> Option<String> {
    inline
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            env_var
                .and_then(|name| std::env::var(name).ok())
                .filter(|s| !s.is_empty())
        })
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Allow cross-origin requests
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            enable_cors: true,
        }
    }
}

/// Request pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Results returned when the request does not name `top_k`
    pub default_top_k: usize,
    /// Upper bound on a requested `top_k`
    pub max_top_k: usize,
    /// Each backend is asked for `top_k * fetch_multiplier` candidates
    pub fetch_multiplier: usize,
    /// RRF smoothing constant
    pub rrf_k: f32,
    /// Tokens kept on each side of a highlighted term
    pub highlight_window: usize,
    /// Fail the request when expansion fails instead of using the raw query
    pub strict_expansion: bool,
    /// Mode used when the request does not name one
    pub default_mode: RetrievalMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_top_k: 100,
            fetch_multiplier: 2,
            rrf_k: 60.0,
            highlight_window: 5,
            strict_expansion: false,
            default_mode: RetrievalMode::Conjunctive,
        }
    }
}

/// LLM query expansion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Enable query expansion
    pub enabled: bool,
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Chat model name
    pub model: String,
    /// API key (falls back to `api_key_env`)
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Times the corrected query is repeated
    pub repetitions: usize,
    /// Number of related terms appended
    pub added_terms: usize,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: usize,
    /// Base delay between retries, doubled on each attempt
    pub retry_delay_ms: u64,
    /// Sampling temperature
    pub temperature: f32,
    /// Expansion cache
    pub cache: CacheConfig,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            repetitions: 5,
            added_terms: 3,
            timeout_ms: 10_000,
            max_retries: 1,
            retry_delay_ms: 250,
            temperature: 0.0,
            cache: CacheConfig::default(),
        }
    }
}

/// Cache configuration for expansion results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching
    pub enabled: bool,
    /// Maximum number of cached entries
    pub max_entries: u64,
    /// TTL for cached entries in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl_secs: 3600,
        }
    }
}

/// Query embedding configuration (used by vector backends).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL for the embedding API
    pub base_url: String,
    /// Model name
    pub model: String,
    /// API key (falls back to `api_key_env`)
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Lexical engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    /// Enable the lexical backend
    pub enabled: bool,
    /// Query processor executable
    pub executable: String,
    /// Inverted index file
    pub index_path: String,
    /// Lexicon file
    pub lexicon_path: String,
    /// Passage collection file
    pub collection_path: String,
    /// Timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: "./query_processor".to_string(),
            index_path: "tmp/final_inverted_index.bin".to_string(),
            lexicon_path: "tmp/lexicon.txt".to_string(),
            collection_path: "collection.tsv".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// Vector index configuration. Each entry becomes one vector backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Display name (defaults to the collection name)
    pub name: Option<String>,
    /// Qdrant server URL
    pub url: String,
    /// Collection name
    pub collection: String,
    /// Named vector within the collection
    pub vector_name: Option<String>,
    /// Distance metric the collection was built with
    pub metric: VectorMetric,
    /// Payload field holding the document ID
    pub doc_id_field: String,
    /// Payload field holding the passage text
    pub text_field: String,
    /// API key (falls back to `api_key_env`)
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Timeout in milliseconds
    pub timeout_ms: u64,
}

impl VectorIndexConfig {
    /// Name used in logs and metric labels.
    pub fn display_name(&self, position: usize) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ if !self.collection.is_empty() => self.collection.clone(),
            _ => format!("vector-{position}"),
        }
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            name: None,
            url: "http://localhost:6334".to_string(),
            collection: String::new(),
            vector_name: None,
            metric: VectorMetric::Cosine,
            doc_id_field: "doc_id".to_string(),
            text_field: "text".to_string(),
            api_key: None,
            api_key_env: None,
            timeout_ms: 5_000,
        }
    }
}

/// Distance metric of a vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorMetric {
    /// Cosine similarity (higher is better)
    Cosine,
    /// Inner product (higher is better)
    Dot,
    /// Euclidean distance (lower is better)
    Euclid,
    /// Manhattan distance (lower is better)
    Manhattan,
}

/// Cross-encoder reranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Enable reranking
    pub enabled: bool,
    /// Rerank endpoint
    pub url: String,
    /// API key (falls back to `api_key_env`)
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Maximum number of fused candidates sent for reranking
    pub budget: usize,
    /// Timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8080/rerank".to_string(),
            api_key: None,
            api_key_env: None,
            budget: 100,
            timeout_ms: 10_000,
        }
    }
}

/// Passage store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PassageConfig {
    /// Tab-separated `<doc_id>\t<passage>` collection used to resolve passages
    pub collection_path: Option<String>,
}
