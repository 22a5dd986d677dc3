//! Query expansion through an LLM rewriting service.
//!
//! The model is asked for two things only: a spelling-corrected query and a
//! short list of related terms. The gateway builds the final query text
//! itself (R copies of the corrected query followed by at most K terms, no
//! punctuation), so the repetition and term budget hold whatever the model
//! returns.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::cache::ExpansionCache;
use crate::config::{resolve_secret, ExpansionConfig};
use crate::error::ExpansionError;
use crate::metrics::{get_metrics, Metrics};

/// Trait for query expansion implementations.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// Expand a query.
    async fn expand(&self, query: &str) -> Result<ExpandedQuery, ExpansionError>;

    /// Get the name of this expander.
    fn name(&self) -> &str;
}

/// A query after expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    /// Query as received
    pub original: String,
    /// Spelling-corrected query
    pub corrected: String,
    /// Added related terms
    pub terms: Vec<String>,
    /// Text sent to the retrieval backends
    pub text: String,
    /// Whether expansion was applied
    pub was_expanded: bool,
}

impl ExpandedQuery {
    /// Create a non-expanded query (passthrough).
    pub fn unchanged(query: &str) -> Self {
        let trimmed = query.trim();
        Self {
            original: query.to_string(),
            corrected: trimmed.to_string(),
            terms: vec![],
            text: trimmed.to_string(),
            was_expanded: false,
        }
    }

    /// Build the expanded text from a corrected query and candidate terms.
    ///
    /// Punctuation is stripped from both, empty and duplicate terms are
    /// dropped, and at most `max_terms` terms are kept. Fails when nothing
    /// usable remains of the corrected query.
    pub fn assemble(
        original: &str,
        corrected: &str,
        terms: &[String],
        repetitions: usize,
        max_terms: usize,
    ) -> Result<Self, ExpansionError> {
        let corrected = strip_punctuation(corrected);
        if corrected.is_empty() {
            return Err(ExpansionError::MalformedResponse(
                "corrected query is empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let terms: Vec<String> = terms
            .iter()
            .map(|t| strip_punctuation(t))
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .take(max_terms)
            .collect();

        let mut parts: Vec<&str> = std::iter::repeat(corrected.as_str())
            .take(repetitions.max(1))
            .collect();
        parts.extend(terms.iter().map(String::as_str));
        let text = parts.join(" ");

        Ok(Self {
            original: original.to_string(),
            corrected,
            terms,
            text,
            was_expanded: true,
        })
    }

    /// Distinct lowercase terms used for snippet highlighting.
    pub fn highlight_terms(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.corrected
            .split_whitespace()
            .chain(self.terms.iter().flat_map(|t| t.split_whitespace()))
            .map(|t| t.to_lowercase())
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }
}

/// Replace everything that is not alphanumeric or whitespace with a space
/// and collapse runs of whitespace.
fn strip_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse the model's two labelled lines.
///
/// Expected shape:
///
/// ```text
/// corrected: machine learning
/// terms: neural networks, deep learning, artificial intelligence
/// ```
pub fn parse_expansion_reply(reply: &str) -> Result<(String, Vec<String>), ExpansionError> {
    let mut corrected = None;
    let mut terms = Vec::new();

    for line in reply.lines() {
        let line = line.trim().trim_start_matches(|c: char| matches!(c, '-' | '*' | '#' | '`' | ' '));
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        match label.trim().to_lowercase().as_str() {
            "corrected" | "corrected query" => {
                corrected = Some(value.trim().to_string());
            }
            "terms" | "related terms" => {
                terms = value
                    .split(|c: char| c == ',' || c == ';')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            _ => {}
        }
    }

    match corrected {
        Some(c) if !c.is_empty() => Ok((c, terms)),
        _ => Err(ExpansionError::MalformedResponse(format!(
            "reply has no corrected query: {}",
            reply.chars().take(200).collect::<String>()
        ))),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Query expander backed by an OpenAI-compatible chat completions API.
pub struct LlmQueryExpander {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    repetitions: usize,
    added_terms: usize,
    temperature: f32,
    timeout: Duration,
    max_retries: usize,
    retry_delay: Duration,
    cache: ExpansionCache,
}

impl LlmQueryExpander {
    /// Create an expander from configuration, sharing the given HTTP client.
    pub fn from_config(config: &ExpansionConfig, client: Client) -> Self {
        let api_key = resolve_secret(config.api_key.as_deref(), Some(&config.api_key_env));
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "No expansion API key configured; requests will be unauthenticated"
            );
        }

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            repetitions: config.repetitions,
            added_terms: config.added_terms,
            temperature: config.temperature,
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            cache: ExpansionCache::new(&config.cache),
        }
    }

    fn prompt(&self, query: &str) -> Vec<ChatMessage> {
        let system = format!(
            "You are a search optimization assistant. Correct any spelling or typographical \
             errors in the user's search query, then propose exactly {} semantically related \
             terms that are highly relevant to it. Reply with exactly two lines and nothing else:\n\
             corrected: <the corrected query>\n\
             terms: <term 1>, <term 2>, ...",
            self.added_terms
        );
        vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: query.to_string(),
            },
        ]
    }

    /// One request to the chat API, without retries.
    async fn request(&self, query: &str) -> Result<ExpandedQuery, ExpansionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: self.prompt(query),
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&url).timeout(self.timeout).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExpansionError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ExpansionError::ServiceUnavailable(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<crate::embedding::ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ExpansionError::ServiceUnavailable(format!(
                "API error ({}): {}",
                status, detail
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ExpansionError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ExpansionError::MalformedResponse(format!("Failed to parse response: {}", e))
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ExpansionError::MalformedResponse("empty completion".to_string()))?;

        let (corrected, terms) = parse_expansion_reply(&content)?;
        if terms.len() != self.added_terms {
            tracing::debug!(
                expected = self.added_terms,
                received = terms.len(),
                "Model returned a different number of terms"
            );
        }
        ExpandedQuery::assemble(query, &corrected, &terms, self.repetitions, self.added_terms)
    }
}

#[async_trait]
impl QueryExpander for LlmQueryExpander {
    async fn expand(&self, query: &str) -> Result<ExpandedQuery, ExpansionError> {
        if query.trim().is_empty() {
            return Err(ExpansionError::InvalidQuery("query is empty".to_string()));
        }

        if let Some(cached) = self.cache.get(query).await {
            return Ok(cached.as_ref().clone());
        }

        let metrics = get_metrics();
        let _timer = Metrics::start_timer(&metrics.expansion_duration_seconds);

        let mut attempt = 0;
        loop {
            match self.request(query).await {
                Ok(expanded) => {
                    tracing::debug!(
                        original = %query,
                        expanded = %expanded.text,
                        "Query expanded"
                    );
                    self.cache.insert(query, expanded.clone()).await;
                    return Ok(expanded);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = backoff_delay(self.retry_delay, attempt);
                    tracing::warn!(
                        "Expansion attempt {} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    metrics.expansion_retries_total.inc();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        "llm"
    }
}

/// Exponential backoff, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    let factor = 2u32.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
    base.saturating_mul(factor)
}
