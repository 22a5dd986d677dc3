//! Embedding trait definitions.

use async_trait::async_trait;

use crate::error::{EmbeddingError, Result};

/// Trait for query embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::Empty.into())
    }

    /// Model name, for logs.
    fn model(&self) -> &str;
}
