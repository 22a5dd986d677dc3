//! Passage lookup for reranking and snippets.
//!
//! Backends that return passage text alongside a hit need no lookup. For the
//! rest the pipeline asks a [`PassageStore`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PassageError, Result};
use crate::handles::SharedHandle;
use crate::metrics::get_metrics;

/// Resolves document IDs to passage text.
#[async_trait]
pub trait PassageStore: Send + Sync {
    /// Passage text for `doc_id`, if known.
    async fn get(&self, doc_id: &str) -> Result<Option<String>>;

    /// Passage text for several ids, in the same order.
    async fn get_many(&self, doc_ids: &[String]) -> Result<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(doc_ids.len());
        for id in doc_ids {
            out.push(self.get(id).await?);
        }
        Ok(out)
    }
}

/// In-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemoryPassageStore {
    passages: HashMap<String, String>,
}

impl MemoryPassageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a passage.
    pub fn insert(&mut self, doc_id: impl Into<String>, passage: impl Into<String>) {
        self.passages.insert(doc_id.into(), passage.into());
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryPassageStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            passages: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl PassageStore for MemoryPassageStore {
    async fn get(&self, doc_id: &str) -> Result<Option<String>> {
        Ok(self.passages.get(doc_id).cloned())
    }
}

/// A tab-separated `<doc_id>\t<passage>` collection file.
///
/// The file is read on first lookup (or on [`TsvPassageStore::warm`]) and kept
/// in memory. Lines without a tab or that are not valid UTF-8 are skipped and
/// counted.
pub struct TsvPassageStore {
    path: PathBuf,
    passages: SharedHandle<MemoryPassageStore>,
}

impl TsvPassageStore {
    /// Create a store backed by `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            passages: SharedHandle::new("passages"),
        }
    }

    /// Load the collection now instead of on the first request.
    pub async fn warm(&self) -> Result<usize> {
        Ok(self.loaded().await?.len())
    }

    async fn loaded(&self) -> Result<Arc<MemoryPassageStore>> {
        self.passages
            .get_or_try_init(|| async {
                let content = tokio::fs::read(&self.path).await.map_err(|e| {
                    PassageError::Load {
                        path: self.path.display().to_string(),
                        source: e,
                    }
                })?;
                let (store, malformed) = parse_collection(&content);
                if malformed > 0 {
                    tracing::warn!(
                        path = %self.path.display(),
                        dropped = malformed,
                        "Skipped malformed collection lines"
                    );
                    get_metrics().record_malformed("passages", malformed);
                }
                tracing::info!(
                    path = %self.path.display(),
                    passages = store.len(),
                    "Loaded passage collection"
                );
                Ok::<_, crate::error::TributaryError>(store)
            })
            .await
    }
}

#[async_trait]
impl PassageStore for TsvPassageStore {
    async fn get(&self, doc_id: &str) -> Result<Option<String>> {
        self.loaded().await?.get(doc_id).await
    }

    async fn get_many(&self, doc_ids: &[String]) -> Result<Vec<Option<String>>> {
        let store = self.loaded().await?;
        Ok(doc_ids
            .iter()
            .map(|id| store.passages.get(id).cloned())
            .collect())
    }
}

/// Parse collection bytes, returning the store and the count of skipped lines.
fn parse_collection(content: &[u8]) -> (MemoryPassageStore, usize) {
    let mut store = MemoryPassageStore::new();
    let mut malformed = 0;
    for raw in content.split(|&b| b == b'\n') {
        let Ok(line) = std::str::from_utf8(raw) else {
            malformed += 1;
            continue;
        };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((id, passage)) if !id.trim().is_empty() => {
                store.insert(id.trim(), passage);
            }
            _ => malformed += 1,
        }
    }
    (store, malformed)
}
