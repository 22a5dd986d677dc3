//! Lazily initialised, process-wide connection handles.
//!
//! Backend clients (HTTP clients, Qdrant connections, the passage collection)
//! are expensive to build and safe to share. A [`SharedHandle`] builds its
//! value on first use, at most once, and hands out cheap `Arc` clones after
//! that. A failed initialisation leaves the handle empty so the next caller
//! retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

/// A value created on first use and shared read-only afterwards.
pub struct SharedHandle<T> {
    cell: OnceCell<Arc<T>>,
    name: &'static str,
}

impl<T> SharedHandle<T> {
    /// Create an empty handle.
    pub const fn new(name: &'static str) -> Self {
        Self {
            cell: OnceCell::const_new(),
            name,
        }
    }

    /// Return the value, running `init` if no value exists yet.
    ///
    /// Concurrent callers wait on the same initialisation. An `Err` from
    /// `init` is returned to the caller that ran it and is not stored.
    pub async fn get_or_try_init<E, F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = self
            .cell
            .get_or_try_init(|| async {
                tracing::debug!(handle = self.name, "Initialising shared handle");
                init().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(value))
    }

    /// Return the value if it has been initialised.
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    /// Whether the value has been initialised.
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::new("unnamed")
    }
}

static HTTP_CLIENT: SharedHandle<reqwest::Client> = SharedHandle::new("http_client");

/// The process-wide HTTP client used by every outbound service gateway.
///
/// Per-call timeouts are applied on each request, so the client itself only
/// carries a connect timeout.
pub async fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    let client = HTTP_CLIENT
        .get_or_try_init(|| async {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
        })
        .await?;
    Ok(client.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_initialises_once_under_concurrency() {
        let handle: Arc<SharedHandle<String>> = Arc::new(SharedHandle::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    handle
                        .get_or_try_init(|| async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>("connected".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().as_str(), "connected");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_init_is_not_cached() {
        let handle: SharedHandle<u32> = SharedHandle::new("flaky");

        let first = handle
            .get_or_try_init(|| async { Err::<u32, _>("refused") })
            .await;
        assert_eq!(first.unwrap_err(), "refused");
        assert!(!handle.is_initialized());
        assert!(handle.get().is_none());

        let second = handle
            .get_or_try_init(|| async { Ok::<_, &str>(42) })
            .await
            .unwrap();
        assert_eq!(*second, 42);
        assert_eq!(*handle.get().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_shared_http_client() {
        assert!(http_client().await.is_ok());
        assert!(HTTP_CLIENT.is_initialized());
    }
}
