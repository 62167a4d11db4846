// src/embeddings/mod.rs

//! Embedding adapter seam. A provider turns text into a fixed-dimension
//! vector; the client wraps any provider with the shared concurrency cap,
//! a per-call timeout, and bounded retry with backoff. Both interactive
//! `store`/`search` calls and the deferred queue draw from the same
//! semaphore, so background work cannot overrun the provider.

pub mod deferred;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};

pub use deferred::DeferredEmbedder;
pub use http::HttpEmbeddingProvider;

/// External embedding provider: text in, fixed-dimension vector out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed for the lifetime of an index; changing it means re-embedding
    /// everything, which is out of scope here.
    fn dimension(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl Default for EmbeddingClientConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base: Duration::from_millis(250),
        }
    }
}

/// Provider wrapper enforcing the shared-resource policy. The deferred
/// worker is a single task, so it holds at most one permit at a time and
/// interactive callers always find capacity when `concurrency >= 2`.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    semaphore: Arc<Semaphore>,
    config: EmbeddingClientConfig,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingClientConfig) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed with the full policy applied: queue on the semaphore, time out
    /// each attempt, retry with exponential backoff up to the bound.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| MemoryError::Provider("embedding pool closed".to_string()))?;

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_base * 2u32.saturating_pow(attempt - 1);
                debug!("retrying embedding call (attempt {attempt}) after {backoff:?}");
                tokio::time::sleep(backoff).await;
            }

            match tokio::time::timeout(self.config.timeout, self.provider.embed(text)).await {
                Ok(Ok(vector)) => return Ok(vector),
                Ok(Err(err)) => {
                    warn!("embedding attempt {attempt} failed: {err}");
                    last_error = Some(err);
                }
                Err(_) => {
                    warn!("embedding attempt {attempt} timed out");
                    last_error = Some(MemoryError::Provider(format!(
                        "timed out after {:?}",
                        self.config.timeout
                    )));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MemoryError::Provider("embedding failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that fails a configured number of times before succeeding.
    struct FlakyProvider {
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(MemoryError::Provider("transient".to_string()));
            }
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn client_with_failures(failures: usize) -> (EmbeddingClient, Arc<FlakyProvider>) {
        let provider = Arc::new(FlakyProvider {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        });
        let config = EmbeddingClientConfig {
            retry_base: Duration::from_millis(1),
            ..Default::default()
        };
        (EmbeddingClient::new(provider.clone(), config), provider)
    }

    #[tokio::test]
    async fn test_retries_recover_transient_failures() {
        let (client, provider) = client_with_failures(2);
        let vector = client.embed("hello").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_provider_error() {
        let (client, provider) = client_with_failures(10);
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, MemoryError::Provider(_)));
        // initial attempt + max_retries
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }
}
