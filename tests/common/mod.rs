// tests/common/mod.rs
// Shared setup for integration tests: in-memory SQLite plus a deterministic
// embedding provider, so nothing here needs a network or a live model.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;

use engram::cache::MemoryCache;
use engram::config::EngramConfig;
use engram::embeddings::{
    DeferredEmbedder, EmbeddingClient, EmbeddingClientConfig, EmbeddingProvider,
};
use engram::error::Result;
use engram::service::MemoryService;
use engram::storage::SqliteMemoryStore;

/// Fixed vocabulary the mock provider counts over. Texts sharing words get
/// geometrically close vectors, which is all similarity tests need.
const VOCAB: [&str; 8] = [
    "typescript",
    "programming",
    "language",
    "test",
    "memory",
    "rust",
    "database",
    "coffee",
];

pub struct MockEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(VOCAB
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect())
    }

    fn dimension(&self) -> usize {
        VOCAB.len()
    }
}

pub async fn setup() -> (Arc<MemoryService>, Arc<SqliteMemoryStore>) {
    setup_with_config(test_config()).await
}

pub async fn setup_with_config(config: EngramConfig) -> (Arc<MemoryService>, Arc<SqliteMemoryStore>) {
    build(Arc::new(MockEmbeddingProvider), config, None).await
}

pub async fn setup_with_provider(
    provider: Arc<dyn EmbeddingProvider>,
) -> (Arc<MemoryService>, Arc<SqliteMemoryStore>) {
    build(provider, test_config(), None).await
}

pub async fn setup_with_cache() -> (Arc<MemoryService>, Arc<SqliteMemoryStore>) {
    let config = test_config();
    let cache = Arc::new(MemoryCache::new(
        config.cache_embedding_ttl_secs,
        config.cache_search_ttl_secs,
    ));
    build(Arc::new(MockEmbeddingProvider), config, Some(cache)).await
}

async fn build(
    provider: Arc<dyn EmbeddingProvider>,
    config: EngramConfig,
    cache: Option<Arc<MemoryCache>>,
) -> (Arc<MemoryService>, Arc<SqliteMemoryStore>) {
    // One connection: every handle must see the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("create in-memory sqlite pool");

    let store = Arc::new(SqliteMemoryStore::new(
        pool,
        config.compression_threshold_bytes,
    ));
    store.run_migrations().await.expect("run migrations");

    let embedder = Arc::new(EmbeddingClient::new(
        provider,
        EmbeddingClientConfig::default(),
    ));

    let deferred = Arc::new(DeferredEmbedder::spawn(
        embedder.clone(),
        store.clone(),
        config.embed_queue_size,
    ));

    let mut service =
        MemoryService::new(store.clone(), embedder, config).with_deferred(deferred);
    if let Some(cache) = cache {
        service = service.with_cache(cache);
    }

    (Arc::new(service), store)
}

pub fn test_config() -> EngramConfig {
    EngramConfig::default()
}
