// src/cache.rs

//! Optional in-process memoization for embeddings and ranked search
//! results. Purely a cost optimization: a miss behaves identically to the
//! cache being absent. Embeddings get a long TTL (content-addressed, they
//! never go stale); search results a short one.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::types::ScoredRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub embedding_hits: u64,
    pub embedding_misses: u64,
    pub search_hits: u64,
    pub search_misses: u64,
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

pub struct MemoryCache {
    embeddings: RwLock<HashMap<String, Entry<Vec<f32>>>>,
    searches: RwLock<HashMap<String, Entry<Vec<ScoredRecord>>>>,
    stats: RwLock<CacheStats>,
    embedding_ttl: Duration,
    search_ttl: Duration,
}

impl MemoryCache {
    pub fn new(embedding_ttl_secs: i64, search_ttl_secs: i64) -> Self {
        Self {
            embeddings: RwLock::new(HashMap::new()),
            searches: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            embedding_ttl: Duration::seconds(embedding_ttl_secs),
            search_ttl: Duration::seconds(search_ttl_secs),
        }
    }

    /// Embeddings are keyed by content hash.
    pub async fn get_embedding(&self, content_hash: &str) -> Option<Vec<f32>> {
        let hit = {
            let map = self.embeddings.read().await;
            map.get(content_hash)
                .filter(|e| e.expires_at > Utc::now())
                .map(|e| e.value.clone())
        };

        let mut stats = self.stats.write().await;
        if hit.is_some() {
            stats.embedding_hits += 1;
        } else {
            stats.embedding_misses += 1;
        }
        hit
    }

    pub async fn put_embedding(&self, content_hash: &str, embedding: Vec<f32>) {
        let mut map = self.embeddings.write().await;
        map.insert(
            content_hash.to_string(),
            Entry {
                value: embedding,
                expires_at: Utc::now() + self.embedding_ttl,
            },
        );
    }

    /// Search results are keyed by a query signature built by the service
    /// (scope + query hash + threshold + limit).
    pub async fn get_search(&self, signature: &str) -> Option<Vec<ScoredRecord>> {
        let hit = {
            let map = self.searches.read().await;
            map.get(signature)
                .filter(|e| e.expires_at > Utc::now())
                .map(|e| e.value.clone())
        };

        let mut stats = self.stats.write().await;
        if hit.is_some() {
            stats.search_hits += 1;
        } else {
            stats.search_misses += 1;
        }
        hit
    }

    pub async fn put_search(&self, signature: &str, results: Vec<ScoredRecord>) {
        let mut map = self.searches.write().await;
        map.insert(
            signature.to_string(),
            Entry {
                value: results,
                expires_at: Utc::now() + self.search_ttl,
            },
        );
    }

    /// Drop memoized search results whose scope changed. Embeddings survive:
    /// they are content-addressed.
    pub async fn invalidate_scope(&self, scope: Option<&str>) {
        let prefix = format!("{}|", scope.unwrap_or(""));
        let mut map = self.searches.write().await;
        map.retain(|key, _| !key.starts_with(&prefix));
    }

    pub async fn stats(&self) -> CacheStats {
        *self.stats.read().await
    }
}
