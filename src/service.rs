// src/service.rs

//! Public API and orchestration for the memory lifecycle engine.
//!
//! The service is the only component that writes to the store. The engines
//! (fingerprint, codec, similarity, decay, consolidation) are pure; this
//! module feeds them data, applies their decisions, and enforces the
//! per-scope serialization rules: dedup-hit writes, decay passes, and
//! consolidation over the same scope never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::MemoryCache;
use crate::config::EngramConfig;
use crate::consolidation;
use crate::decay;
use crate::embeddings::{DeferredEmbedder, EmbeddingClient};
use crate::error::{MemoryError, Result};
use crate::fingerprint;
use crate::similarity;
use crate::storage::MemoryStore;
use crate::types::{
    ConsolidationReport, DecayReport, ListFilter, MemoryRecord, MemoryStatus, ScoredRecord,
    StoreRequest, UpdatePatch,
};

pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<EmbeddingClient>,
    deferred: Option<Arc<DeferredEmbedder>>,
    cache: Option<Arc<MemoryCache>>,
    config: Arc<RwLock<EngramConfig>>,
    scope_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryService {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<EmbeddingClient>,
        config: EngramConfig,
    ) -> Self {
        info!("initializing memory service");
        Self {
            store,
            embedder,
            deferred: None,
            cache: None,
            config: Arc::new(RwLock::new(config)),
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_deferred(mut self, deferred: Arc<DeferredEmbedder>) -> Self {
        self.deferred = Some(deferred);
        self
    }

    pub fn with_cache(mut self, cache: Arc<MemoryCache>) -> Self {
        info!("result/embedding cache enabled");
        self.cache = Some(cache);
        self
    }

    /// Shared handle for the scheduler; tunables are re-read every cycle
    /// without restarting the loop.
    pub fn config_handle(&self) -> Arc<RwLock<EngramConfig>> {
        self.config.clone()
    }

    // ===== PRIMARY PUBLIC API =====

    /// Ingest content. Identical content in the same scope resolves to the
    /// existing active record (dedup hit) instead of creating a new row.
    pub async fn store(&self, request: StoreRequest) -> Result<MemoryRecord> {
        let config = self.config.read().await.clone();
        validate_store_fields(
            &request.content,
            &request.kind,
            &request.tags,
            request.confidence,
            &config,
        )?;

        let content_hash = fingerprint::content_hash(&request.content);
        let scope = request.user_context.clone();
        let now = Utc::now();

        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            content: request.content,
            content_hash: content_hash.clone(),
            kind: request.kind,
            tags: request.tags,
            source: request.source,
            confidence: request.confidence,
            user_context: request.user_context,
            embedding: None,
            access_count: 1,
            decay_score: 1.0,
            status: MemoryStatus::Active,
            cluster_id: None,
            is_compressed: false,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
        };

        // Dedup check and insert happen under the scope lock so two racing
        // stores of the same content cannot both miss. The record goes in
        // embedding-absent and the vector is filled in after the lock is
        // released: a slow provider must never stall the whole scope.
        let mut saved = {
            let lock = self.scope_lock(scope.as_deref()).await;
            let _guard = lock.lock().await;

            if let Some(existing) = self
                .store
                .find_active_by_hash(scope.as_deref(), &content_hash)
                .await?
            {
                debug!("dedup hit for hash {} in scope {:?}", &content_hash[..8], scope);
                self.store
                    .record_dedup_hit(&existing.id, request.confidence, now)
                    .await?;
                return self
                    .store
                    .get(&existing.id)
                    .await?
                    .ok_or_else(|| MemoryError::NotFound(existing.id));
            }

            self.store.insert(&record).await?
        };

        if request.defer_embedding {
            self.enqueue_embedding(&saved).await;
        } else {
            match self.embed_cached(&saved.content_hash, &saved.content).await {
                Ok(vector) => {
                    if self.store.set_embedding_if_absent(&saved.id, &vector).await? {
                        saved.embedding = Some(vector);
                    }
                }
                Err(err) => {
                    // Degrade instead of failing the store: the record
                    // persists embedding-absent and retries in background.
                    warn!("embedding failed, storing without vector: {err}");
                    self.enqueue_embedding(&saved).await;
                }
            }
        }
        self.invalidate_scope_cache(scope.as_deref()).await;

        Ok(saved)
    }

    /// Semantic search within a scope. Resolved hits get their access fields
    /// bumped here — ranking itself is read-only.
    pub async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        threshold: Option<f32>,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredRecord>> {
        let config = self.config.read().await.clone();
        let threshold = threshold.unwrap_or(config.search_default_threshold);
        let limit = limit.unwrap_or(config.search_default_limit);

        let query_hash = fingerprint::content_hash(query);
        let signature = format!(
            "{}|{}|{:.4}|{}",
            scope.unwrap_or(""),
            query_hash,
            threshold,
            limit
        );

        if let Some(cache) = &self.cache {
            if let Some(mut results) = cache.get_search(&signature).await {
                debug!("search cache hit for scope {:?}", scope);
                let now = Utc::now();
                self.bump_results(&results, now).await;
                // The memoized copies carry the access fields from when they
                // were cached; refresh them to match the store.
                for scored in &mut results {
                    scored.record.touch(now);
                }
                return Ok(results);
            }
        }

        let query_vector = self.embed_cached(&query_hash, query).await?;
        let candidates = self.store.load_search_candidates(scope).await?;
        let mut results = similarity::rank(&query_vector, candidates, threshold, limit);

        let now = Utc::now();
        for scored in &mut results {
            self.store.bump_access(&scored.record.id, now).await?;
            scored.record.touch(now);
        }

        if let Some(cache) = &self.cache {
            cache.put_search(&signature, results.clone()).await;
        }

        Ok(results)
    }

    /// Filtered listing. Soft-deleted and expired rows never appear here;
    /// direct `get` is the only way to reach them.
    pub async fn list(&self, mut filter: ListFilter) -> Result<Vec<MemoryRecord>> {
        if filter.limit == 0 {
            filter.limit = 50;
        }
        self.store.list(&filter).await
    }

    /// Direct lookup by id, any status.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        self.store.get(id).await
    }

    /// Partial field merge. Invariants are re-validated on the merged
    /// record; a concurrent mutation is retried once with a fresh read and
    /// then surfaced as a conflict.
    pub async fn update(&self, id: &str, patch: UpdatePatch) -> Result<MemoryRecord> {
        let config = self.config.read().await.clone();

        for attempt in 0..2 {
            let current = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
            if current.is_terminal() {
                return Err(MemoryError::NotFound(id.to_string()));
            }
            if patch.is_empty() {
                return Ok(current);
            }

            let scope = current.user_context.clone();
            let expected_updated_at = current.updated_at;
            let mut merged = current.clone();
            if let Some(content) = &patch.content {
                merged.content = content.clone();
            }
            if let Some(kind) = &patch.kind {
                merged.kind = kind.clone();
            }
            if let Some(tags) = &patch.tags {
                merged.tags = tags.clone();
            }
            if let Some(source) = &patch.source {
                merged.source = source.clone();
            }
            if let Some(confidence) = patch.confidence {
                merged.confidence = confidence;
            }

            validate_store_fields(
                &merged.content,
                &merged.kind,
                &merged.tags,
                merged.confidence,
                &config,
            )?;

            let content_changed = merged.content != current.content;
            if content_changed {
                merged.content_hash = fingerprint::content_hash(&merged.content);
                merged.embedding = None;
                // Embed outside the scope lock; the updated_at guard below
                // catches anything that changed in the meantime.
                match self.embed_cached(&merged.content_hash, &merged.content).await {
                    Ok(vector) => merged.embedding = Some(vector),
                    Err(err) => warn!("re-embedding after update failed: {err}"),
                }
            }

            let lock = self.scope_lock(scope.as_deref()).await;
            let _guard = lock.lock().await;

            if content_changed {
                // Re-validate the one-active-hash-per-scope invariant.
                if let Some(other) = self
                    .store
                    .find_active_by_hash(scope.as_deref(), &merged.content_hash)
                    .await?
                {
                    if other.id != merged.id {
                        return Err(MemoryError::Validation(
                            "identical active content already exists in scope".to_string(),
                        ));
                    }
                }
            }

            merged.updated_at = Utc::now();

            if self.store.update_record(&merged, expected_updated_at).await? {
                if merged.embedding.is_none() && content_changed {
                    self.enqueue_embedding(&merged).await;
                }
                self.invalidate_scope_cache(scope.as_deref()).await;
                // Return the store's view: `update_record` recomputed the
                // compression flag for the new content.
                return self
                    .store
                    .get(id)
                    .await?
                    .ok_or_else(|| MemoryError::NotFound(id.to_string()));
            }

            debug!("update of {id} lost a race (attempt {attempt}), re-reading");
        }

        Err(MemoryError::Conflict(id.to_string()))
    }

    /// Soft delete: the row stays for direct lookup but leaves list and
    /// search results permanently.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        if current.status == MemoryStatus::Deleted {
            return Err(MemoryError::NotFound(id.to_string()));
        }

        let now = Utc::now();
        if !self.store.mark_deleted(id, now).await? {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        self.invalidate_scope_cache(current.user_context.as_deref())
            .await;
        Ok(())
    }

    // ===== BACKGROUND PASSES =====

    /// One decay pass over every scope. Per-record failures are logged and
    /// skipped; a disabled pass is a no-op scan, not an error.
    pub async fn run_decay_pass(&self, now: DateTime<Utc>) -> Result<DecayReport> {
        let decay_config = self.config.read().await.decay();
        if !decay_config.enabled {
            debug!("decay disabled, skipping pass");
            return Ok(DecayReport::default());
        }

        let mut report = DecayReport::default();
        let interval = Duration::seconds(decay_config.interval_secs as i64);

        for scope in self.store.load_scopes().await? {
            // Decay and consolidation over one scope never interleave.
            let lock = self.scope_lock(scope.as_deref()).await;
            let _guard = lock.lock().await;

            let batch = match self.store.load_decay_batch(scope.as_deref()).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("decay scan of scope {:?} failed: {err}", scope);
                    report.failed += 1;
                    continue;
                }
            };

            // Cluster co-membership is the relationship signal.
            let mut cluster_sizes: HashMap<&str, usize> = HashMap::new();
            for record in &batch {
                if let Some(cluster) = &record.cluster_id {
                    *cluster_sizes.entry(cluster.as_str()).or_default() += 1;
                }
            }

            for record in &batch {
                report.scanned += 1;

                let recent_access_delta =
                    if now.signed_duration_since(record.last_accessed_at) < interval {
                        1
                    } else {
                        0
                    };
                let linked_count = record
                    .cluster_id
                    .as_ref()
                    .and_then(|c| cluster_sizes.get(c.as_str()))
                    .map(|n| n.saturating_sub(1))
                    .unwrap_or(0);

                let Some(outcome) =
                    decay::evaluate(record, &decay_config, now, recent_access_delta, linked_count)
                else {
                    continue;
                };

                match self
                    .store
                    .apply_decay(&record.id, outcome.new_score, outcome.new_status)
                    .await
                {
                    Ok(true) => {
                        if outcome.archived(record.status) {
                            report.archived += 1;
                        }
                        if outcome.expired(record.status) {
                            report.expired += 1;
                        }
                    }
                    Ok(false) => {
                        debug!("record {} reached a terminal status mid-pass, skipping", record.id)
                    }
                    // One failing record never aborts the batch.
                    Err(err) => {
                        warn!("decay update for {} failed: {err}", record.id);
                        report.failed += 1;
                    }
                }
            }

            self.invalidate_scope_cache(scope.as_deref()).await;
        }

        info!(
            "decay pass: {} scanned, {} archived, {} expired, {} failed",
            report.scanned, report.archived, report.expired, report.failed
        );
        Ok(report)
    }

    /// Merge near-duplicate active records in one scope. Idempotent: already
    /// clustered records are excluded from the candidate pool.
    pub async fn consolidate(&self, scope: Option<&str>) -> Result<ConsolidationReport> {
        let config = self.config.read().await.consolidation();
        if !config.enabled {
            debug!("consolidation disabled, skipping");
            return Ok(ConsolidationReport::default());
        }

        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;

        let candidates = self.store.load_cluster_candidates(scope).await?;
        let plans = consolidation::plan_clusters(&candidates, &config);

        let now = Utc::now();
        let mut report = ConsolidationReport::default();

        for plan in plans {
            // A cluster whose representative cannot be marked is skipped
            // whole; members are only archived under a recorded cluster id.
            match self
                .store
                .assign_cluster(
                    &plan.representative_id,
                    &plan.cluster_id,
                    MemoryStatus::Active,
                    now,
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        "skipping cluster {}: representative {} changed since planning",
                        plan.cluster_id, plan.representative_id
                    );
                    continue;
                }
                Err(err) => {
                    warn!(
                        "skipping cluster {}: representative {} update failed: {err}",
                        plan.cluster_id, plan.representative_id
                    );
                    continue;
                }
            }
            report.clusters_created += 1;

            for member_id in &plan.member_ids {
                match self
                    .store
                    .assign_cluster(member_id, &plan.cluster_id, MemoryStatus::Archived, now)
                    .await
                {
                    Ok(true) => report.records_archived += 1,
                    Ok(false) => debug!("member {member_id} changed since planning, skipping"),
                    Err(err) => warn!("archiving member {member_id} failed: {err}"),
                }
            }
        }

        self.invalidate_scope_cache(scope).await;

        info!(
            "consolidation of scope {:?}: {} clusters, {} archived",
            scope, report.clusters_created, report.records_archived
        );
        Ok(report)
    }

    // ===== INTERNAL =====

    async fn scope_lock(&self, scope: Option<&str>) -> Arc<Mutex<()>> {
        let key = scope.unwrap_or("").to_string();
        let mut locks = self.scope_locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Embed through the cache when one is attached; embeddings are keyed
    /// by content hash, so identical text never hits the provider twice.
    async fn embed_cached(&self, content_hash: &str, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get_embedding(content_hash).await {
                return Ok(vector);
            }
        }

        let vector = self.embedder.embed(text).await?;

        if let Some(cache) = &self.cache {
            cache.put_embedding(content_hash, vector.clone()).await;
        }
        Ok(vector)
    }

    async fn enqueue_embedding(&self, record: &MemoryRecord) {
        let Some(deferred) = &self.deferred else {
            debug!("no deferred embedder, {} stays embedding-absent", record.id);
            return;
        };
        let deferred = deferred.clone();
        let record_id = record.id.clone();
        let text = record.content.clone();
        // Fire and forget: the submit itself may wait for queue capacity.
        tokio::spawn(async move {
            deferred.submit(record_id, text).await;
        });
    }

    async fn bump_results(&self, results: &[ScoredRecord], now: DateTime<Utc>) {
        let bumps = results.iter().map(|scored| async move {
            if let Err(err) = self.store.bump_access(&scored.record.id, now).await {
                warn!("access bump for {} failed: {err}", scored.record.id);
            }
        });
        join_all(bumps).await;
    }

    async fn invalidate_scope_cache(&self, scope: Option<&str>) {
        if let Some(cache) = &self.cache {
            cache.invalidate_scope(scope).await;
        }
    }
}

/// Shared validation for store and update. Rejection happens before any
/// side effect.
fn validate_store_fields(
    content: &str,
    kind: &str,
    tags: &[String],
    confidence: f32,
    config: &EngramConfig,
) -> Result<()> {
    if content.is_empty() {
        return Err(MemoryError::Validation("content must not be empty".to_string()));
    }
    if content.len() > config.max_content_bytes {
        return Err(MemoryError::Validation(format!(
            "content is {} bytes, maximum is {}",
            content.len(),
            config.max_content_bytes
        )));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(MemoryError::Validation(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }
    if kind.is_empty() {
        return Err(MemoryError::Validation("kind must not be empty".to_string()));
    }
    if !config.allowed_kinds.is_empty() && !config.allowed_kinds.iter().any(|k| k == kind) {
        return Err(MemoryError::Validation(format!("unknown kind '{kind}'")));
    }
    if tags.len() > config.max_tags {
        return Err(MemoryError::Validation(format!(
            "{} tags exceed the maximum of {}",
            tags.len(),
            config.max_tags
        )));
    }
    for tag in tags {
        if tag.is_empty() || tag.len() > config.max_tag_length {
            return Err(MemoryError::Validation(format!(
                "tag '{tag}' is empty or longer than {} characters",
                config.max_tag_length
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejects_bad_fields() {
        let config = EngramConfig::default();

        assert!(validate_store_fields("", "fact", &[], 0.5, &config).is_err());
        assert!(validate_store_fields("ok", "", &[], 0.5, &config).is_err());
        assert!(validate_store_fields("ok", "fact", &[], 1.5, &config).is_err());
        assert!(validate_store_fields("ok", "fact", &[], -0.1, &config).is_err());

        let too_many: Vec<String> = (0..config.max_tags + 1).map(|i| format!("t{i}")).collect();
        assert!(validate_store_fields("ok", "fact", &too_many, 0.5, &config).is_err());

        let long_tag = vec!["x".repeat(config.max_tag_length + 1)];
        assert!(validate_store_fields("ok", "fact", &long_tag, 0.5, &config).is_err());

        assert!(validate_store_fields("ok", "fact", &["a".to_string()], 0.5, &config).is_ok());
    }

    #[test]
    fn test_validation_enforces_allowed_kinds() {
        let mut config = EngramConfig::default();
        config.allowed_kinds = vec!["fact".to_string(), "context".to_string()];

        assert!(validate_store_fields("ok", "fact", &[], 0.5, &config).is_ok());
        assert!(validate_store_fields("ok", "opinion", &[], 0.5, &config).is_err());
    }

    #[test]
    fn test_validation_enforces_hard_max_size() {
        let mut config = EngramConfig::default();
        config.max_content_bytes = 10;

        assert!(validate_store_fields("short", "fact", &[], 0.5, &config).is_ok());
        assert!(validate_store_fields("this is far too long", "fact", &[], 0.5, &config).is_err());
    }
}
