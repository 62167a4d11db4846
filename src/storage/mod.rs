// src/storage/mod.rs

//! Storage seam for memory records. All persistence goes through the
//! [`MemoryStore`] trait — engines never touch the database directly, they
//! operate on records handed to them and return decisions for the service
//! to apply.

pub mod migration;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ListFilter, MemoryRecord, MemoryStatus};

pub use sqlite::SqliteMemoryStore;

/// Trait for a memory record backend with transactional CRUD plus the
/// candidate scans the engines rank over.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a new record and return it as stored. Content is compressed
    /// behind the codec inside the store; callers pass logical content and
    /// the returned record carries the final `is_compressed` flag.
    async fn insert(&self, record: &MemoryRecord) -> Result<MemoryRecord>;

    /// Direct lookup by id, any status. This is the only path that reaches
    /// deleted or expired rows.
    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>>;

    /// The dedup probe: the active record carrying this hash in this scope.
    async fn find_active_by_hash(
        &self,
        scope: Option<&str>,
        content_hash: &str,
    ) -> Result<Option<MemoryRecord>>;

    /// Filtered listing; deleted and expired rows are always excluded.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<MemoryRecord>>;

    /// Full-row update guarded by the previously observed `updated_at`.
    /// Returns false when the guard missed (concurrent modification).
    async fn update_record(
        &self,
        record: &MemoryRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Soft delete. Returns false when the row is missing or already deleted.
    async fn mark_deleted(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Atomic dedup-hit bump: access_count += 1, last_accessed_at = now,
    /// confidence = max(stored, incoming). Single statement, so a concurrent
    /// decay pass cannot lose the increment.
    async fn record_dedup_hit(&self, id: &str, confidence: f32, now: DateTime<Utc>) -> Result<bool>;

    /// Atomic access bump used by the facade after search resolves a hit.
    async fn bump_access(&self, id: &str, now: DateTime<Utc>) -> Result<()>;

    /// Deferred embedding completion. Only fills an absent embedding, so a
    /// record re-embedded in the meantime is left alone.
    async fn set_embedding_if_absent(&self, id: &str, embedding: &[f32]) -> Result<bool>;

    /// Distinct scopes holding non-terminal records, for decay iteration.
    async fn load_scopes(&self) -> Result<Vec<Option<String>>>;

    /// Active and archived records in a scope, for the decay pass.
    async fn load_decay_batch(&self, scope: Option<&str>) -> Result<Vec<MemoryRecord>>;

    /// Active, embedded, unclustered records in a scope — the consolidation
    /// candidate pool.
    async fn load_cluster_candidates(&self, scope: Option<&str>) -> Result<Vec<MemoryRecord>>;

    /// Active, embedded records in a scope — the vector search candidate
    /// scan the similarity engine ranks over.
    async fn load_search_candidates(&self, scope: Option<&str>) -> Result<Vec<MemoryRecord>>;

    /// Persist one decay decision. Guarded: a row that reached a terminal
    /// status since it was loaded is left alone, and the write reports
    /// false instead of reviving it.
    async fn apply_decay(&self, id: &str, score: f32, status: MemoryStatus) -> Result<bool>;

    /// Persist one consolidation decision for a single record. Guarded the
    /// same way: only a still-active, still-unclustered row is written.
    async fn assign_cluster(
        &self,
        id: &str,
        cluster_id: &str,
        status: MemoryStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}
