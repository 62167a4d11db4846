// src/storage/sqlite.rs

//! Implements MemoryStore for SQLite. Embeddings live as little-endian f32
//! BLOBs; content is stored through the codec so rows above the compression
//! threshold hold gzip bytes while every caller sees logical text.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::codec;
use crate::error::Result;
use crate::storage::MemoryStore;
use crate::types::{ListFilter, MemoryRecord, MemoryStatus};

pub struct SqliteMemoryStore {
    pub pool: SqlitePool,
    compression_threshold: usize,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool, compression_threshold: usize) -> Self {
        Self {
            pool,
            compression_threshold,
        }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        crate::storage::migration::run_migrations(&self.pool).await
    }

    // Helper to convert Vec<f32> to Vec<u8> for BLOB storage
    fn embedding_to_blob(embedding: &Option<Vec<f32>>) -> Option<Vec<u8>> {
        embedding.as_ref().map(|vec| {
            vec.iter()
                .flat_map(|f| f.to_le_bytes())
                .collect::<Vec<u8>>()
        })
    }

    // Helper to convert BLOB (Vec<u8>) to Vec<f32>
    fn blob_to_embedding(blob: Option<Vec<u8>>) -> Option<Vec<f32>> {
        blob.map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|chunk| {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(chunk);
                    f32::from_le_bytes(buf)
                })
                .collect()
        })
    }

    fn map_row(row: &SqliteRow) -> Result<MemoryRecord> {
        let content_bytes: Vec<u8> = row.get("content");
        let is_compressed: bool = row.get::<i64, _>("is_compressed") != 0;
        let content = codec::decode(&content_bytes, is_compressed)?;

        let tags: String = row.get("tags");
        let tags: Vec<String> = serde_json::from_str(&tags).unwrap_or_default();

        let status: String = row.get("status");
        let status: MemoryStatus = status.parse().unwrap_or(MemoryStatus::Active);

        let created_at: NaiveDateTime = row.get("created_at");
        let updated_at: NaiveDateTime = row.get("updated_at");
        let last_accessed_at: NaiveDateTime = row.get("last_accessed_at");

        Ok(MemoryRecord {
            id: row.get("id"),
            content,
            content_hash: row.get("content_hash"),
            kind: row.get("kind"),
            tags,
            source: row.get("source"),
            confidence: row.get("confidence"),
            user_context: row.get("user_context"),
            embedding: Self::blob_to_embedding(row.get("embedding")),
            access_count: row.get("access_count"),
            decay_score: row.get("decay_score"),
            status,
            cluster_id: row.get("cluster_id"),
            is_compressed,
            created_at: Utc.from_utc_datetime(&created_at),
            updated_at: Utc.from_utc_datetime(&updated_at),
            last_accessed_at: Utc.from_utc_datetime(&last_accessed_at),
        })
    }

    async fn fetch_by_status(
        &self,
        scope: Option<&str>,
        statuses: &str,
        require_embedding: bool,
        require_unclustered: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let mut sql = format!(
            "SELECT * FROM memories WHERE user_context IS ? AND status IN ({statuses})"
        );
        if require_embedding {
            sql.push_str(" AND embedding IS NOT NULL");
        }
        if require_unclustered {
            sql.push_str(" AND cluster_id IS NULL");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let rows = sqlx::query(&sql).bind(scope).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn insert(&self, record: &MemoryRecord) -> Result<MemoryRecord> {
        let (content_bytes, is_compressed) =
            codec::encode(&record.content, self.compression_threshold);
        let tags_json = serde_json::to_string(&record.tags)?;

        sqlx::query(
            r#"
            INSERT INTO memories (
                id, content, is_compressed, content_hash, kind, tags, source,
                confidence, user_context, embedding, access_count, decay_score,
                status, cluster_id, created_at, updated_at, last_accessed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(content_bytes)
        .bind(is_compressed as i64)
        .bind(&record.content_hash)
        .bind(&record.kind)
        .bind(tags_json)
        .bind(&record.source)
        .bind(record.confidence)
        .bind(&record.user_context)
        .bind(Self::embedding_to_blob(&record.embedding))
        .bind(record.access_count)
        .bind(record.decay_score)
        .bind(record.status.as_str())
        .bind(&record.cluster_id)
        .bind(record.created_at.naive_utc())
        .bind(record.updated_at.naive_utc())
        .bind(record.last_accessed_at.naive_utc())
        .execute(&self.pool)
        .await?;

        let mut saved = record.clone();
        saved.is_compressed = is_compressed;
        Ok(saved)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_active_by_hash(
        &self,
        scope: Option<&str>,
        content_hash: &str,
    ) -> Result<Option<MemoryRecord>> {
        let row = sqlx::query(
            "SELECT * FROM memories
             WHERE user_context IS ? AND content_hash = ? AND status = 'active'
             LIMIT 1",
        )
        .bind(scope)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<MemoryRecord>> {
        let mut sql = String::from(
            "SELECT * FROM memories WHERE status NOT IN ('deleted', 'expired')",
        );
        if filter.user_context.is_some() {
            sql.push_str(" AND user_context IS ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        // Tag containment runs inside SQL so it composes with LIMIT/OFFSET;
        // tags live as a JSON array column.
        for _ in &filter.tags {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value = ?)",
            );
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let limit = if filter.limit == 0 { -1 } else { filter.limit as i64 };

        let mut query = sqlx::query(&sql);
        if let Some(scope) = &filter.user_context {
            query = query.bind(scope);
        }
        if let Some(kind) = &filter.kind {
            query = query.bind(kind);
        }
        for tag in &filter.tags {
            query = query.bind(tag);
        }
        let rows = query
            .bind(limit)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn update_record(
        &self,
        record: &MemoryRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let (content_bytes, is_compressed) =
            codec::encode(&record.content, self.compression_threshold);
        let tags_json = serde_json::to_string(&record.tags)?;

        let result = sqlx::query(
            r#"
            UPDATE memories
            SET content = ?, is_compressed = ?, content_hash = ?, kind = ?,
                tags = ?, source = ?, confidence = ?, embedding = ?,
                decay_score = ?, status = ?, updated_at = ?
            WHERE id = ? AND updated_at = ?
            "#,
        )
        .bind(content_bytes)
        .bind(is_compressed as i64)
        .bind(&record.content_hash)
        .bind(&record.kind)
        .bind(tags_json)
        .bind(&record.source)
        .bind(record.confidence)
        .bind(Self::embedding_to_blob(&record.embedding))
        .bind(record.decay_score)
        .bind(record.status.as_str())
        .bind(record.updated_at.naive_utc())
        .bind(&record.id)
        .bind(expected_updated_at.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_deleted(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE memories SET status = 'deleted', updated_at = ?
             WHERE id = ? AND status != 'deleted'",
        )
        .bind(now.naive_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_dedup_hit(
        &self,
        id: &str,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Single statement: an interleaved decay write cannot lose the bump.
        let result = sqlx::query(
            "UPDATE memories
             SET access_count = access_count + 1,
                 last_accessed_at = ?,
                 confidence = MAX(confidence, ?),
                 updated_at = ?
             WHERE id = ? AND status = 'active'",
        )
        .bind(now.naive_utc())
        .bind(confidence)
        .bind(now.naive_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn bump_access(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE memories
             SET access_count = access_count + 1, last_accessed_at = ?
             WHERE id = ?",
        )
        .bind(now.naive_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_embedding_if_absent(&self, id: &str, embedding: &[f32]) -> Result<bool> {
        let blob = Self::embedding_to_blob(&Some(embedding.to_vec()));
        let result = sqlx::query(
            "UPDATE memories SET embedding = ? WHERE id = ? AND embedding IS NULL",
        )
        .bind(blob)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn load_scopes(&self) -> Result<Vec<Option<String>>> {
        let rows = sqlx::query(
            "SELECT DISTINCT user_context FROM memories
             WHERE status IN ('active', 'archived')",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("user_context")).collect())
    }

    async fn load_decay_batch(&self, scope: Option<&str>) -> Result<Vec<MemoryRecord>> {
        self.fetch_by_status(scope, "'active', 'archived'", false, false)
            .await
    }

    async fn load_cluster_candidates(&self, scope: Option<&str>) -> Result<Vec<MemoryRecord>> {
        self.fetch_by_status(scope, "'active'", true, true).await
    }

    async fn load_search_candidates(&self, scope: Option<&str>) -> Result<Vec<MemoryRecord>> {
        self.fetch_by_status(scope, "'active'", true, false).await
    }

    async fn apply_decay(&self, id: &str, score: f32, status: MemoryStatus) -> Result<bool> {
        // Terminal rows are never revived: a pass that loaded the record
        // before a concurrent delete must not overwrite the delete.
        let result = sqlx::query(
            "UPDATE memories SET decay_score = ?, status = ?
             WHERE id = ? AND status NOT IN ('deleted', 'expired')",
        )
        .bind(score)
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn assign_cluster(
        &self,
        id: &str,
        cluster_id: &str,
        status: MemoryStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Candidates were loaded as active; anything that changed since
        // (deleted, decayed, clustered by another pass) is left alone.
        let result = sqlx::query(
            "UPDATE memories SET cluster_id = ?, status = ?, updated_at = ?
             WHERE id = ? AND status = 'active' AND cluster_id IS NULL",
        )
        .bind(cluster_id)
        .bind(status.as_str())
        .bind(now.naive_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
