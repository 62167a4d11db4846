// src/storage/migration.rs
// Schema bootstrap. Idempotent; safe to run on every startup.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id               TEXT PRIMARY KEY,
            content          BLOB NOT NULL,
            is_compressed    INTEGER NOT NULL DEFAULT 0,
            content_hash     TEXT NOT NULL,
            kind             TEXT NOT NULL,
            tags             TEXT NOT NULL DEFAULT '[]',
            source           TEXT NOT NULL DEFAULT '',
            confidence       REAL NOT NULL DEFAULT 0.5,
            user_context     TEXT,
            embedding        BLOB,
            access_count     INTEGER NOT NULL DEFAULT 1,
            decay_score      REAL NOT NULL DEFAULT 1.0,
            status           TEXT NOT NULL DEFAULT 'active',
            cluster_id       TEXT,
            created_at       TIMESTAMP NOT NULL,
            updated_at       TIMESTAMP NOT NULL,
            last_accessed_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dedup probes and scope scans are the hot paths.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_memories_hash ON memories (content_hash, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories (user_context, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
