// src/types.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary record for persisted memory items.
///
/// `content` is always the logical (uncompressed) text here; the storage
/// layer handles the compressed representation behind `is_compressed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    /// Hex sha256 of the uncompressed content bytes.
    pub content_hash: String,
    /// Open categorical tag, e.g. "fact", "context".
    pub kind: String,
    pub tags: Vec<String>,
    pub source: String,
    /// Caller-asserted reliability, clamped to [0,1].
    pub confidence: f32,
    /// Scope for dedup/search/decay/consolidation. Records in different
    /// scopes (including the absent scope) never interact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub access_count: i64,
    pub decay_score: f32,
    pub status: MemoryStatus,
    /// Set only by the consolidation engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    /// Storage-level flag; callers never observe compressed bytes.
    pub is_compressed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Mark the record as accessed now. Every read that resolves to this
    /// record, including a dedup hit, goes through here.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    pub fn has_preservation_tag(&self, preservation_tags: &[String]) -> bool {
        self.tags.iter().any(|t| preservation_tags.contains(t))
    }

    /// Baseline for decay math: last access, falling back to creation.
    pub fn decay_baseline(&self) -> DateTime<Utc> {
        self.last_accessed_at.max(self.created_at)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, MemoryStatus::Expired | MemoryStatus::Deleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Active,
    Archived,
    Expired,
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Archived => "archived",
            MemoryStatus::Expired => "expired",
            MemoryStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Parse status defensively from DB text; unknown values fold to Active
// rather than failing a whole row scan.
impl FromStr for MemoryStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "archived" => MemoryStatus::Archived,
            "expired" => MemoryStatus::Expired,
            "deleted" => MemoryStatus::Deleted,
            _ => MemoryStatus::Active,
        })
    }
}

/// Caller input for `MemoryService::store`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreRequest {
    pub content: String,
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: String,
    pub confidence: f32,
    #[serde(default)]
    pub user_context: Option<String>,
    /// When true, `store` returns before the embedding exists and the
    /// deferred worker fills it in later.
    #[serde(default)]
    pub defer_embedding: bool,
}

/// Partial field merge for `MemoryService::update`. Absent fields keep
/// their current value; invariants are re-validated on the merged record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePatch {
    pub content: Option<String>,
    pub kind: Option<String>,
    pub tags: Option<Vec<String>>,
    pub source: Option<String>,
    pub confidence: Option<f32>,
}

impl UpdatePatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.kind.is_none()
            && self.tags.is_none()
            && self.source.is_none()
            && self.confidence.is_none()
    }
}

/// Filters for `MemoryService::list`. Deleted and expired rows are always
/// excluded; direct lookup by id is the only way to reach them.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub kind: Option<String>,
    pub tags: Vec<String>,
    pub user_context: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// A search result with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Outcome of one decay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecayReport {
    pub scanned: usize,
    pub archived: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Outcome of one consolidation run over a scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub clusters_created: usize,
    pub records_archived: usize,
}
