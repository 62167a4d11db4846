// src/decay.rs

//! Relevance decay scoring and the active → archived → expired state
//! machine. Everything here is pure: the engine evaluates one record at a
//! time against an injected `now` and returns a decision, and the service
//! applies decisions against the store. Decay never promotes a record.

use chrono::{DateTime, Utc};

use crate::types::{MemoryRecord, MemoryStatus};

/// Decay tunables, passed in at invocation time so tests can pin rates.
#[derive(Debug, Clone)]
pub struct DecayConfig {
    /// Global kill switch; a disabled pass is a no-op scan, not an error.
    pub enabled: bool,
    /// Seconds per decay interval; elapsed time is counted in intervals.
    pub interval_secs: u64,
    /// Score lost per elapsed interval.
    pub base_decay_rate: f32,
    /// Score recovered per access observed since the previous pass.
    pub access_boost: f32,
    /// Score recovered per linked record (cluster co-members).
    pub relationship_boost: f32,
    /// Active records scoring below this are archived.
    pub archival_threshold: f32,
    /// Archived records scoring below this expire. Strictly below archival.
    pub expiration_threshold: f32,
    /// Tags that freeze score and status entirely.
    pub preservation_tags: Vec<String>,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            base_decay_rate: 0.05,
            access_boost: 0.1,
            relationship_boost: 0.02,
            archival_threshold: 0.3,
            expiration_threshold: 0.1,
            preservation_tags: vec!["permanent".to_string(), "pinned".to_string()],
        }
    }
}

/// What one decay evaluation decided for a record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayOutcome {
    pub new_score: f32,
    pub new_status: MemoryStatus,
}

impl DecayOutcome {
    pub fn archived(&self, was: MemoryStatus) -> bool {
        was == MemoryStatus::Active && self.new_status == MemoryStatus::Archived
    }

    pub fn expired(&self, was: MemoryStatus) -> bool {
        was != MemoryStatus::Expired && self.new_status == MemoryStatus::Expired
    }
}

/// Number of whole decay intervals since the record's baseline (last access,
/// falling back to creation).
pub fn elapsed_intervals(record: &MemoryRecord, config: &DecayConfig, now: DateTime<Utc>) -> u64 {
    if config.interval_secs == 0 {
        return 0;
    }
    let elapsed = now
        .signed_duration_since(record.decay_baseline())
        .num_seconds()
        .max(0) as u64;
    elapsed / config.interval_secs
}

/// New decay score for a record.
///
/// `recent_access_delta` is the number of accesses observed since the
/// previous pass and `linked_count` the number of cluster co-members; both
/// are supplied by the caller, which has the scope-wide view. Boosts offset
/// decay but never raise the score above its previous value — only a real
/// access (`touch`) refreshes relevance upward, so repeated passes without
/// intervening access are monotone non-increasing.
pub fn compute_score(
    record: &MemoryRecord,
    config: &DecayConfig,
    now: DateTime<Utc>,
    recent_access_delta: u64,
    linked_count: usize,
) -> f32 {
    let intervals = elapsed_intervals(record, config, now) as f32;
    let raw = record.decay_score - config.base_decay_rate * intervals
        + config.access_boost * recent_access_delta as f32
        + config.relationship_boost * linked_count as f32;
    raw.clamp(0.0, record.decay_score.clamp(0.0, 1.0))
}

/// Evaluate one record. Returns `None` when the record is exempt: terminal
/// status, or carrying a preservation tag (score and status frozen).
pub fn evaluate(
    record: &MemoryRecord,
    config: &DecayConfig,
    now: DateTime<Utc>,
    recent_access_delta: u64,
    linked_count: usize,
) -> Option<DecayOutcome> {
    if record.is_terminal() {
        return None;
    }
    if record.has_preservation_tag(&config.preservation_tags) {
        return None;
    }

    let new_score = compute_score(record, config, now, recent_access_delta, linked_count);

    let mut new_status = record.status;
    if new_status == MemoryStatus::Active && new_score < config.archival_threshold {
        new_status = MemoryStatus::Archived;
    }
    if new_status == MemoryStatus::Archived && new_score < config.expiration_threshold {
        new_status = MemoryStatus::Expired;
    }

    Some(DecayOutcome { new_score, new_status })
}
