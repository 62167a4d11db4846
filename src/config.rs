// src/config.rs
// All tunables load from the environment; tests construct the struct
// directly via Default and override what they need.

use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EngramConfig {
    // ── Database
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Content limits
    /// Hard cap on uncompressed content size (bytes). Rejected above this.
    pub max_content_bytes: usize,
    /// Content larger than this is stored gzip-compressed.
    pub compression_threshold_bytes: usize,
    pub max_tags: usize,
    pub max_tag_length: usize,
    /// Allowed record kinds; empty list accepts any non-empty kind.
    pub allowed_kinds: Vec<String>,

    // ── Embedding provider
    pub embedding_base_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    /// Global cap on in-flight provider calls (interactive + deferred).
    pub embed_concurrency: usize,
    pub embed_timeout_secs: u64,
    pub embed_max_retries: u32,
    pub embed_retry_base_ms: u64,
    /// Capacity of the deferred embedding queue.
    pub embed_queue_size: usize,

    // ── Search
    pub search_default_threshold: f32,
    pub search_default_limit: usize,

    // ── Decay
    pub decay_enabled: bool,
    pub decay_interval_secs: u64,
    pub base_decay_rate: f32,
    pub access_boost: f32,
    pub relationship_boost: f32,
    pub archival_threshold: f32,
    pub expiration_threshold: f32,
    /// Tags that freeze a record's score and status entirely.
    pub preservation_tags: Vec<String>,

    // ── Consolidation
    pub consolidation_enabled: bool,
    pub consolidation_similarity_threshold: f32,
    pub min_cluster_size: usize,

    // ── Cache TTLs (seconds)
    pub cache_enabled: bool,
    pub cache_embedding_ttl_secs: i64,
    pub cache_search_ttl_secs: i64,

    // ── Logging
    pub log_level: String,
}

// Parses an env var, stripping inline comments and whitespace; missing or
// unparseable values fall back to the default.
fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean = val.split('#').next().unwrap_or("").trim();
            clean.parse::<T>().unwrap_or(default)
        }
        Err(_) => default,
    }
}

fn env_list_or(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(val) => val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl EngramConfig {
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            tracing::debug!("no .env file found, using environment and defaults");
        }

        Self {
            database_url: env_var_or("ENGRAM_DATABASE_URL", "sqlite:./engram.db".to_string()),
            sqlite_max_connections: env_var_or("ENGRAM_SQLITE_MAX_CONNECTIONS", 10),

            max_content_bytes: env_var_or("ENGRAM_MAX_CONTENT_BYTES", 1_000_000),
            compression_threshold_bytes: env_var_or("ENGRAM_COMPRESSION_THRESHOLD_BYTES", 10_000),
            max_tags: env_var_or("ENGRAM_MAX_TAGS", 20),
            max_tag_length: env_var_or("ENGRAM_MAX_TAG_LENGTH", 64),
            allowed_kinds: env_list_or("ENGRAM_ALLOWED_KINDS", &[]),

            embedding_base_url: env_var_or(
                "ENGRAM_EMBEDDING_BASE_URL",
                "https://api.openai.com".to_string(),
            ),
            embedding_api_key: env_var_or("ENGRAM_EMBEDDING_API_KEY", String::new()),
            embedding_model: env_var_or(
                "ENGRAM_EMBEDDING_MODEL",
                "text-embedding-3-small".to_string(),
            ),
            embedding_dim: env_var_or("ENGRAM_EMBEDDING_DIM", 1536),
            embed_concurrency: env_var_or("ENGRAM_EMBED_CONCURRENCY", 4),
            embed_timeout_secs: env_var_or("ENGRAM_EMBED_TIMEOUT_SECS", 30),
            embed_max_retries: env_var_or("ENGRAM_EMBED_MAX_RETRIES", 3),
            embed_retry_base_ms: env_var_or("ENGRAM_EMBED_RETRY_BASE_MS", 250),
            embed_queue_size: env_var_or("ENGRAM_EMBED_QUEUE_SIZE", 256),

            search_default_threshold: env_var_or("ENGRAM_SEARCH_THRESHOLD", 0.3),
            search_default_limit: env_var_or("ENGRAM_SEARCH_LIMIT", 10),

            decay_enabled: env_var_or("ENGRAM_DECAY_ENABLED", true),
            decay_interval_secs: env_var_or("ENGRAM_DECAY_INTERVAL_SECS", 3600),
            base_decay_rate: env_var_or("ENGRAM_BASE_DECAY_RATE", 0.05),
            access_boost: env_var_or("ENGRAM_ACCESS_BOOST", 0.1),
            relationship_boost: env_var_or("ENGRAM_RELATIONSHIP_BOOST", 0.02),
            archival_threshold: env_var_or("ENGRAM_ARCHIVAL_THRESHOLD", 0.3),
            expiration_threshold: env_var_or("ENGRAM_EXPIRATION_THRESHOLD", 0.1),
            preservation_tags: env_list_or("ENGRAM_PRESERVATION_TAGS", &["permanent", "pinned"]),

            consolidation_enabled: env_var_or("ENGRAM_CONSOLIDATION_ENABLED", true),
            consolidation_similarity_threshold: env_var_or(
                "ENGRAM_CONSOLIDATION_SIMILARITY_THRESHOLD",
                0.85,
            ),
            min_cluster_size: env_var_or("ENGRAM_MIN_CLUSTER_SIZE", 2),

            cache_enabled: env_var_or("ENGRAM_CACHE_ENABLED", true),
            cache_embedding_ttl_secs: env_var_or("ENGRAM_CACHE_EMBEDDING_TTL_SECS", 86_400),
            cache_search_ttl_secs: env_var_or("ENGRAM_CACHE_SEARCH_TTL_SECS", 60),

            log_level: env_var_or("ENGRAM_LOG_LEVEL", "info".to_string()),
        }
    }

    /// Decay subsection, passed by value into the engine so tests can pin
    /// rates without touching process state.
    pub fn decay(&self) -> crate::decay::DecayConfig {
        crate::decay::DecayConfig {
            enabled: self.decay_enabled,
            interval_secs: self.decay_interval_secs,
            base_decay_rate: self.base_decay_rate,
            access_boost: self.access_boost,
            relationship_boost: self.relationship_boost,
            archival_threshold: self.archival_threshold,
            expiration_threshold: self.expiration_threshold,
            preservation_tags: self.preservation_tags.clone(),
        }
    }

    /// Consolidation subsection.
    pub fn consolidation(&self) -> crate::consolidation::ConsolidationConfig {
        crate::consolidation::ConsolidationConfig {
            enabled: self.consolidation_enabled,
            similarity_threshold: self.consolidation_similarity_threshold,
            min_cluster_size: self.min_cluster_size,
        }
    }

    pub fn is_preservation_tag(&self, tag: &str) -> bool {
        self.preservation_tags.iter().any(|t| t == tag)
    }
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            sqlite_max_connections: 1,
            max_content_bytes: 1_000_000,
            compression_threshold_bytes: 10_000,
            max_tags: 20,
            max_tag_length: 64,
            allowed_kinds: Vec::new(),
            embedding_base_url: "https://api.openai.com".to_string(),
            embedding_api_key: String::new(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 1536,
            embed_concurrency: 4,
            embed_timeout_secs: 30,
            embed_max_retries: 3,
            embed_retry_base_ms: 250,
            embed_queue_size: 256,
            search_default_threshold: 0.3,
            search_default_limit: 10,
            decay_enabled: true,
            decay_interval_secs: 3600,
            base_decay_rate: 0.05,
            access_boost: 0.1,
            relationship_boost: 0.02,
            archival_threshold: 0.3,
            expiration_threshold: 0.1,
            preservation_tags: vec!["permanent".to_string(), "pinned".to_string()],
            consolidation_enabled: true,
            consolidation_similarity_threshold: 0.85,
            min_cluster_size: 2,
            cache_enabled: true,
            cache_embedding_ttl_secs: 86_400,
            cache_search_ttl_secs: 60,
            log_level: "info".to_string(),
        }
    }
}
