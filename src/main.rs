// src/main.rs

use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engram::config::EngramConfig;
use engram::embeddings::{
    DeferredEmbedder, EmbeddingClient, EmbeddingClientConfig, HttpEmbeddingProvider,
};
use engram::cache::MemoryCache;
use engram::scheduler::spawn_decay_scheduler;
use engram::service::MemoryService;
use engram::storage::SqliteMemoryStore;

#[derive(Parser)]
#[command(name = "engram", about = "Memory lifecycle engine daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the long-lived daemon with the background decay loop.
    Serve,
    /// Run a single decay pass and exit.
    DecayOnce,
    /// Consolidate one scope and exit.
    Consolidate {
        /// Scope to consolidate; omit for the unscoped pool.
        #[arg(long)]
        scope: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngramConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let cli = Cli::parse();

    info!("starting engram (db: {})", config.database_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.sqlite_max_connections)
        .connect(&config.database_url)
        .await?;

    let store = Arc::new(SqliteMemoryStore::new(
        pool,
        config.compression_threshold_bytes,
    ));
    store.run_migrations().await?;

    let provider = Arc::new(HttpEmbeddingProvider::new(
        config.embedding_base_url.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.embedding_dim,
    ));
    let embedder = Arc::new(EmbeddingClient::new(
        provider,
        EmbeddingClientConfig {
            concurrency: config.embed_concurrency,
            timeout: std::time::Duration::from_secs(config.embed_timeout_secs),
            max_retries: config.embed_max_retries,
            retry_base: std::time::Duration::from_millis(config.embed_retry_base_ms),
        },
    ));

    let deferred = Arc::new(DeferredEmbedder::spawn(
        embedder.clone(),
        store.clone(),
        config.embed_queue_size,
    ));

    let mut service =
        MemoryService::new(store.clone(), embedder, config.clone()).with_deferred(deferred.clone());
    if config.cache_enabled {
        service = service.with_cache(Arc::new(MemoryCache::new(
            config.cache_embedding_ttl_secs,
            config.cache_search_ttl_secs,
        )));
    }
    let service = Arc::new(service);

    match cli.command {
        Command::Serve => {
            let scheduler = spawn_decay_scheduler(service.clone());
            info!("decay scheduler running every {}s", config.decay_interval_secs);
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            scheduler.abort();
            // Let queued embedding jobs complete instead of dropping them
            // mid-flight.
            deferred.shutdown().await;
        }
        Command::DecayOnce => {
            let report = service.run_decay_pass(chrono::Utc::now()).await?;
            info!(
                "decay pass: {} scanned, {} archived, {} expired, {} failed",
                report.scanned, report.archived, report.expired, report.failed
            );
        }
        Command::Consolidate { scope } => {
            let report = service.consolidate(scope.as_deref()).await?;
            info!(
                "consolidation: {} clusters created, {} records archived",
                report.clusters_created, report.records_archived
            );
        }
    }

    Ok(())
}
