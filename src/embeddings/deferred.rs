// src/embeddings/deferred.rs

//! Deferred embedding queue. `store` can return before the vector exists;
//! a single worker drains the queue, generates embeddings through the same
//! bounded client as interactive calls, and completes each job with a
//! conflict-safe in-place update (only an absent embedding is filled, so a
//! record re-embedded in the meantime is left untouched).

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::EmbeddingClient;
use crate::storage::MemoryStore;

#[derive(Debug)]
pub struct EmbedJob {
    pub record_id: String,
    pub text: String,
}

pub struct DeferredEmbedder {
    // Taken on shutdown so the channel closes and the worker drains.
    sender: Mutex<Option<mpsc::Sender<EmbedJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredEmbedder {
    pub fn spawn(
        client: Arc<EmbeddingClient>,
        store: Arc<dyn MemoryStore>,
        queue_size: usize,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<EmbedJob>(queue_size.max(1));

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                match client.embed(&job.text).await {
                    Ok(vector) => {
                        match store.set_embedding_if_absent(&job.record_id, &vector).await {
                            Ok(true) => debug!("deferred embedding stored for {}", job.record_id),
                            Ok(false) => {
                                debug!("record {} already embedded or gone, skipping", job.record_id)
                            }
                            Err(err) => {
                                warn!("failed to store embedding for {}: {err}", job.record_id)
                            }
                        }
                    }
                    // Terminal failure: the record stays searchable by exact
                    // lookup only, with embedding absent.
                    Err(err) => warn!("deferred embedding for {} failed: {err}", job.record_id),
                }
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a job. Waits for queue capacity rather than dropping work;
    /// callers who must not block wrap this in `tokio::spawn`.
    pub async fn submit(&self, record_id: String, text: String) -> bool {
        let sender = self.sender.lock().await.clone();
        let Some(sender) = sender else {
            warn!("deferred embedding queue closed, dropping job for {record_id}");
            return false;
        };
        match sender.send(EmbedJob { record_id, text }).await {
            Ok(()) => true,
            Err(err) => {
                warn!("deferred embedding queue closed, dropping job for {}", err.0.record_id);
                false
            }
        }
    }

    /// Close the queue and wait for the worker to finish every in-flight
    /// and already-queued job. Idempotent.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!("deferred embedding worker ended abnormally: {err}");
            }
        }
    }
}
