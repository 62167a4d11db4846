// src/scheduler.rs
//! Background decay loop.
//!
//! Runs a decay pass on an interval. One failed cycle is logged and the
//! loop continues; an interrupted pass is simply redone from scratch on the
//! next tick, since every record update is individually consistent. The
//! interval and the enabled flag are re-read from the shared config each
//! cycle, so both are tunable without restarting the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::service::MemoryService;

/// Spawn the background decay task.
pub fn spawn_decay_scheduler(service: Arc<MemoryService>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match service.run_decay_pass(Utc::now()).await {
                Ok(report) => debug!(
                    "decay cycle done: {} scanned, {} archived, {} expired",
                    report.scanned, report.archived, report.expired
                ),
                Err(err) => warn!("decay cycle failed: {err}"),
            }

            let interval_secs = service.config_handle().read().await.decay_interval_secs;
            tokio::time::sleep(Duration::from_secs(interval_secs.max(1))).await;
        }
    })
}
