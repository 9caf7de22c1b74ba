//! Eviction Scheduler
//!
//! Background task that periodically asks the store to evict idle blobs.
//! A failed eviction is not retried here; the entry is simply picked up
//! again on the next tick.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::BlobStore;

/// Handle to the running eviction task
pub struct Sweeper {
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping `store` every `store.sweep_interval()`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<BlobStore>) -> Self {
        // tokio intervals panic on a zero period
        let interval = store.sweep_interval().max(Duration::from_millis(1));
        info!(interval = ?interval, "Starting eviction sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can be stale yet
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let store = Arc::clone(&store);
                let result =
                    tokio::task::spawn_blocking(move || store.sweep(SystemTime::now())).await;

                match result {
                    Ok(report) if report.total() == 0 => {
                        debug!("Sweep found no expired blobs");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Sweep task failed");
                    }
                }
            }
        });

        Self { task }
    }

    /// Whether the background task is still alive
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the background task
    pub fn stop(self) {
        self.task.abort();
        info!("Eviction sweeper stopped");
    }
}
