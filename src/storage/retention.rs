//! Retention job
//!
//! Periodically drops partitions that fell out of the configured retention
//! window. The policy itself lives in the store, so changes made through the
//! configuration endpoint apply on the next tick.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use crate::storage::engine::Store;

/// Start the background retention task.
///
/// Runs until `shutdown` flips to true or its sender is dropped.
pub fn start_retention_task(
    store: &Arc<Store>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let store = Arc::clone(store);

    tokio::spawn(async move {
        let mut ticker = interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match store.apply_retention(Utc::now()) {
                Ok(report) if report.partitions_dropped > 0 => {
                    tracing::info!(
                        partitions = report.partitions_dropped,
                        samples = report.samples_deleted,
                        "Retention dropped partitions"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Retention pass failed: {}", e),
            }
        }

        tracing::debug!("Retention task stopped");
    })
}
