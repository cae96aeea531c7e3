//! Background notification application and collection.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::error::PublishedError;
use crate::published::service::{DefaultSnapshotService, PublishedSnapshotService};

use super::cancel::CancellationFlag;

const SOURCE: &str = "cache::collector";

/// Applies queued notifications and runs `collect` every `collect_interval_ms`.
///
/// The loop exits on the first tick after `cancel` is set. The work itself is
/// synchronous and runs on the blocking pool.
pub fn spawn_periodic_collect(
    service: Arc<DefaultSnapshotService>,
    cancel: CancellationFlag,
) -> JoinHandle<()> {
    let period = service.config().collect_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            if cancel.is_cancelled() {
                debug!(target_module = SOURCE, "Periodic collection stopped");
                break;
            }

            let service = Arc::clone(&service);
            let flag = cancel.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                service.process_notifications();
                service.collect(&flag)
            })
            .await;

            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(PublishedError::Cancelled { .. })) => {
                    debug!(target_module = SOURCE, "Periodic collection cancelled");
                    break;
                }
                Ok(Err(err)) => {
                    warn!(target_module = SOURCE, error = %err, "Periodic collection failed");
                }
                Err(err) => {
                    warn!(target_module = SOURCE, error = %err, "Collection task panicked");
                }
            }
        }
    })
}
