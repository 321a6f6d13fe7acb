//! Stuck-teardown monitor.
//!
//! Teardown itself is just the store invariant (no destroy while
//! finalizers are held) observed through the normal watch path. This
//! monitor adds the liveness half: it periodically scans for resources
//! that have been tearing down past a threshold, logs the held finalizer
//! tokens, kicks the matching controllers dirty and flags their health
//! condition so the stall is diagnosable.

use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::health::{HealthCondition, HealthWriter};
use crate::state::Store;
use crate::types::{ControllerName, TeardownConfig};

/// A controller the monitor can kick and flag.
#[derive(Debug, Clone)]
pub(crate) struct MonitorTarget {
    pub name: ControllerName,
    pub dirty: Arc<Notify>,
    pub health: HealthWriter,
}

pub(crate) fn spawn_monitor(
    store: Arc<Store>,
    config: TeardownConfig,
    targets: Vec<MonitorTarget>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let threshold = match chrono::Duration::from_std(config.stuck_threshold) {
            Ok(threshold) => threshold,
            Err(_) => {
                tracing::warn!("stuck-teardown threshold out of range, monitor disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(config.scan_interval) => {}
            }

            let stuck = store.tearing_down_older_than(threshold).await;
            for resource in stuck {
                let finalizers: Vec<&str> = resource
                    .metadata
                    .finalizers
                    .iter()
                    .map(|f| f.as_str())
                    .collect();
                tracing::warn!(
                    resource = %resource.metadata.id,
                    ?finalizers,
                    age = ?(chrono::Utc::now() - resource.metadata.updated_at),
                    "resource stuck in teardown"
                );

                // Finalizer tokens name their holding controllers by
                // convention; kick and flag the ones we schedule.
                for target in &targets {
                    let holds_finalizer = resource
                        .metadata
                        .finalizers
                        .iter()
                        .any(|token| token.as_str() == target.name.as_str());
                    if !holds_finalizer {
                        continue;
                    }
                    target.dirty.notify_one();
                    target
                        .health
                        .mark_condition(
                            HealthCondition::StuckTeardown,
                            format!("holds finalizer on {}", resource.metadata.id),
                        )
                        .await;
                }
            }
        }
    })
}
