//! Per-controller worker machinery.
//!
//! Each registered controller gets one worker task running a strictly
//! serialized loop (wait-for-dirty, reconcile, wait) plus one pump task per
//! input selector feeding the dirty signal from the watch bus. Events
//! arriving while a run is in flight coalesce into at most one follow-up
//! run.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::controller::{Controller, ControllerContext};
use super::health::{ControllerState, HealthCondition, HealthWriter};
use crate::bus::{WatchBus, WatchItem, WatchSelector};
use crate::state::Store;
use crate::types::{BackoffConfig, Error, Result, SchedulerConfig};

/// Spawn the worker and pump tasks for one controller. Returned handles
/// are joined (or aborted) by the runtime on shutdown.
pub(crate) fn spawn_worker(
    controller: Arc<dyn Controller>,
    store: Arc<Store>,
    scheduler_config: SchedulerConfig,
    backoff_config: BackoffConfig,
    dirty: Arc<Notify>,
    shutdown: CancellationToken,
    health: HealthWriter,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for selector in controller.inputs() {
        handles.push(tokio::spawn(pump(
            store.bus().clone(),
            selector,
            dirty.clone(),
            shutdown.clone(),
        )));
    }

    handles.push(tokio::spawn(run_worker(
        controller,
        store,
        scheduler_config,
        backoff_config,
        dirty,
        shutdown,
        health,
    )));

    handles
}

/// Forward watch events for one selector into the dirty signal.
///
/// On resync (overflow) or a lost subscription the pump re-subscribes and
/// marks the controller dirty so it re-reads from a full list.
async fn pump(
    bus: Arc<WatchBus>,
    selector: WatchSelector,
    dirty: Arc<Notify>,
    shutdown: CancellationToken,
) {
    'resubscribe: loop {
        let mut watcher = loop {
            if shutdown.is_cancelled() {
                return;
            }
            match bus.subscribe(selector.clone(), None).await {
                Ok(watcher) => break watcher,
                Err(err) => {
                    tracing::warn!(error = %err, "watch subscription failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                    }
                }
            }
        };

        // Fresh subscription: reconcile once from the current state.
        dirty.notify_one();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    bus.unsubscribe(watcher.id()).await;
                    return;
                }
                item = watcher.recv() => match item {
                    WatchItem::Event(_) => dirty.notify_one(),
                    WatchItem::Resync => {
                        tracing::debug!(
                            namespace = %selector.namespace,
                            resource_type = %selector.resource_type,
                            "watch fell behind, resubscribing"
                        );
                        continue 'resubscribe;
                    }
                    WatchItem::Closed => return,
                }
            }
        }
    }
}

/// The serialized reconcile loop for one controller.
async fn run_worker(
    controller: Arc<dyn Controller>,
    store: Arc<Store>,
    scheduler_config: SchedulerConfig,
    backoff_config: BackoffConfig,
    dirty: Arc<Notify>,
    shutdown: CancellationToken,
    health: HealthWriter,
) {
    let name = controller.name();
    let ctx = ControllerContext::new(name.clone(), store, shutdown.clone());
    let mut backoff = Backoff::new(backoff_config);

    health
        .transition(ControllerState::Idle, HealthCondition::Ok, 0, None)
        .await;

    'outer: loop {
        tokio::select! {
            _ = shutdown.cancelled() => break 'outer,
            _ = dirty.notified() => {}
            _ = watchdog(scheduler_config.watchdog_interval) => {
                tracing::debug!(controller = %name, "watchdog reconciliation");
            }
        }

        // Run until the pass succeeds; failures back off and retry.
        loop {
            health
                .transition(
                    ControllerState::Running,
                    HealthCondition::Ok,
                    backoff.consecutive_failures(),
                    None,
                )
                .await;

            match run_reconcile(&*controller, &ctx, scheduler_config.reconcile_timeout).await {
                Ok(()) => {
                    backoff.reset();
                    health
                        .transition(ControllerState::Idle, HealthCondition::Ok, 0, None)
                        .await;
                    break;
                }
                Err(err) => {
                    let condition = match &err {
                        Error::ReconcilePanic(_) => HealthCondition::Panicked,
                        _ => HealthCondition::Failing,
                    };
                    let message = err.to_string();
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        controller = %name,
                        error = %message,
                        failures = backoff.consecutive_failures(),
                        backoff = ?delay,
                        "reconciliation failed"
                    );
                    health
                        .transition(
                            ControllerState::Backoff,
                            condition,
                            backoff.consecutive_failures(),
                            Some(message),
                        )
                        .await;

                    tokio::select! {
                        _ = shutdown.cancelled() => break 'outer,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    health
        .transition(ControllerState::Stopped, HealthCondition::Ok, 0, None)
        .await;
    tracing::debug!(controller = %name, "worker stopped");
}

/// One bounded reconciliation pass with panic isolation.
async fn run_reconcile(
    controller: &dyn Controller,
    ctx: &ControllerContext,
    timeout: Duration,
) -> Result<()> {
    let pass = AssertUnwindSafe(controller.reconcile(ctx)).catch_unwind();

    match tokio::time::timeout(timeout, pass).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => Err(Error::ReconcilePanic(panic_message(panic))),
        Err(_) => Err(Error::timeout(format!(
            "reconciliation exceeded {:?}",
            timeout
        ))),
    }
}

fn watchdog(interval: Option<Duration>) -> impl std::future::Future<Output = ()> {
    async move {
        match interval {
            Some(interval) => tokio::time::sleep(interval).await,
            None => std::future::pending().await,
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "reconciliation panicked".to_string()
    }
}
