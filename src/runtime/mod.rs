//! Runtime - explicit owner of the store, the watch bus and the
//! controller set.
//!
//! There is no ambient singleton: a `Runtime` is constructed once at
//! process start and handed to everything that needs it. Controllers are
//! registered before `start()`; the runtime then spawns one worker per
//! controller plus the teardown monitor, and `shutdown()` stops them with
//! a grace period.

pub mod backoff;
pub mod controller;
pub mod health;

mod scheduler;
mod teardown;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::WatchBus;
use crate::resource::{KindDefinition, ResourceKind, ResourceRegistry, Typed};
use crate::state::Store;
use crate::types::{Config, ControllerName, Error, Result, ResourceType};

pub use controller::{Controller, ControllerContext};
pub use health::{
    ControllerHealth, ControllerHealthSpec, ControllerHealthStatus, ControllerState,
    HealthCondition, RUNTIME_NAMESPACE, SCHEDULER_IDENTITY,
};

use health::HealthWriter;
use teardown::MonitorTarget;

struct RegisteredController {
    controller: Arc<dyn Controller>,
    dirty: Arc<Notify>,
    health: HealthWriter,
}

impl std::fmt::Debug for RegisteredController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredController")
            .field("name", &self.controller.name())
            .finish()
    }
}

/// The resource graph runtime: one store, one bus, one controller set.
#[derive(Debug)]
pub struct Runtime {
    config: Config,
    store: Arc<Store>,
    registry: std::sync::RwLock<ResourceRegistry>,
    controllers: Mutex<Vec<RegisteredController>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(WatchBus::new(config.watch.clone()));
        let store = Arc::new(Store::new(bus));

        let mut registry = ResourceRegistry::new();
        // The runtime's own health type is always known.
        if let Err(err) = registry.register::<ControllerHealth>() {
            tracing::error!(error = %err, "failed to register builtin health type");
        }

        Self {
            config,
            store,
            registry: std::sync::RwLock::new(registry),
            controllers: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// The shared store; transport layers read and write through this.
    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<WatchBus> {
        self.store.bus().clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Resource type registration
    // =========================================================================

    pub fn register_kind<K: ResourceKind>(&self) -> Result<()> {
        self.registry
            .write()
            .map_err(|_| Error::internal("resource registry poisoned"))?
            .register::<K>()
    }

    pub fn resolve_kind(&self, name: &ResourceType) -> Option<KindDefinition> {
        self.registry.read().ok()?.resolve(name).cloned()
    }

    // =========================================================================
    // Controller registration and lifecycle
    // =========================================================================

    /// Register a controller: claims its declared output types and creates
    /// its health resource. Must happen before `start()`.
    pub async fn register_controller(&self, controller: Arc<dyn Controller>) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(Error::validation(
                "controllers must be registered before the runtime starts".to_string(),
            ));
        }

        let name = controller.name();
        let mut controllers = self.controllers.lock().await;
        if controllers.iter().any(|c| c.controller.name() == name) {
            return Err(Error::already_exists(format!(
                "controller {} already registered",
                name
            )));
        }

        // Health resources are exclusively the scheduler's output.
        self.store
            .claim_output(
                ResourceType::from(ControllerHealth::TYPE),
                ControllerName::from(SCHEDULER_IDENTITY),
            )
            .await?;

        for output in controller.outputs() {
            self.store.claim_output(output, name.clone()).await?;
        }

        let health = HealthWriter::new(self.store.clone(), name.clone());
        health.register().await?;

        tracing::info!(
            controller = %name,
            inputs = controller.inputs().len(),
            outputs = controller.outputs().len(),
            "registered controller"
        );

        controllers.push(RegisteredController {
            controller,
            dirty: Arc::new(Notify::new()),
            health,
        });
        Ok(())
    }

    /// Spawn all controller workers and the teardown monitor.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::validation("runtime already started".to_string()));
        }

        let controllers = self.controllers.lock().await;
        let mut handles = self.handles.lock().await;
        let mut targets = Vec::with_capacity(controllers.len());

        for registered in controllers.iter() {
            handles.extend(scheduler::spawn_worker(
                registered.controller.clone(),
                self.store.clone(),
                self.config.scheduler.clone(),
                self.config.backoff.clone(),
                registered.dirty.clone(),
                self.shutdown.clone(),
                registered.health.clone(),
            ));
            targets.push(MonitorTarget {
                name: registered.controller.name(),
                dirty: registered.dirty.clone(),
                health: registered.health.clone(),
            });
        }

        handles.push(teardown::spawn_monitor(
            self.store.clone(),
            self.config.teardown.clone(),
            targets,
            self.shutdown.clone(),
        ));

        tracing::info!(controllers = controllers.len(), "runtime started");
        Ok(())
    }

    /// Mark a controller dirty by name. Returns false for unknown names.
    pub async fn poke(&self, name: &ControllerName) -> bool {
        let controllers = self.controllers.lock().await;
        match controllers.iter().find(|c| &c.controller.name() == name) {
            Some(registered) => {
                registered.dirty.notify_one();
                true
            }
            None => false,
        }
    }

    /// Convenience read of a controller's health status.
    pub async fn controller_health(
        &self,
        name: &ControllerName,
    ) -> Option<ControllerHealthStatus> {
        let resource = self.store.get(&ControllerHealth::id_for(name)).await?;
        Typed::<ControllerHealth>::from_resource(resource)
            .ok()?
            .status()
            .ok()?
    }

    /// Stop accepting triggers and wind workers down: in-flight runs get
    /// the configured grace period, then are cancelled.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let mut handles = self.handles.lock().await;
        let mut pending: Vec<JoinHandle<()>> = handles.drain(..).collect();
        drop(handles);

        let graceful = tokio::time::timeout(
            self.config.scheduler.shutdown_grace,
            futures::future::join_all(pending.iter_mut()),
        )
        .await;

        if graceful.is_err() {
            let stragglers = pending.iter().filter(|h| !h.is_finished()).count();
            tracing::warn!(stragglers, "grace period elapsed, cancelling workers");
            for handle in &pending {
                handle.abort();
            }
        }

        tracing::info!("runtime stopped");
    }
}
