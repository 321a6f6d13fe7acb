//! Controller trait and the store view handed to reconciliations.
//!
//! A controller declares the inputs it watches and the output types it
//! exclusively owns, then converges observed state toward desired state in
//! `reconcile`. All cross-controller coordination happens through the
//! store; controllers never call each other.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::bus::WatchSelector;
use crate::resource::{Resource, ResourceId};
use crate::state::{ListOptions, ListPage, Store, Writer};
use crate::types::{ControllerName, FinalizerToken, Namespace, Result, ResourceType};

/// A unit of reconciliation logic.
///
/// Reconciliations must be idempotent: a run may be cut short by a timeout
/// or shutdown after some writes committed, and the next run must converge
/// from whatever state was left behind.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Unique controller name; doubles as its writer identity and the
    /// conventional finalizer token.
    fn name(&self) -> ControllerName;

    /// Input selectors; any matching event schedules a reconciliation.
    fn inputs(&self) -> Vec<WatchSelector>;

    /// Output types this controller exclusively owns.
    fn outputs(&self) -> Vec<ResourceType>;

    /// One reconciliation pass: read inputs, write derived outputs.
    async fn reconcile(&self, ctx: &ControllerContext) -> Result<()>;
}

/// Store view bound to a controller identity.
///
/// Writes go through the store under the controller's name, so ownership
/// and exclusive-output rules apply exactly as declared at registration.
#[derive(Debug, Clone)]
pub struct ControllerContext {
    name: ControllerName,
    writer: Writer,
    store: Arc<Store>,
    shutdown: CancellationToken,
}

impl ControllerContext {
    pub(crate) fn new(name: ControllerName, store: Arc<Store>, shutdown: CancellationToken) -> Self {
        Self {
            writer: Writer::Controller(name.clone()),
            name,
            store,
            shutdown,
        }
    }

    pub fn name(&self) -> &ControllerName {
        &self.name
    }

    /// This controller's conventional finalizer token.
    pub fn finalizer(&self) -> FinalizerToken {
        FinalizerToken::from(self.name.as_str())
    }

    /// True once runtime shutdown started; long-running reconciliations
    /// should check this between steps.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn get(&self, id: &ResourceId) -> Option<Resource> {
        self.store.get(id).await
    }

    pub async fn list(
        &self,
        namespace: &Namespace,
        resource_type: &ResourceType,
        options: &ListOptions,
    ) -> ListPage {
        self.store.list(namespace, resource_type, options).await
    }

    pub async fn create(&self, resource: Resource) -> Result<Resource> {
        self.store.create(resource, &self.writer).await
    }

    pub async fn update<F>(
        &self,
        id: &ResourceId,
        expected_version: u64,
        mutate: F,
    ) -> Result<Resource>
    where
        F: FnOnce(&mut Resource) -> Result<()>,
    {
        self.store
            .update(id, expected_version, &self.writer, mutate)
            .await
    }

    pub async fn mark_for_destroy(&self, id: &ResourceId) -> Result<Resource> {
        self.store.mark_for_destroy(id, &self.writer).await
    }

    pub async fn add_finalizer(&self, id: &ResourceId) -> Result<Resource> {
        self.store.add_finalizer(id, self.finalizer()).await
    }

    pub async fn remove_finalizer(&self, id: &ResourceId) -> Result<Resource> {
        self.store.remove_finalizer(id, &self.finalizer()).await
    }

    pub async fn destroy(&self, id: &ResourceId, expected_version: u64) -> Result<()> {
        self.store.destroy(id, expected_version, &self.writer).await
    }
}
