//! In-memory resource store.
//!
//! The store is the single shared mutable state of the runtime: a
//! concurrency-safe graph keyed by (namespace, type, name) with optimistic
//! version checks, ownership enforcement and change notification. Every
//! successful mutation publishes exactly one ordered event on the watch bus
//! before the per-resource lock is released, so an observer of the event
//! never reads a stale value afterwards.
//!
//! Locking is two-level: a map lock to find or place entries, and one lock
//! per resource for mutation. Writers to different resources only contend
//! on the brief map access and the bus append.

pub mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::bus::{EventKind, WatchBus};
use crate::resource::{Phase, Resource, ResourceId};
use crate::types::{
    ControllerName, Error, FinalizerToken, Namespace, Result, ResourceType,
};

/// Identity presented by a mutating caller.
///
/// Controllers write under their registered name; transport-facing callers
/// (API/CLI) write anonymously, leaving created resources unowned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writer {
    Anonymous,
    Controller(ControllerName),
}

impl Writer {
    pub fn controller(name: impl Into<ControllerName>) -> Self {
        Self::Controller(name.into())
    }

    fn name(&self) -> Option<&ControllerName> {
        match self {
            Writer::Anonymous => None,
            Writer::Controller(name) => Some(name),
        }
    }
}

impl std::fmt::Display for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Writer::Anonymous => write!(f, "<anonymous>"),
            Writer::Controller(name) => write!(f, "{}", name),
        }
    }
}

/// Filters and pagination for [`Store::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Keep only resources whose name starts with this prefix.
    pub name_prefix: Option<String>,

    /// Keep only resources carrying all of these labels.
    pub labels: BTreeMap<String, String>,

    /// Page size; unlimited when `None`.
    pub limit: Option<usize>,

    /// Resume after this name (taken from a previous page's token).
    pub continue_token: Option<String>,
}

/// One page of list results, ordered by name.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<Resource>,
    /// Present when more items remain; feed back via `continue_token`.
    pub continue_token: Option<String>,
}

/// Mutation counters.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoreStats {
    pub creates: u64,
    pub updates: u64,
    pub teardowns: u64,
    pub destroys: u64,
    pub finalizer_changes: u64,
    pub version_conflicts: u64,
    pub forbidden_writes: u64,
}

type Entry = Arc<Mutex<Resource>>;

/// In-memory, concurrency-safe resource graph.
#[derive(Debug)]
pub struct Store {
    entries: RwLock<HashMap<ResourceId, Entry>>,

    /// Exclusive spec writers per type, configured by the scheduler.
    claimed_outputs: RwLock<HashMap<ResourceType, ControllerName>>,

    /// Designated status writers per type; falls back to the owner.
    status_writers: RwLock<HashMap<ResourceType, ControllerName>>,

    stats: RwLock<StoreStats>,
    bus: Arc<WatchBus>,
}

impl Store {
    pub fn new(bus: Arc<WatchBus>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            claimed_outputs: RwLock::new(HashMap::new()),
            status_writers: RwLock::new(HashMap::new()),
            stats: RwLock::new(StoreStats::default()),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<WatchBus> {
        &self.bus
    }

    // =========================================================================
    // Ownership configuration (scheduler registration path)
    // =========================================================================

    /// Claim a type as the exclusive output of a controller.
    pub async fn claim_output(
        &self,
        resource_type: ResourceType,
        controller: ControllerName,
    ) -> Result<()> {
        let mut claims = self.claimed_outputs.write().await;
        if let Some(current) = claims.get(&resource_type) {
            if current != &controller {
                return Err(Error::already_exists(format!(
                    "type {} already claimed by controller {}",
                    resource_type, current
                )));
            }
            return Ok(());
        }
        claims.insert(resource_type, controller);
        Ok(())
    }

    /// Designate a status writer for a type distinct from its owner.
    pub async fn set_status_writer(
        &self,
        resource_type: ResourceType,
        controller: ControllerName,
    ) {
        self.status_writers
            .write()
            .await
            .insert(resource_type, controller);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Point lookup. Absence is not an error; the result is an independent
    /// copy the caller may mutate freely.
    pub async fn get(&self, id: &ResourceId) -> Option<Resource> {
        let entry = self.entries.read().await.get(id).cloned()?;
        let resource = entry.lock().await;
        Some(resource.clone())
    }

    /// List resources of one type in one namespace, ordered by name.
    pub async fn list(
        &self,
        namespace: &Namespace,
        resource_type: &ResourceType,
        options: &ListOptions,
    ) -> ListPage {
        let mut candidates: Vec<(ResourceId, Entry)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(id, _)| {
                    &id.namespace == namespace && &id.resource_type == resource_type
                })
                .filter(|(id, _)| match &options.name_prefix {
                    Some(prefix) => id.name.as_str().starts_with(prefix.as_str()),
                    None => true,
                })
                .filter(|(id, _)| match &options.continue_token {
                    Some(token) => id.name.as_str() > token.as_str(),
                    None => true,
                })
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        };
        candidates.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));

        let mut items = Vec::new();
        for (_, entry) in candidates {
            let resource = entry.lock().await.clone();
            let labels_match = options
                .labels
                .iter()
                .all(|(k, v)| resource.metadata.labels.get(k) == Some(v));
            if !labels_match {
                continue;
            }
            items.push(resource);
            if let Some(limit) = options.limit {
                // Fetch one past the limit to know whether a next page exists.
                if items.len() > limit {
                    break;
                }
            }
        }

        match options.limit {
            Some(limit) if items.len() > limit => {
                items.truncate(limit);
                let token = items
                    .last()
                    .map(|r| r.metadata.id.name.as_str().to_string());
                ListPage {
                    items,
                    continue_token: token,
                }
            }
            _ => ListPage {
                items,
                continue_token: None,
            },
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a resource. The writer becomes the owner (controllers only);
    /// fails with `AlreadyExists` while a same-address resource lives or is
    /// still tearing down.
    pub async fn create(&self, mut resource: Resource, writer: &Writer) -> Result<Resource> {
        self.authorize_spec_write(&resource.metadata.id.resource_type, None, writer)
            .await?;

        let mut entries = self.entries.write().await;
        if entries.contains_key(&resource.metadata.id) {
            return Err(Error::already_exists(resource.metadata.id.to_string()));
        }

        let now = chrono::Utc::now();
        resource.metadata.version = 1;
        resource.metadata.phase = Phase::Running;
        resource.metadata.owner = writer.name().cloned();
        resource.metadata.finalizers.clear();
        resource.metadata.created_at = now;
        resource.metadata.updated_at = now;

        entries.insert(
            resource.metadata.id.clone(),
            Arc::new(Mutex::new(resource.clone())),
        );

        // Published before the map lock is released so no later mutation of
        // this resource can order its event ahead of the create.
        self.bus
            .publish(EventKind::Created, resource.clone())
            .await;
        self.stats.write().await.creates += 1;

        tracing::debug!(resource = %resource.metadata.id, "created resource");
        Ok(resource)
    }

    /// Mutate a resource through a closure over an independent copy.
    ///
    /// The closure may change spec, status and labels; identity, version,
    /// phase, owner and finalizers are restored from the canonical copy
    /// before the version bump. Ownership and phase rules are enforced
    /// against what actually changed.
    pub async fn update<F>(
        &self,
        id: &ResourceId,
        expected_version: u64,
        writer: &Writer,
        mutate: F,
    ) -> Result<Resource>
    where
        F: FnOnce(&mut Resource) -> Result<()>,
    {
        let entry = self
            .entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))?;

        let mut current = entry.lock().await;

        if current.metadata.version != expected_version {
            self.stats.write().await.version_conflicts += 1;
            return Err(Error::version_conflict(format!(
                "{}: expected version {}, current {}",
                id, expected_version, current.metadata.version
            )));
        }

        let mut updated = current.clone();
        mutate(&mut updated)?;

        // The closure cannot rewrite identity or lifecycle bookkeeping.
        updated.metadata.id = current.metadata.id.clone();
        updated.metadata.version = current.metadata.version;
        updated.metadata.phase = current.metadata.phase;
        updated.metadata.owner = current.metadata.owner.clone();
        updated.metadata.finalizers = current.metadata.finalizers.clone();
        updated.metadata.created_at = current.metadata.created_at;
        updated.metadata.updated_at = current.metadata.updated_at;

        let spec_changed = updated.spec != current.spec;
        let status_changed = updated.status != current.status;

        if spec_changed {
            if !current.metadata.phase.accepts_spec_updates() {
                return Err(Error::phase_conflict(format!(
                    "{} is tearing down and no longer accepts spec updates",
                    id
                )));
            }
            if let Err(err) = self
                .authorize_spec_write(
                    &id.resource_type,
                    current.metadata.owner.as_ref(),
                    writer,
                )
                .await
            {
                self.stats.write().await.forbidden_writes += 1;
                return Err(err);
            }
        }

        if status_changed {
            if let Err(err) = self
                .authorize_status_write(
                    &id.resource_type,
                    current.metadata.owner.as_ref(),
                    writer,
                )
                .await
            {
                self.stats.write().await.forbidden_writes += 1;
                return Err(err);
            }
        }

        updated.metadata.bump();
        *current = updated.clone();

        self.bus.publish(EventKind::Updated, updated.clone()).await;
        self.stats.write().await.updates += 1;

        tracing::debug!(
            resource = %id,
            version = updated.metadata.version,
            spec_changed,
            status_changed,
            "updated resource"
        );
        Ok(updated)
    }

    /// Begin teardown: sets phase to TearingDown. Idempotent. If no
    /// finalizers are held the resource is physically removed right away.
    pub async fn mark_for_destroy(&self, id: &ResourceId, writer: &Writer) -> Result<Resource> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))?;

        let mut current = entry.lock().await;

        if current.metadata.is_tearing_down() {
            return Ok(current.clone());
        }

        if let Err(err) = self
            .authorize_spec_write(&id.resource_type, current.metadata.owner.as_ref(), writer)
            .await
        {
            self.stats.write().await.forbidden_writes += 1;
            return Err(err);
        }

        current.metadata.phase = Phase::TearingDown;
        current.metadata.bump();

        self.bus
            .publish(EventKind::Updated, current.clone())
            .await;
        self.stats.write().await.teardowns += 1;
        tracing::debug!(resource = %id, "marked resource for destroy");

        if current.metadata.finalizers.is_empty() {
            let removed = current.clone();
            drop(current);
            entries.remove(id);
            self.bus
                .publish(EventKind::Destroyed, removed.clone())
                .await;
            self.stats.write().await.destroys += 1;
            tracing::debug!(resource = %id, "destroyed resource (no finalizers)");
            return Ok(removed);
        }

        Ok(current.clone())
    }

    /// Attach a finalizer token. Idempotent; a no-op does not bump the
    /// version or publish an event. A tearing-down resource accepts only
    /// finalizer removals, so a new token fails with `PhaseConflict`.
    pub async fn add_finalizer(&self, id: &ResourceId, token: FinalizerToken) -> Result<Resource> {
        let entry = self
            .entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))?;

        let mut current = entry.lock().await;
        if current.metadata.finalizers.contains(&token) {
            return Ok(current.clone());
        }
        if current.metadata.is_tearing_down() {
            return Err(Error::phase_conflict(format!(
                "{} is tearing down and no longer accepts new finalizers",
                id
            )));
        }
        current.metadata.add_finalizer(token);
        current.metadata.bump();

        self.bus
            .publish(EventKind::Updated, current.clone())
            .await;
        self.stats.write().await.finalizer_changes += 1;
        Ok(current.clone())
    }

    /// Detach a finalizer token. Removing the last one while tearing down
    /// physically destroys the resource and emits the final Destroy event.
    pub async fn remove_finalizer(
        &self,
        id: &ResourceId,
        token: &FinalizerToken,
    ) -> Result<Resource> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))?;

        let mut current = entry.lock().await;
        if !current.metadata.remove_finalizer(token) {
            return Ok(current.clone());
        }
        current.metadata.bump();
        self.stats.write().await.finalizer_changes += 1;

        if current.metadata.can_destroy() {
            let removed = current.clone();
            drop(current);
            entries.remove(id);
            // Watchers already observed the TearingDown phase; the removal
            // itself is the one event for this mutation.
            self.bus
                .publish(EventKind::Destroyed, removed.clone())
                .await;
            self.stats.write().await.destroys += 1;
            tracing::debug!(resource = %id, "destroyed resource (last finalizer removed)");
            return Ok(removed);
        }

        self.bus
            .publish(EventKind::Updated, current.clone())
            .await;
        Ok(current.clone())
    }

    /// Explicit physical destroy. Fails with `PhaseConflict` unless the
    /// resource is tearing down with no finalizers left.
    pub async fn destroy(
        &self,
        id: &ResourceId,
        expected_version: u64,
        writer: &Writer,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))?;

        let current = entry.lock().await;

        if current.metadata.version != expected_version {
            self.stats.write().await.version_conflicts += 1;
            return Err(Error::version_conflict(format!(
                "{}: expected version {}, current {}",
                id, expected_version, current.metadata.version
            )));
        }

        if !current.metadata.is_tearing_down() {
            return Err(Error::phase_conflict(format!(
                "{} is not marked for destroy",
                id
            )));
        }
        if !current.metadata.finalizers.is_empty() {
            return Err(Error::phase_conflict(format!(
                "{} still holds finalizers: {:?}",
                id,
                current
                    .metadata
                    .finalizers
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
            )));
        }

        if let Err(err) = self
            .authorize_spec_write(&id.resource_type, current.metadata.owner.as_ref(), writer)
            .await
        {
            self.stats.write().await.forbidden_writes += 1;
            return Err(err);
        }

        let removed = current.clone();
        drop(current);
        entries.remove(id);

        self.bus.publish(EventKind::Destroyed, removed).await;
        self.stats.write().await.destroys += 1;
        tracing::debug!(resource = %id, "destroyed resource");
        Ok(())
    }

    /// Resources that have been tearing down for longer than `age` while
    /// still holding finalizers. Diagnostic surface for stuck teardowns.
    pub async fn tearing_down_older_than(&self, age: chrono::Duration) -> Vec<Resource> {
        let cutoff = chrono::Utc::now() - age;
        let entries: Vec<Entry> = self.entries.read().await.values().cloned().collect();

        let mut stuck = Vec::new();
        for entry in entries {
            let resource = entry.lock().await;
            if resource.metadata.is_tearing_down()
                && !resource.metadata.finalizers.is_empty()
                && resource.metadata.updated_at < cutoff
            {
                stuck.push(resource.clone());
            }
        }
        stuck.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        stuck
    }

    /// Get current mutation counters.
    pub async fn stats(&self) -> StoreStats {
        self.stats.read().await.clone()
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Spec-side write rules: a claimed output type admits only its
    /// claiming controller; an owned resource admits only its owner.
    async fn authorize_spec_write(
        &self,
        resource_type: &ResourceType,
        owner: Option<&ControllerName>,
        writer: &Writer,
    ) -> Result<()> {
        if let Some(claimant) = self.claimed_outputs.read().await.get(resource_type) {
            if writer.name() != Some(claimant) {
                return Err(Error::forbidden(format!(
                    "type {} is exclusively owned by controller {}, writer is {}",
                    resource_type, claimant, writer
                )));
            }
        }

        if let Some(owner) = owner {
            if writer.name() != Some(owner) {
                return Err(Error::forbidden(format!(
                    "resource is owned by {}, writer is {}",
                    owner, writer
                )));
            }
        }

        Ok(())
    }

    /// Status-side write rules: the designated status writer for the type
    /// wins; otherwise the owner; unowned resources are open.
    async fn authorize_status_write(
        &self,
        resource_type: &ResourceType,
        owner: Option<&ControllerName>,
        writer: &Writer,
    ) -> Result<()> {
        if let Some(designated) = self.status_writers.read().await.get(resource_type) {
            if writer.name() != Some(designated) {
                return Err(Error::forbidden(format!(
                    "status of type {} is written by {}, writer is {}",
                    resource_type, designated, writer
                )));
            }
            return Ok(());
        }

        if let Some(owner) = owner {
            if writer.name() != Some(owner) {
                return Err(Error::forbidden(format!(
                    "status is written by owner {}, writer is {}",
                    owner, writer
                )));
            }
        }

        Ok(())
    }
}
