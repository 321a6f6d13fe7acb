//! Resource addressing, metadata and the type-erased resource container.
//!
//! Every resource in the graph is a `Resource`: metadata plus opaque,
//! schema-typed spec/status payloads. Typed access lives in
//! [`crate::resource::typed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::{ControllerName, FinalizerToken, Namespace, ResourceName, ResourceType};

/// Version assigned before a resource is persisted; the store assigns 1 on create.
pub const VERSION_UNDEFINED: u64 = 0;

/// Fully-qualified resource address: (namespace, type, name).
///
/// Immutable for the resource's lifetime; unique across the store at any
/// instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub namespace: Namespace,
    pub resource_type: ResourceType,
    pub name: ResourceName,
}

impl ResourceId {
    pub fn new(
        namespace: impl Into<Namespace>,
        resource_type: impl Into<ResourceType>,
        name: impl Into<ResourceName>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.resource_type, self.name
        )
    }
}

/// Resource lifecycle phase.
///
/// ```text
/// Running → TearingDown → (physically removed once finalizers empty)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Running,
    TearingDown,
}

impl Phase {
    /// Spec mutations are only accepted while running.
    pub fn accepts_spec_updates(self) -> bool {
        self == Phase::Running
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Running => write!(f, "running"),
            Phase::TearingDown => write!(f, "tearing_down"),
        }
    }
}

/// Metadata shared by every resource in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: ResourceId,

    /// Strictly increases on every successful mutation.
    pub version: u64,

    pub phase: Phase,

    /// Controller identity that created the resource; immutable once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<ControllerName>,

    /// Tokens blocking physical destruction.
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub finalizers: BTreeSet<FinalizerToken>,

    /// Free-form labels for scoped listing.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Metadata {
    pub fn new(id: ResourceId) -> Self {
        let now = Utc::now();
        Self {
            id,
            version: VERSION_UNDEFINED,
            phase: Phase::Running,
            owner: None,
            finalizers: BTreeSet::new(),
            labels: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump version and refresh the updated timestamp.
    pub(crate) fn bump(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    pub fn is_tearing_down(&self) -> bool {
        self.phase == Phase::TearingDown
    }

    /// Physical removal is allowed only once teardown completed.
    pub fn can_destroy(&self) -> bool {
        self.is_tearing_down() && self.finalizers.is_empty()
    }

    /// Add a finalizer token. Returns false if it was already present.
    pub fn add_finalizer(&mut self, token: FinalizerToken) -> bool {
        self.finalizers.insert(token)
    }

    /// Remove a finalizer token. Returns false if it was not present.
    pub fn remove_finalizer(&mut self, token: &FinalizerToken) -> bool {
        self.finalizers.remove(token)
    }
}

/// Type-erased resource: metadata plus opaque spec/status payloads.
///
/// Payloads are schema-typed by the owning controller; the runtime only
/// enforces the metadata invariants. Status may be absent until the first
/// observation lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub metadata: Metadata,
    pub spec: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl Resource {
    pub fn new(id: ResourceId, spec: serde_json::Value) -> Self {
        Self {
            metadata: Metadata::new(id),
            spec,
            status: None,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.metadata.id
    }

    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    /// Attach a label, builder style.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }
}
