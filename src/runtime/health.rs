//! Controller health surfaced as resources in the graph.
//!
//! The scheduler owns one `ControllerHealth` resource per registered
//! controller and updates its status on every state transition, so health
//! is observable through the same get/list/watch path as any other
//! resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::resource::{Resource, ResourceId, ResourceKind, Typed};
use crate::state::{Store, Writer};
use crate::types::{ControllerName, Error, Result};

/// Namespace holding the runtime's own resources.
pub const RUNTIME_NAMESPACE: &str = "runtime";

/// Writer identity the scheduler uses for its own resources.
pub const SCHEDULER_IDENTITY: &str = "runtime.scheduler";

/// Scheduler-facing state of a controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Registered,
    Idle,
    Running,
    Backoff,
    Stopped,
}

/// Aggregated health condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCondition {
    Ok,
    /// Last reconciliation returned an error or timed out.
    Failing,
    /// Last reconciliation panicked; isolated to this controller.
    Panicked,
    /// Holds a finalizer on a resource stuck in teardown.
    StuckTeardown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerHealthSpec {
    pub controller: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerHealthStatus {
    pub state: ControllerState,
    pub condition: HealthCondition,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_transition_at: DateTime<Utc>,
}

/// Resource kind for controller health.
#[derive(Debug)]
pub struct ControllerHealth;

impl ResourceKind for ControllerHealth {
    type Spec = ControllerHealthSpec;
    type Status = ControllerHealthStatus;
    const TYPE: &'static str = "ControllerHealth";
    const DEFAULT_NAMESPACE: &'static str = RUNTIME_NAMESPACE;
}

impl ControllerHealth {
    pub fn id_for(controller: &ControllerName) -> ResourceId {
        ResourceId::new(RUNTIME_NAMESPACE, Self::TYPE, controller.as_str())
    }
}

/// Writes health transitions for one controller under the scheduler
/// identity. Best-effort: a failed health write is logged, never fatal.
#[derive(Debug, Clone)]
pub(crate) struct HealthWriter {
    store: Arc<Store>,
    controller: ControllerName,
    writer: Writer,
}

impl HealthWriter {
    pub(crate) fn new(store: Arc<Store>, controller: ControllerName) -> Self {
        Self {
            store,
            controller,
            writer: Writer::controller(SCHEDULER_IDENTITY),
        }
    }

    /// Create the health resource at registration time.
    pub(crate) async fn register(&self) -> Result<()> {
        let typed = Typed::<ControllerHealth>::new(
            self.controller.as_str(),
            ControllerHealthSpec {
                controller: self.controller.to_string(),
            },
        )?;
        match self.store.create(typed.into_inner(), &self.writer).await {
            Ok(_) => {}
            Err(Error::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }
        self.transition(ControllerState::Registered, HealthCondition::Ok, 0, None)
            .await;
        Ok(())
    }

    /// Record a state transition in the health resource's status.
    pub(crate) async fn transition(
        &self,
        state: ControllerState,
        condition: HealthCondition,
        consecutive_failures: u32,
        last_error: Option<String>,
    ) {
        let status = ControllerHealthStatus {
            state,
            condition,
            consecutive_failures,
            last_error,
            last_transition_at: Utc::now(),
        };
        let id = ControllerHealth::id_for(&self.controller);

        // The scheduler is the only writer, so one conflict retry absorbs
        // races with the teardown monitor.
        for _ in 0..2 {
            let Some(current) = self.store.get(&id).await else {
                tracing::warn!(controller = %self.controller, "health resource missing");
                return;
            };
            let version = current.metadata.version;
            let status_value = match serde_json::to_value(&status) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(controller = %self.controller, error = %err, "health status serialization failed");
                    return;
                }
            };
            let result = self
                .store
                .update(&id, version, &self.writer, |resource: &mut Resource| {
                    resource.status = Some(status_value.clone());
                    Ok(())
                })
                .await;
            match result {
                Ok(_) => return,
                Err(Error::VersionConflict(_)) => continue,
                Err(err) => {
                    tracing::warn!(controller = %self.controller, error = %err, "health update failed");
                    return;
                }
            }
        }
        tracing::warn!(controller = %self.controller, "health update kept conflicting, giving up");
    }

    /// Overwrite only the condition, preserving state and failure counts.
    /// Used by the teardown monitor; no-op until the worker reported once.
    pub(crate) async fn mark_condition(&self, condition: HealthCondition, note: impl Into<String>) {
        let id = ControllerHealth::id_for(&self.controller);
        let Some(current) = self.store.get(&id).await else {
            return;
        };
        let typed = match Typed::<ControllerHealth>::from_resource(current) {
            Ok(typed) => typed,
            Err(_) => return,
        };
        let Ok(Some(status)) = typed.status() else {
            return;
        };
        if status.condition == condition {
            return;
        }
        self.transition(
            status.state,
            condition,
            status.consecutive_failures,
            Some(note.into()),
        )
        .await;
    }
}
