//! Snapshot persistence hook.
//!
//! Serializes the full store (metadata including version, phase and
//! finalizers, plus the opaque payloads) so state can be reconstructed
//! after a restart. Restore only targets an empty store; events are not
//! replayed for restored resources, but the bookmark floor is advanced so
//! new events never reuse pre-snapshot bookmarks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::Store;
use crate::bus::Bookmark;
use crate::resource::Resource;
use crate::types::{Error, Result};

/// On-disk snapshot format version.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// A point-in-time copy of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: u32,
    pub taken_at: DateTime<Utc>,
    /// Watch sequence floor at snapshot time.
    pub bookmark: Bookmark,
    pub resources: Vec<Resource>,
}

impl Snapshot {
    pub fn write_to(&self, writer: impl Write) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn read_from(reader: impl Read) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(Error::validation(format!(
                "unsupported snapshot format {} (expected {})",
                snapshot.format, SNAPSHOT_FORMAT
            )));
        }
        Ok(snapshot)
    }
}

impl Store {
    /// Capture a consistent snapshot of every resource.
    pub async fn snapshot(&self) -> Snapshot {
        // Taking the map write lock excludes concurrent mutations, so the
        // captured set and the bookmark agree.
        let entries = self.entries.write().await;
        let mut resources = Vec::with_capacity(entries.len());
        for entry in entries.values() {
            resources.push(entry.lock().await.clone());
        }
        resources.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));

        Snapshot {
            format: SNAPSHOT_FORMAT,
            taken_at: Utc::now(),
            bookmark: self.bus().last_bookmark().await,
            resources,
        }
    }

    /// Rebuild store contents from a snapshot. Fails unless the store is
    /// empty; versions, phases and finalizers are preserved verbatim.
    pub async fn restore(&self, snapshot: Snapshot) -> Result<()> {
        let mut entries = self.entries.write().await;
        if !entries.is_empty() {
            return Err(Error::validation(
                "restore requires an empty store".to_string(),
            ));
        }

        let count = snapshot.resources.len();
        for resource in snapshot.resources {
            entries.insert(
                resource.metadata.id.clone(),
                Arc::new(Mutex::new(resource)),
            );
        }
        drop(entries);

        self.bus().advance_to(snapshot.bookmark).await;
        tracing::info!(resources = count, bookmark = snapshot.bookmark, "restored store from snapshot");
        Ok(())
    }
}
