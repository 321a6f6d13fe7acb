//! Watch/notification bus.
//!
//! Fan-out of resource change events to subscribers with per-id ordering,
//! bookmark replay from a bounded retention buffer, and bounded
//! per-subscriber queues. A slow subscriber is disconnected and told to
//! resync; it never blocks the store or its peers.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::resource::Resource;
use crate::types::{Error, Namespace, Result, ResourceName, ResourceType, SubscriberId, WatchConfig};

/// Resumable cursor into the event stream. Monotone per store.
pub type Bookmark = u64;

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Destroyed,
}

/// A single change notification: kind, resource snapshot, bookmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub resource: Resource,
    pub bookmark: Bookmark,
}

/// What a subscriber wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSelector {
    pub namespace: Namespace,
    pub resource_type: ResourceType,
    /// Narrow to a single resource when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<ResourceName>,
}

impl WatchSelector {
    pub fn kind(namespace: impl Into<Namespace>, resource_type: impl Into<ResourceType>) -> Self {
        Self {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<ResourceName>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn matches(&self, resource: &Resource) -> bool {
        let id = resource.id();
        if id.namespace != self.namespace || id.resource_type != self.resource_type {
            return false;
        }
        match &self.name {
            Some(name) => &id.name == name,
            None => true,
        }
    }
}

/// Item delivered to a watcher.
#[derive(Debug, Clone)]
pub enum WatchItem {
    /// An ordered change notification.
    Event(Event),
    /// The subscriber fell behind and was disconnected; it must perform a
    /// full list-then-watch resync.
    Resync,
    /// The subscription ended (unsubscribe or bus shutdown).
    Closed,
}

/// Statistics about bus usage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub events_published: u64,
    pub active_subscribers: usize,
    pub replayed_events: u64,
    pub overflows: u64,
    pub stale_bookmark_rejections: u64,
}

struct SubscriberEntry {
    id: SubscriberId,
    selector: WatchSelector,
    tx: mpsc::Sender<Event>,
    overflowed: Arc<AtomicBool>,
}

impl std::fmt::Debug for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("id", &self.id)
            .field("selector", &self.selector)
            .finish()
    }
}

#[derive(Debug)]
struct BusInner {
    /// Last assigned bookmark; 0 means no event published yet.
    last_bookmark: Bookmark,
    /// Bounded replay buffer, oldest first.
    retention: VecDeque<Event>,
    subscribers: Vec<SubscriberEntry>,
    stats: BusStats,
}

/// In-memory watch bus with bounded retention and per-subscriber queues.
#[derive(Debug)]
pub struct WatchBus {
    inner: RwLock<BusInner>,
    config: WatchConfig,
}

impl WatchBus {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            inner: RwLock::new(BusInner {
                last_bookmark: 0,
                retention: VecDeque::with_capacity(config.retention_events),
                subscribers: Vec::new(),
                stats: BusStats::default(),
            }),
            config,
        }
    }

    /// Publish one event; assigns the next bookmark and fans out.
    ///
    /// Called from the store's mutation path; never blocks on subscribers.
    pub async fn publish(&self, kind: EventKind, resource: Resource) -> Bookmark {
        let mut inner = self.inner.write().await;

        inner.last_bookmark += 1;
        let event = Event {
            kind,
            resource,
            bookmark: inner.last_bookmark,
        };

        if inner.retention.len() == self.config.retention_events {
            inner.retention.pop_front();
        }
        inner.retention.push_back(event.clone());
        inner.stats.events_published += 1;

        let mut dropped: Vec<SubscriberId> = Vec::new();
        let mut overflows = 0u64;
        for entry in &inner.subscribers {
            if !entry.selector.matches(&event.resource) {
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.overflowed.store(true, Ordering::Release);
                    dropped.push(entry.id.clone());
                    overflows += 1;
                    tracing::warn!(
                        subscriber = %entry.id,
                        bookmark = event.bookmark,
                        "watch subscriber overflowed, disconnecting"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(entry.id.clone());
                }
            }
        }

        if !dropped.is_empty() {
            inner.stats.overflows += overflows;
            inner.subscribers.retain(|s| !dropped.contains(&s.id));
            inner.stats.active_subscribers = inner.subscribers.len();
        }

        tracing::debug!(
            bookmark = event.bookmark,
            kind = ?event.kind,
            resource = %event.resource.id(),
            "published event"
        );

        event.bookmark
    }

    /// Subscribe to changes matching the selector.
    ///
    /// With `since`, events after that bookmark are replayed from the
    /// retention buffer; an aged-out bookmark fails with `StaleBookmark`
    /// and the caller must list-then-watch from scratch.
    pub async fn subscribe(
        &self,
        selector: WatchSelector,
        since: Option<Bookmark>,
    ) -> Result<Watcher> {
        let mut inner = self.inner.write().await;

        let mut replay = VecDeque::new();
        if let Some(since) = since {
            if since > inner.last_bookmark {
                return Err(Error::validation(format!(
                    "bookmark {} is ahead of the stream (last {})",
                    since, inner.last_bookmark
                )));
            }

            // Everything after `since` must still be retained. The oldest
            // retained event tells us how far back replay can reach.
            let oldest_retained = inner.retention.front().map(|e| e.bookmark);
            let fully_retained = match oldest_retained {
                Some(oldest) => since >= oldest - 1,
                // Empty retention: fine only if nothing happened after `since`.
                None => since == inner.last_bookmark,
            };
            if !fully_retained {
                inner.stats.stale_bookmark_rejections += 1;
                return Err(Error::stale_bookmark(format!(
                    "bookmark {} aged out of retention; full resync required",
                    since
                )));
            }

            for event in &inner.retention {
                if event.bookmark > since && selector.matches(&event.resource) {
                    replay.push_back(event.clone());
                }
            }
            inner.stats.replayed_events += replay.len() as u64;
        }

        let (tx, rx) = mpsc::channel(self.config.subscriber_queue);
        let id = SubscriberId::new();
        let overflowed = Arc::new(AtomicBool::new(false));

        inner.subscribers.push(SubscriberEntry {
            id: id.clone(),
            selector: selector.clone(),
            tx,
            overflowed: overflowed.clone(),
        });
        inner.stats.active_subscribers = inner.subscribers.len();

        tracing::debug!(
            subscriber = %id,
            namespace = %selector.namespace,
            resource_type = %selector.resource_type,
            replayed = replay.len(),
            "watch subscription registered"
        );

        Ok(Watcher {
            id,
            replay,
            rx,
            overflowed,
            resync_signaled: false,
        })
    }

    /// Drop a subscription. Queued events are discarded.
    pub async fn unsubscribe(&self, id: &SubscriberId) {
        let mut inner = self.inner.write().await;
        inner.subscribers.retain(|s| &s.id != id);
        inner.stats.active_subscribers = inner.subscribers.len();
    }

    /// Last assigned bookmark.
    pub async fn last_bookmark(&self) -> Bookmark {
        self.inner.read().await.last_bookmark
    }

    /// Raise the bookmark floor (snapshot restore). No-op if lower than
    /// the current sequence.
    pub async fn advance_to(&self, floor: Bookmark) {
        let mut inner = self.inner.write().await;
        if floor > inner.last_bookmark {
            inner.last_bookmark = floor;
        }
    }

    /// Get current bus statistics.
    pub async fn stats(&self) -> BusStats {
        self.inner.read().await.stats.clone()
    }
}

/// Handle for receiving watch items. Replayed events drain before live ones.
#[derive(Debug)]
pub struct Watcher {
    id: SubscriberId,
    replay: VecDeque<Event>,
    rx: mpsc::Receiver<Event>,
    overflowed: Arc<AtomicBool>,
    resync_signaled: bool,
}

impl Watcher {
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Next item. After `Resync` or `Closed` the stream is finished.
    pub async fn recv(&mut self) -> WatchItem {
        if let Some(event) = self.replay.pop_front() {
            return WatchItem::Event(event);
        }

        match self.rx.recv().await {
            Some(event) => WatchItem::Event(event),
            None => {
                if self.overflowed.load(Ordering::Acquire) && !self.resync_signaled {
                    self.resync_signaled = true;
                    WatchItem::Resync
                } else {
                    WatchItem::Closed
                }
            }
        }
    }

    /// Non-blocking variant used by schedulers draining pending events.
    pub fn try_recv(&mut self) -> Option<WatchItem> {
        if let Some(event) = self.replay.pop_front() {
            return Some(WatchItem::Event(event));
        }
        match self.rx.try_recv() {
            Ok(event) => Some(WatchItem::Event(event)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                if self.overflowed.load(Ordering::Acquire) && !self.resync_signaled {
                    self.resync_signaled = true;
                    Some(WatchItem::Resync)
                } else {
                    Some(WatchItem::Closed)
                }
            }
        }
    }
}
