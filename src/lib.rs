//! # Steward Core - Resource Graph & Controller Runtime
//!
//! Rust implementation of the Steward state engine providing:
//! - A typed, versioned resource graph with optimistic concurrency
//! - Watch/notification fan-out with bookmark replay
//! - A controller scheduler mapping input dependencies to reconciliations
//! - Finalizer-based teardown ordering across controllers
//!
//! ## Architecture
//!
//! The runtime owns all shared state; controllers coordinate only through
//! the store:
//! ```text
//!   writers (API / controllers)
//!        │ create/update/destroy
//!        ▼
//!   ┌─────────────┐  events   ┌─────────────┐
//!   │    Store    │ ────────► │  Watch Bus  │
//!   └─────────────┘           └─────────────┘
//!        ▲                          │ per-controller subscriptions
//!        │ reads/derived writes     ▼
//!   ┌─────────────────────────────────────┐
//!   │     Scheduler (1 worker / ctrl)     │
//!   └─────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod bus;
pub mod resource;
pub mod runtime;
pub mod state;
pub mod types;
pub mod util;

// Internal utilities
pub mod observability;

pub use bus::{Bookmark, Event, EventKind, WatchBus, WatchItem, WatchSelector, Watcher};
pub use resource::{Metadata, Phase, Resource, ResourceId, ResourceKind, Typed};
pub use runtime::{Controller, ControllerContext, Runtime};
pub use state::{ListOptions, ListPage, Store, Writer};
pub use types::{Config, Error, Result};
