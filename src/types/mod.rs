//! Core types for the Steward runtime.
//!
//! This module provides foundational types used throughout the system:
//! errors, strongly-typed identifiers, and configuration.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{
    BackoffConfig, Config, ObservabilityConfig, SchedulerConfig, TeardownConfig, WatchConfig,
};
pub use errors::{Error, Result};
pub use ids::{
    ControllerName, FinalizerToken, Namespace, ResourceName, ResourceType, SubscriberId,
};
