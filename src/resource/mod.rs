//! Resource model: addressing, metadata, typed access and type registry.

pub mod metadata;
pub mod registry;
pub mod typed;

pub use metadata::{Metadata, Phase, Resource, ResourceId, VERSION_UNDEFINED};
pub use registry::{KindDefinition, ResourceRegistry};
pub use typed::{ResourceKind, Typed};
