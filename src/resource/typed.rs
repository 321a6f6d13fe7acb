//! Compile-time-safe access to type-erased resources.
//!
//! Concrete resource types implement [`ResourceKind`] with serde-typed
//! spec/status payloads; [`Typed`] wraps the uniform [`Resource`] container
//! and encodes/decodes at the boundary. The runtime itself never looks
//! inside the payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use super::metadata::{Metadata, Resource, ResourceId};
use crate::types::{Error, Namespace, ResourceName, ResourceType, Result};

/// A concrete resource type: type name, default namespace, payload schemas.
pub trait ResourceKind {
    /// Desired-state payload, set by the owning controller.
    type Spec: Serialize + DeserializeOwned;

    /// Observed-state payload, set by the status writer.
    type Status: Serialize + DeserializeOwned;

    /// Unique type name, e.g. `"EtcFileSpec"`.
    const TYPE: &'static str;

    /// Namespace used when the caller does not pick one.
    const DEFAULT_NAMESPACE: &'static str;

    /// Alternate type names accepted by the registry.
    fn aliases() -> Vec<&'static str> {
        Vec::new()
    }

    fn resource_type() -> ResourceType {
        ResourceType::from(Self::TYPE)
    }

    fn default_namespace() -> Namespace {
        Namespace::from(Self::DEFAULT_NAMESPACE)
    }
}

/// Typed view over a [`Resource`], parameterized by its kind.
#[derive(Debug, Clone)]
pub struct Typed<K: ResourceKind> {
    resource: Resource,
    _kind: PhantomData<K>,
}

impl<K: ResourceKind> Typed<K> {
    /// Build a new resource of this kind in its default namespace.
    pub fn new(name: impl Into<ResourceName>, spec: K::Spec) -> Result<Self> {
        Self::new_in(K::default_namespace(), name, spec)
    }

    /// Build a new resource of this kind in an explicit namespace.
    pub fn new_in(
        namespace: Namespace,
        name: impl Into<ResourceName>,
        spec: K::Spec,
    ) -> Result<Self> {
        let id = ResourceId {
            namespace,
            resource_type: K::resource_type(),
            name: name.into(),
        };
        Ok(Self {
            resource: Resource::new(id, serde_json::to_value(&spec)?),
            _kind: PhantomData,
        })
    }

    /// Adopt a type-erased resource, checking that the type matches.
    pub fn from_resource(resource: Resource) -> Result<Self> {
        if resource.metadata.id.resource_type.as_str() != K::TYPE {
            return Err(Error::validation(format!(
                "resource {} is not of type {}",
                resource.metadata.id,
                K::TYPE
            )));
        }
        Ok(Self {
            resource,
            _kind: PhantomData,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.resource.metadata
    }

    pub fn id(&self) -> &ResourceId {
        self.resource.id()
    }

    /// Decode the spec payload.
    pub fn spec(&self) -> Result<K::Spec> {
        Ok(serde_json::from_value(self.resource.spec.clone())?)
    }

    /// Decode the status payload, absent until first observed.
    pub fn status(&self) -> Result<Option<K::Status>> {
        match &self.resource.status {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn set_spec(&mut self, spec: K::Spec) -> Result<()> {
        self.resource.spec = serde_json::to_value(&spec)?;
        Ok(())
    }

    pub fn set_status(&mut self, status: K::Status) -> Result<()> {
        self.resource.status = Some(serde_json::to_value(&status)?);
        Ok(())
    }

    /// Give up the typed view.
    pub fn into_inner(self) -> Resource {
        self.resource
    }

    pub fn as_resource(&self) -> &Resource {
        &self.resource
    }
}

impl<K: ResourceKind> From<Typed<K>> for Resource {
    fn from(typed: Typed<K>) -> Self {
        typed.resource
    }
}
