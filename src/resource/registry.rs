//! Resource type registry.
//!
//! Concrete types register a definition (type name, default namespace,
//! aliases) so transport layers and tooling can resolve user-supplied type
//! names. Payload schemas stay opaque to the runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::typed::ResourceKind;
use crate::types::{Error, Namespace, ResourceType, Result};

/// Registered definition of a concrete resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindDefinition {
    pub resource_type: ResourceType,
    pub default_namespace: Namespace,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub aliases: Vec<ResourceType>,
}

impl KindDefinition {
    /// Derive a definition from a [`ResourceKind`] implementation.
    pub fn of<K: ResourceKind>() -> Self {
        Self {
            resource_type: K::resource_type(),
            default_namespace: K::default_namespace(),
            aliases: K::aliases().into_iter().map(ResourceType::from).collect(),
        }
    }
}

/// Registry of known resource types, resolvable by type name or alias.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    definitions: HashMap<ResourceType, KindDefinition>,
    alias_index: HashMap<ResourceType, ResourceType>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind by its trait implementation.
    pub fn register<K: ResourceKind>(&mut self) -> Result<()> {
        self.register_definition(KindDefinition::of::<K>())
    }

    /// Register an explicit definition (used by remote/type-erased callers).
    pub fn register_definition(&mut self, definition: KindDefinition) -> Result<()> {
        if self.definitions.contains_key(&definition.resource_type) {
            return Err(Error::already_exists(format!(
                "resource type {} already registered",
                definition.resource_type
            )));
        }

        for alias in &definition.aliases {
            if alias == &definition.resource_type {
                return Err(Error::validation(format!(
                    "alias {} duplicates the type name",
                    alias
                )));
            }
            if self.alias_index.contains_key(alias) || self.definitions.contains_key(alias) {
                return Err(Error::already_exists(format!(
                    "alias {} already registered",
                    alias
                )));
            }
        }

        for alias in &definition.aliases {
            self.alias_index
                .insert(alias.clone(), definition.resource_type.clone());
        }

        tracing::debug!(
            resource_type = %definition.resource_type,
            namespace = %definition.default_namespace,
            "registered resource type"
        );
        self.definitions
            .insert(definition.resource_type.clone(), definition);
        Ok(())
    }

    /// Resolve a type name or alias to its definition.
    pub fn resolve(&self, name: &ResourceType) -> Option<&KindDefinition> {
        if let Some(definition) = self.definitions.get(name) {
            return Some(definition);
        }
        self.alias_index
            .get(name)
            .and_then(|canonical| self.definitions.get(canonical))
    }

    /// All registered definitions, unordered.
    pub fn definitions(&self) -> impl Iterator<Item = &KindDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn etc_file_definition() -> KindDefinition {
        KindDefinition {
            resource_type: ResourceType::from("EtcFileSpec"),
            default_namespace: Namespace::from("files"),
            aliases: vec![ResourceType::from("etcfile")],
        }
    }

    #[test]
    fn resolves_by_type_and_alias() {
        let mut registry = ResourceRegistry::new();
        registry.register_definition(etc_file_definition()).unwrap();

        let by_type = registry.resolve(&ResourceType::from("EtcFileSpec")).unwrap();
        assert_eq!(by_type.default_namespace.as_str(), "files");

        let by_alias = registry.resolve(&ResourceType::from("etcfile")).unwrap();
        assert_eq!(by_alias.resource_type.as_str(), "EtcFileSpec");

        assert!(registry.resolve(&ResourceType::from("unknown")).is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ResourceRegistry::new();
        registry.register_definition(etc_file_definition()).unwrap();

        let result = registry.register_definition(etc_file_definition());
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn alias_collision_fails() {
        let mut registry = ResourceRegistry::new();
        registry.register_definition(etc_file_definition()).unwrap();

        let colliding = KindDefinition {
            resource_type: ResourceType::from("RenderedFileSpec"),
            default_namespace: Namespace::from("files"),
            aliases: vec![ResourceType::from("etcfile")],
        };
        assert!(registry.register_definition(colliding).is_err());
    }
}
