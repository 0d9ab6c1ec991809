//! Entity Identity Types
//!
//! Identifiers used to link entities. Cross-entity references are always one
//! of these values looked up in the registry, never an owned pointer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::str::FromStr;

// =============================================================================
// Entity Type
// =============================================================================

/// Managed resource types, root first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Zone,
    Pod,
    Cluster,
    Host,
    Storage,
}

impl EntityType {
    /// All entity types in hierarchy order
    pub const ALL: [EntityType; 5] = [
        EntityType::Zone,
        EntityType::Pod,
        EntityType::Cluster,
        EntityType::Host,
        EntityType::Storage,
    ];

    /// Type of the mandatory parent, if any
    pub fn parent_type(&self) -> Option<EntityType> {
        match self {
            EntityType::Zone => None,
            EntityType::Pod => Some(EntityType::Zone),
            EntityType::Cluster => Some(EntityType::Pod),
            EntityType::Host => Some(EntityType::Cluster),
            EntityType::Storage => Some(EntityType::Zone),
        }
    }

    /// Types whose entities may reference this type as a parent or scope
    pub fn child_types(&self) -> &'static [EntityType] {
        match self {
            EntityType::Zone => &[EntityType::Pod, EntityType::Storage],
            EntityType::Pod => &[EntityType::Cluster, EntityType::Storage],
            EntityType::Cluster => &[EntityType::Host, EntityType::Storage],
            EntityType::Host | EntityType::Storage => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Zone => "zone",
            EntityType::Pod => "pod",
            EntityType::Cluster => "cluster",
            EntityType::Host => "host",
            EntityType::Storage => "storage",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zone" => Ok(EntityType::Zone),
            "pod" => Ok(EntityType::Pod),
            "cluster" => Ok(EntityType::Cluster),
            "host" => Ok(EntityType::Host),
            "storage" | "storagepool" | "storage_pool" => Ok(EntityType::Storage),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "unknown entity type: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Entity ID
// =============================================================================

/// Internal identity, assigned by the registry in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Entity UUID
// =============================================================================

/// Caller-facing identity, unique across the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EntityUuid(pub String);

impl EntityUuid {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    /// Generate a fresh random uuid
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for EntityUuid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityUuid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityUuid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for EntityUuid {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

// =============================================================================
// Entity Reference
// =============================================================================

/// Typed pointer into the registry arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: EntityId) -> Self {
        Self { entity_type, id }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}
