//! Registry Events
//!
//! Events emitted by the provisioning registry for external consumers (an
//! orchestrator, an audit log) to react to entity lifecycle changes.

use crate::entity::{EntityId, EntityRef, EntityType};
use serde::{Deserialize, Serialize};

/// Events emitted by the provisioning registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A new entity was registered
    EntityRegistered {
        entity_type: EntityType,
        uuid: String,
        id: EntityId,
        parent: Option<EntityRef>,
    },

    /// An entity was retired
    EntityDeregistered {
        entity_type: EntityType,
        uuid: String,
        final_state: String,
    },

    /// An entity's current state changed
    StateChanged {
        entity_type: EntityType,
        uuid: String,
        from: String,
        to: String,
    },

    /// An entity's reconciliation target was set or cleared
    DesiredStateChanged {
        entity_type: EntityType,
        uuid: String,
        desired: Option<String>,
    },

    /// A detail attribute was added, replaced or removed
    DetailsChanged {
        entity_type: EntityType,
        uuid: String,
        name: String,
    },
}

impl RegistryEvent {
    /// Get the uuid of the entity this event is about
    pub fn uuid(&self) -> &str {
        match self {
            RegistryEvent::EntityRegistered { uuid, .. } => uuid,
            RegistryEvent::EntityDeregistered { uuid, .. } => uuid,
            RegistryEvent::StateChanged { uuid, .. } => uuid,
            RegistryEvent::DesiredStateChanged { uuid, .. } => uuid,
            RegistryEvent::DetailsChanged { uuid, .. } => uuid,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            RegistryEvent::EntityRegistered { entity_type, .. }
            | RegistryEvent::EntityDeregistered { entity_type, .. }
            | RegistryEvent::StateChanged { entity_type, .. }
            | RegistryEvent::DesiredStateChanged { entity_type, .. }
            | RegistryEvent::DetailsChanged { entity_type, .. } => *entity_type,
        }
    }

    /// Check if this event changed the entity's current state
    pub fn is_lifecycle_event(&self) -> bool {
        matches!(
            self,
            RegistryEvent::EntityRegistered { .. }
                | RegistryEvent::EntityDeregistered { .. }
                | RegistryEvent::StateChanged { .. }
        )
    }
}

impl std::fmt::Display for RegistryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryEvent::EntityRegistered { entity_type, uuid, id, .. } => {
                write!(f, "{} {} registered as #{}", entity_type, uuid, id)
            }
            RegistryEvent::EntityDeregistered { entity_type, uuid, final_state } => {
                write!(f, "{} {} deregistered ({})", entity_type, uuid, final_state)
            }
            RegistryEvent::StateChanged { entity_type, uuid, from, to } => {
                write!(f, "{} {} {} -> {}", entity_type, uuid, from, to)
            }
            RegistryEvent::DesiredStateChanged { entity_type, uuid, desired } => match desired {
                Some(state) => write!(f, "{} {} desired {}", entity_type, uuid, state),
                None => write!(f, "{} {} desired cleared", entity_type, uuid),
            },
            RegistryEvent::DetailsChanged { entity_type, uuid, name } => {
                write!(f, "{} {} detail {} changed", entity_type, uuid, name)
            }
        }
    }
}
