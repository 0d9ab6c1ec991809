//! Entity Model
//!
//! The record kept for every managed resource. Entities live in the registry
//! arena; links to parents are [`EntityRef`] values, never owned pointers.

use super::details::{DetailChange, Details};
use super::network::PodNetwork;
use super::types::{EntityId, EntityRef, EntityType, EntityUuid};
use crate::actions::{Action, ActionCatalog};
use crate::domain::ports::ManagedEntity;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleState, StateMachine, Transition};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Placement
// =============================================================================

/// Position of an entity in the zone hierarchy plus type-specific attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Placement {
    Zone,
    Pod {
        zone: EntityId,
        network: PodNetwork,
    },
    Cluster {
        zone: EntityId,
        pod: EntityId,
        hypervisor: Option<String>,
    },
    Host {
        zone: EntityId,
        pod: EntityId,
        cluster: EntityId,
        address: Option<String>,
    },
    Storage {
        zone: EntityId,
        pod: Option<EntityId>,
        cluster: Option<EntityId>,
        capacity_bytes: Option<u64>,
    },
}

impl Placement {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Placement::Zone => EntityType::Zone,
            Placement::Pod { .. } => EntityType::Pod,
            Placement::Cluster { .. } => EntityType::Cluster,
            Placement::Host { .. } => EntityType::Host,
            Placement::Storage { .. } => EntityType::Storage,
        }
    }

    /// Narrowest enclosing entity
    pub fn parent(&self) -> Option<EntityRef> {
        match self {
            Placement::Zone => None,
            Placement::Pod { zone, .. } => Some(EntityRef::new(EntityType::Zone, *zone)),
            Placement::Cluster { pod, .. } => Some(EntityRef::new(EntityType::Pod, *pod)),
            Placement::Host { cluster, .. } => Some(EntityRef::new(EntityType::Cluster, *cluster)),
            Placement::Storage { zone, pod, cluster, .. } => Some(match (cluster, pod) {
                (Some(cluster), _) => EntityRef::new(EntityType::Cluster, *cluster),
                (None, Some(pod)) => EntityRef::new(EntityType::Pod, *pod),
                (None, None) => EntityRef::new(EntityType::Zone, *zone),
            }),
        }
    }

    /// Every enclosing entity, root first
    pub fn ancestors(&self) -> Vec<EntityRef> {
        let zone = |id: &EntityId| EntityRef::new(EntityType::Zone, *id);
        let pod = |id: &EntityId| EntityRef::new(EntityType::Pod, *id);
        let cluster = |id: &EntityId| EntityRef::new(EntityType::Cluster, *id);

        match self {
            Placement::Zone => Vec::new(),
            Placement::Pod { zone: z, .. } => vec![zone(z)],
            Placement::Cluster { zone: z, pod: p, .. } => vec![zone(z), pod(p)],
            Placement::Host { zone: z, pod: p, cluster: c, .. } => vec![zone(z), pod(p), cluster(c)],
            Placement::Storage { zone: z, pod: p, cluster: c, .. } => {
                let mut refs = vec![zone(z)];
                refs.extend(p.iter().map(pod));
                refs.extend(c.iter().map(cluster));
                refs
            }
        }
    }

    /// Pod network, for pods
    pub fn network(&self) -> Option<&PodNetwork> {
        match self {
            Placement::Pod { network, .. } => Some(network),
            _ => None,
        }
    }
}

// =============================================================================
// Entity
// =============================================================================

/// A managed datacenter resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    uuid: EntityUuid,
    name: String,
    entity_type: EntityType,
    owner: Option<String>,
    tags: Vec<String>,
    details: Details,
    current_state: LifecycleState,
    desired_state: Option<LifecycleState>,
    created_time: DateTime<Utc>,
    last_updated_time: DateTime<Utc>,
    /// Incremented on every mutation
    version: u64,
    placement: Placement,
    history: Vec<Transition>,
}

impl Entity {
    /// Create an entity in its type's initial state
    pub(crate) fn new(
        id: EntityId,
        uuid: EntityUuid,
        name: String,
        owner: Option<String>,
        tags: Vec<String>,
        details: Details,
        placement: Placement,
    ) -> Self {
        let now = Utc::now();
        let entity_type = placement.entity_type();
        let initial = LifecycleState::initial(entity_type);

        Self {
            id,
            uuid,
            name,
            entity_type,
            owner,
            tags,
            details,
            current_state: initial,
            desired_state: None,
            created_time: now,
            last_updated_time: now,
            version: 0,
            placement,
            history: vec![Transition {
                from: None,
                to: initial,
                at: now,
            }],
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn uuid(&self) -> &EntityUuid {
        &self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.id)
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    pub fn current_state(&self) -> LifecycleState {
        self.current_state
    }

    pub fn desired_state(&self) -> Option<LifecycleState> {
        self.desired_state
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn last_updated_time(&self) -> DateTime<Utc> {
        self.last_updated_time
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn parent(&self) -> Option<EntityRef> {
        self.placement.parent()
    }

    /// Applied transitions, starting with the registration
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Actions legal in the current state
    pub fn applicable_actions(&self) -> Vec<Action> {
        ActionCatalog::applicable(self.entity_type, self.current_state)
    }

    pub fn is_retired(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Desired state set and not yet reached
    pub fn needs_reconciliation(&self) -> bool {
        self.desired_state
            .is_some_and(|desired| desired != self.current_state)
    }

    // =========================================================================
    // Mutators (registry only)
    // =========================================================================

    fn ensure_live(&self) -> Result<()> {
        if self.is_retired() {
            return Err(Error::Retired {
                entity_type: self.entity_type,
                uuid: self.uuid.to_string(),
            });
        }
        Ok(())
    }

    /// Refresh the update timestamp, keeping it strictly increasing
    fn touch(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.last_updated_time = if now > self.last_updated_time {
            now
        } else {
            self.last_updated_time + Duration::microseconds(1)
        };
        self.version += 1;
        self.last_updated_time
    }

    /// Move along a validated edge of the type's graph
    pub(crate) fn apply_transition(&mut self, target: LifecycleState) -> Result<Transition> {
        StateMachine::validate(self.entity_type, self.current_state, target)?;

        let at = self.touch();
        let transition = Transition {
            from: Some(self.current_state),
            to: target,
            at,
        };
        self.current_state = target;
        self.history.push(transition.clone());
        Ok(transition)
    }

    pub(crate) fn set_desired_state(&mut self, desired: Option<LifecycleState>) -> Result<()> {
        self.ensure_live()?;
        if let Some(state) = desired {
            if state.entity_type() != self.entity_type {
                return Err(Error::UnknownState {
                    entity_type: self.entity_type,
                    state: format!("{} state {}", state.entity_type(), state),
                });
            }
        }
        self.desired_state = desired;
        self.touch();
        Ok(())
    }

    pub(crate) fn add_detail(&mut self, name: &str, value: &str) -> Result<DetailChange> {
        self.ensure_live()?;
        let change = self.details.add(name, value);
        if change == DetailChange::Changed {
            self.touch();
        }
        Ok(change)
    }

    pub(crate) fn update_detail(&mut self, name: &str, value: &str) -> Result<DetailChange> {
        self.ensure_live()?;
        let change = self
            .details
            .update(name, value)
            .map_err(|missing| self.missing_detail(missing.name, missing.value))?;
        if change == DetailChange::Changed {
            self.touch();
        }
        Ok(change)
    }

    pub(crate) fn del_detail(&mut self, name: &str, value: &str) -> Result<DetailChange> {
        self.ensure_live()?;
        let change = self
            .details
            .remove(name, value)
            .map_err(|missing| self.missing_detail(missing.name, missing.value))?;
        self.touch();
        Ok(change)
    }

    fn missing_detail(&self, name: String, value: String) -> Error {
        Error::DetailNotFound {
            uuid: self.uuid.to_string(),
            name,
            value,
        }
    }
}

impl ManagedEntity for Entity {
    fn uuid(&self) -> &str {
        self.uuid.as_str()
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn current_state(&self) -> String {
        self.current_state.name().to_string()
    }

    fn desired_state(&self) -> Option<String> {
        self.desired_state.map(|state| state.name().to_string())
    }

    fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    fn last_updated_time(&self) -> DateTime<Utc> {
        self.last_updated_time
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn details(&self) -> &Details {
        &self.details
    }

    fn applicable_actions(&self) -> Vec<Action> {
        Entity::applicable_actions(self)
    }
}
