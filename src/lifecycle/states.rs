//! Lifecycle States
//!
//! Per-type state enumerations and their transition graphs. Every graph has a
//! single initial state and at least one terminal state; the terminal state
//! reached by deregistration is the type's retired state.

use crate::entity::EntityType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

// =============================================================================
// Lifecycle Trait
// =============================================================================

/// A state enumeration with an explicit successor table
pub trait Lifecycle: Copy + Eq + Hash + Debug + 'static {
    /// Every state, in declaration order
    const ALL: &'static [Self];

    /// State assigned at registration
    fn initial() -> Self;

    /// Terminal state reached by deregistration
    fn retired() -> Self;

    /// States reachable in one step
    fn successors(&self) -> &'static [Self];

    fn name(&self) -> &'static str;

    fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    fn can_transition_to(&self, target: Self) -> bool {
        self.successors().contains(&target)
    }

    /// Case-insensitive lookup by name
    fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.name().eq_ignore_ascii_case(name.trim()))
    }
}

// =============================================================================
// Allocation State (zones and pods)
// =============================================================================

/// Administrative allocation state of zones and pods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationState {
    Disabled,
    Enabled,
    Destroyed,
}

impl Lifecycle for AllocationState {
    const ALL: &'static [Self] = &[
        AllocationState::Disabled,
        AllocationState::Enabled,
        AllocationState::Destroyed,
    ];

    fn initial() -> Self {
        AllocationState::Disabled
    }

    fn retired() -> Self {
        AllocationState::Destroyed
    }

    fn successors(&self) -> &'static [Self] {
        match self {
            AllocationState::Disabled => &[AllocationState::Enabled, AllocationState::Destroyed],
            AllocationState::Enabled => &[AllocationState::Disabled],
            AllocationState::Destroyed => &[],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AllocationState::Disabled => "Disabled",
            AllocationState::Enabled => "Enabled",
            AllocationState::Destroyed => "Destroyed",
        }
    }
}

// =============================================================================
// Cluster State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterState {
    Disabled,
    Enabled,
    /// Enabled but not managed by the orchestrator
    Unmanaged,
    Destroyed,
}

impl Lifecycle for ClusterState {
    const ALL: &'static [Self] = &[
        ClusterState::Disabled,
        ClusterState::Enabled,
        ClusterState::Unmanaged,
        ClusterState::Destroyed,
    ];

    fn initial() -> Self {
        ClusterState::Disabled
    }

    fn retired() -> Self {
        ClusterState::Destroyed
    }

    fn successors(&self) -> &'static [Self] {
        match self {
            ClusterState::Disabled => &[ClusterState::Enabled, ClusterState::Destroyed],
            ClusterState::Enabled => &[ClusterState::Disabled, ClusterState::Unmanaged],
            ClusterState::Unmanaged => &[ClusterState::Enabled, ClusterState::Disabled],
            ClusterState::Destroyed => &[],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ClusterState::Disabled => "Disabled",
            ClusterState::Enabled => "Enabled",
            ClusterState::Unmanaged => "Unmanaged",
            ClusterState::Destroyed => "Destroyed",
        }
    }
}

// =============================================================================
// Host State
// =============================================================================

/// Resource state of a hypervisor host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Creating,
    Enabled,
    Disabled,
    PrepareForMaintenance,
    ErrorInMaintenance,
    Maintenance,
    Error,
    Removed,
}

impl Lifecycle for HostState {
    const ALL: &'static [Self] = &[
        HostState::Creating,
        HostState::Enabled,
        HostState::Disabled,
        HostState::PrepareForMaintenance,
        HostState::ErrorInMaintenance,
        HostState::Maintenance,
        HostState::Error,
        HostState::Removed,
    ];

    fn initial() -> Self {
        HostState::Creating
    }

    fn retired() -> Self {
        HostState::Removed
    }

    fn successors(&self) -> &'static [Self] {
        match self {
            HostState::Creating => &[HostState::Enabled, HostState::Error, HostState::Removed],
            HostState::Enabled => &[HostState::Disabled, HostState::PrepareForMaintenance],
            HostState::Disabled => &[HostState::Enabled, HostState::Removed],
            HostState::PrepareForMaintenance => &[
                HostState::Maintenance,
                HostState::ErrorInMaintenance,
                HostState::Enabled,
            ],
            HostState::ErrorInMaintenance => {
                &[HostState::PrepareForMaintenance, HostState::Enabled]
            }
            HostState::Maintenance => &[HostState::Enabled, HostState::Removed],
            HostState::Error => &[HostState::Creating, HostState::Removed],
            HostState::Removed => &[],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            HostState::Creating => "Creating",
            HostState::Enabled => "Enabled",
            HostState::Disabled => "Disabled",
            HostState::PrepareForMaintenance => "PrepareForMaintenance",
            HostState::ErrorInMaintenance => "ErrorInMaintenance",
            HostState::Maintenance => "Maintenance",
            HostState::Error => "Error",
            HostState::Removed => "Removed",
        }
    }
}

// =============================================================================
// Storage State
// =============================================================================

/// Status of a primary storage pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageState {
    Initialized,
    Up,
    Disabled,
    PrepareForMaintenance,
    ErrorInMaintenance,
    Maintenance,
    Removed,
}

impl Lifecycle for StorageState {
    const ALL: &'static [Self] = &[
        StorageState::Initialized,
        StorageState::Up,
        StorageState::Disabled,
        StorageState::PrepareForMaintenance,
        StorageState::ErrorInMaintenance,
        StorageState::Maintenance,
        StorageState::Removed,
    ];

    fn initial() -> Self {
        StorageState::Initialized
    }

    fn retired() -> Self {
        StorageState::Removed
    }

    fn successors(&self) -> &'static [Self] {
        match self {
            StorageState::Initialized => &[StorageState::Up, StorageState::Removed],
            StorageState::Up => &[StorageState::Disabled, StorageState::PrepareForMaintenance],
            StorageState::Disabled => &[StorageState::Up, StorageState::Removed],
            StorageState::PrepareForMaintenance => &[
                StorageState::Maintenance,
                StorageState::ErrorInMaintenance,
                StorageState::Up,
            ],
            StorageState::ErrorInMaintenance => {
                &[StorageState::PrepareForMaintenance, StorageState::Up]
            }
            StorageState::Maintenance => &[StorageState::Up, StorageState::Removed],
            StorageState::Removed => &[],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StorageState::Initialized => "Initialized",
            StorageState::Up => "Up",
            StorageState::Disabled => "Disabled",
            StorageState::PrepareForMaintenance => "PrepareForMaintenance",
            StorageState::ErrorInMaintenance => "ErrorInMaintenance",
            StorageState::Maintenance => "Maintenance",
            StorageState::Removed => "Removed",
        }
    }
}

// =============================================================================
// Lifecycle State (cross-type)
// =============================================================================

/// A state tagged with the entity type whose graph it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "lowercase")]
pub enum LifecycleState {
    Zone(AllocationState),
    Pod(AllocationState),
    Cluster(ClusterState),
    Host(HostState),
    Storage(StorageState),
}

impl LifecycleState {
    /// Initial state of the graph registered for `entity_type`
    pub fn initial(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Zone => LifecycleState::Zone(AllocationState::initial()),
            EntityType::Pod => LifecycleState::Pod(AllocationState::initial()),
            EntityType::Cluster => LifecycleState::Cluster(ClusterState::initial()),
            EntityType::Host => LifecycleState::Host(HostState::initial()),
            EntityType::Storage => LifecycleState::Storage(StorageState::initial()),
        }
    }

    /// Retired state of the graph registered for `entity_type`
    pub fn retired(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Zone => LifecycleState::Zone(AllocationState::retired()),
            EntityType::Pod => LifecycleState::Pod(AllocationState::retired()),
            EntityType::Cluster => LifecycleState::Cluster(ClusterState::retired()),
            EntityType::Host => LifecycleState::Host(HostState::retired()),
            EntityType::Storage => LifecycleState::Storage(StorageState::retired()),
        }
    }

    /// Resolve a state name against the graph registered for `entity_type`
    pub fn parse(entity_type: EntityType, name: &str) -> Result<Self> {
        let parsed = match entity_type {
            EntityType::Zone => AllocationState::parse(name).map(LifecycleState::Zone),
            EntityType::Pod => AllocationState::parse(name).map(LifecycleState::Pod),
            EntityType::Cluster => ClusterState::parse(name).map(LifecycleState::Cluster),
            EntityType::Host => HostState::parse(name).map(LifecycleState::Host),
            EntityType::Storage => StorageState::parse(name).map(LifecycleState::Storage),
        };
        parsed.ok_or_else(|| Error::UnknownState {
            entity_type,
            state: name.to_string(),
        })
    }

    /// Every state of the graph registered for `entity_type`
    pub fn all(entity_type: EntityType) -> Vec<Self> {
        match entity_type {
            EntityType::Zone => AllocationState::ALL.iter().map(|s| LifecycleState::Zone(*s)).collect(),
            EntityType::Pod => AllocationState::ALL.iter().map(|s| LifecycleState::Pod(*s)).collect(),
            EntityType::Cluster => ClusterState::ALL.iter().map(|s| LifecycleState::Cluster(*s)).collect(),
            EntityType::Host => HostState::ALL.iter().map(|s| LifecycleState::Host(*s)).collect(),
            EntityType::Storage => StorageState::ALL.iter().map(|s| LifecycleState::Storage(*s)).collect(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            LifecycleState::Zone(_) => EntityType::Zone,
            LifecycleState::Pod(_) => EntityType::Pod,
            LifecycleState::Cluster(_) => EntityType::Cluster,
            LifecycleState::Host(_) => EntityType::Host,
            LifecycleState::Storage(_) => EntityType::Storage,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Zone(s) | LifecycleState::Pod(s) => s.name(),
            LifecycleState::Cluster(s) => s.name(),
            LifecycleState::Host(s) => s.name(),
            LifecycleState::Storage(s) => s.name(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            LifecycleState::Zone(s) | LifecycleState::Pod(s) => s.is_terminal(),
            LifecycleState::Cluster(s) => s.is_terminal(),
            LifecycleState::Host(s) => s.is_terminal(),
            LifecycleState::Storage(s) => s.is_terminal(),
        }
    }

    /// States reachable in one step
    pub fn successors(&self) -> Vec<LifecycleState> {
        match self {
            LifecycleState::Zone(s) => s.successors().iter().map(|n| LifecycleState::Zone(*n)).collect(),
            LifecycleState::Pod(s) => s.successors().iter().map(|n| LifecycleState::Pod(*n)).collect(),
            LifecycleState::Cluster(s) => s.successors().iter().map(|n| LifecycleState::Cluster(*n)).collect(),
            LifecycleState::Host(s) => s.successors().iter().map(|n| LifecycleState::Host(*n)).collect(),
            LifecycleState::Storage(s) => s.successors().iter().map(|n| LifecycleState::Storage(*n)).collect(),
        }
    }

    /// Whether the edge `self -> target` exists; states of different types never connect
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        match (self, target) {
            (LifecycleState::Zone(a), LifecycleState::Zone(b))
            | (LifecycleState::Pod(a), LifecycleState::Pod(b)) => a.can_transition_to(b),
            (LifecycleState::Cluster(a), LifecycleState::Cluster(b)) => a.can_transition_to(b),
            (LifecycleState::Host(a), LifecycleState::Host(b)) => a.can_transition_to(b),
            (LifecycleState::Storage(a), LifecycleState::Storage(b)) => a.can_transition_to(b),
            _ => false,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_graph<S: Lifecycle>() {
        // exactly one initial state, which is not terminal
        assert!(!S::initial().is_terminal());
        assert!(S::retired().is_terminal());
        for state in S::ALL {
            for next in state.successors() {
                assert_ne!(state, next, "self loop on {}", state.name());
                assert!(S::ALL.contains(next));
            }
            assert_eq!(S::parse(state.name()), Some(*state));
        }
    }

    #[test]
    fn test_graphs_are_well_formed() {
        check_graph::<AllocationState>();
        check_graph::<ClusterState>();
        check_graph::<HostState>();
        check_graph::<StorageState>();
    }

    #[test]
    fn test_zone_graph() {
        let disabled = LifecycleState::initial(EntityType::Zone);
        assert_eq!(disabled.name(), "Disabled");

        let enabled = LifecycleState::parse(EntityType::Zone, "enabled").unwrap();
        let destroyed = LifecycleState::retired(EntityType::Zone);

        assert!(disabled.can_transition_to(enabled));
        assert!(enabled.can_transition_to(disabled));
        assert!(disabled.can_transition_to(destroyed));
        assert!(!enabled.can_transition_to(destroyed));
        assert!(destroyed.successors().is_empty());
    }

    #[test]
    fn test_cross_type_states_never_connect() {
        let zone_disabled = LifecycleState::Zone(AllocationState::Disabled);
        let pod_enabled = LifecycleState::Pod(AllocationState::Enabled);
        assert!(!zone_disabled.can_transition_to(pod_enabled));
    }

    #[test]
    fn test_parse_unknown_state() {
        let err = LifecycleState::parse(EntityType::Zone, "Maintenance").unwrap_err();
        assert!(matches!(err, Error::UnknownState { .. }));
        assert!(LifecycleState::parse(EntityType::Host, "Maintenance").is_ok());
    }

    #[test]
    fn test_initial_states() {
        assert_eq!(LifecycleState::initial(EntityType::Host).name(), "Creating");
        assert_eq!(LifecycleState::initial(EntityType::Storage).name(), "Initialized");
        for entity_type in EntityType::ALL {
            let initial = LifecycleState::initial(entity_type);
            assert_eq!(initial.entity_type(), entity_type);
            assert!(LifecycleState::all(entity_type).contains(&initial));
        }
    }
}
