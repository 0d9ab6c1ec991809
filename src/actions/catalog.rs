//! Action Catalog
//!
//! Statically enumerated operations per entity type. Each action carries a
//! guard over the entity's current state; the catalog filters the table, it
//! never introspects or executes anything.

use crate::entity::EntityType;
use crate::lifecycle::{
    AllocationState, ClusterState, HostState, Lifecycle, LifecycleState, StorageState,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Action Table Trait
// =============================================================================

/// Per-type action enumeration over a state type
trait ActionTable: Copy + 'static {
    type State: Lifecycle;

    const ALL: &'static [Self];

    /// Allowed source states and target, for state-changing actions
    fn transition(&self) -> Option<(&'static [Self::State], Self::State)>;

    fn name(&self) -> &'static str;

    fn allowed(&self, state: Self::State) -> bool {
        match self.transition() {
            Some((sources, target)) => sources.contains(&state) && state.can_transition_to(target),
            // bookkeeping actions are open until the entity is retired
            None => !state.is_terminal(),
        }
    }
}

// =============================================================================
// Zone / Pod Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneAction {
    Enable,
    Disable,
    Delete,
    AddPod,
    AddStorage,
    UpdateDetails,
}

impl ActionTable for ZoneAction {
    type State = AllocationState;

    const ALL: &'static [Self] = &[
        ZoneAction::Enable,
        ZoneAction::Disable,
        ZoneAction::Delete,
        ZoneAction::AddPod,
        ZoneAction::AddStorage,
        ZoneAction::UpdateDetails,
    ];

    fn transition(&self) -> Option<(&'static [AllocationState], AllocationState)> {
        match self {
            ZoneAction::Enable => Some((&[AllocationState::Disabled], AllocationState::Enabled)),
            ZoneAction::Disable => Some((&[AllocationState::Enabled], AllocationState::Disabled)),
            ZoneAction::Delete => Some((&[AllocationState::Disabled], AllocationState::Destroyed)),
            ZoneAction::AddPod | ZoneAction::AddStorage | ZoneAction::UpdateDetails => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ZoneAction::Enable => "enable",
            ZoneAction::Disable => "disable",
            ZoneAction::Delete => "delete",
            ZoneAction::AddPod => "add_pod",
            ZoneAction::AddStorage => "add_storage",
            ZoneAction::UpdateDetails => "update_details",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodAction {
    Enable,
    Disable,
    Delete,
    AddCluster,
    AddStorage,
    UpdateDetails,
}

impl ActionTable for PodAction {
    type State = AllocationState;

    const ALL: &'static [Self] = &[
        PodAction::Enable,
        PodAction::Disable,
        PodAction::Delete,
        PodAction::AddCluster,
        PodAction::AddStorage,
        PodAction::UpdateDetails,
    ];

    fn transition(&self) -> Option<(&'static [AllocationState], AllocationState)> {
        match self {
            PodAction::Enable => Some((&[AllocationState::Disabled], AllocationState::Enabled)),
            PodAction::Disable => Some((&[AllocationState::Enabled], AllocationState::Disabled)),
            PodAction::Delete => Some((&[AllocationState::Disabled], AllocationState::Destroyed)),
            PodAction::AddCluster | PodAction::AddStorage | PodAction::UpdateDetails => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PodAction::Enable => "enable",
            PodAction::Disable => "disable",
            PodAction::Delete => "delete",
            PodAction::AddCluster => "add_cluster",
            PodAction::AddStorage => "add_storage",
            PodAction::UpdateDetails => "update_details",
        }
    }
}

// =============================================================================
// Cluster Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterAction {
    Enable,
    Disable,
    Unmanage,
    Manage,
    Delete,
    AddHost,
    AddStorage,
    UpdateDetails,
}

impl ActionTable for ClusterAction {
    type State = ClusterState;

    const ALL: &'static [Self] = &[
        ClusterAction::Enable,
        ClusterAction::Disable,
        ClusterAction::Unmanage,
        ClusterAction::Manage,
        ClusterAction::Delete,
        ClusterAction::AddHost,
        ClusterAction::AddStorage,
        ClusterAction::UpdateDetails,
    ];

    fn transition(&self) -> Option<(&'static [ClusterState], ClusterState)> {
        match self {
            ClusterAction::Enable => Some((&[ClusterState::Disabled], ClusterState::Enabled)),
            ClusterAction::Disable => Some((
                &[ClusterState::Enabled, ClusterState::Unmanaged],
                ClusterState::Disabled,
            )),
            ClusterAction::Unmanage => Some((&[ClusterState::Enabled], ClusterState::Unmanaged)),
            ClusterAction::Manage => Some((&[ClusterState::Unmanaged], ClusterState::Enabled)),
            ClusterAction::Delete => Some((&[ClusterState::Disabled], ClusterState::Destroyed)),
            ClusterAction::AddHost | ClusterAction::AddStorage | ClusterAction::UpdateDetails => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ClusterAction::Enable => "enable",
            ClusterAction::Disable => "disable",
            ClusterAction::Unmanage => "unmanage",
            ClusterAction::Manage => "manage",
            ClusterAction::Delete => "delete",
            ClusterAction::AddHost => "add_host",
            ClusterAction::AddStorage => "add_storage",
            ClusterAction::UpdateDetails => "update_details",
        }
    }
}

// =============================================================================
// Host Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostAction {
    Enable,
    Disable,
    PrepareForMaintenance,
    CompleteMaintenance,
    FailMaintenance,
    CancelMaintenance,
    MarkError,
    Retry,
    Remove,
    UpdateDetails,
}

impl ActionTable for HostAction {
    type State = HostState;

    const ALL: &'static [Self] = &[
        HostAction::Enable,
        HostAction::Disable,
        HostAction::PrepareForMaintenance,
        HostAction::CompleteMaintenance,
        HostAction::FailMaintenance,
        HostAction::CancelMaintenance,
        HostAction::MarkError,
        HostAction::Retry,
        HostAction::Remove,
        HostAction::UpdateDetails,
    ];

    fn transition(&self) -> Option<(&'static [HostState], HostState)> {
        match self {
            HostAction::Enable => Some((&[HostState::Creating, HostState::Disabled], HostState::Enabled)),
            HostAction::Disable => Some((&[HostState::Enabled], HostState::Disabled)),
            HostAction::PrepareForMaintenance => Some((
                &[HostState::Enabled, HostState::ErrorInMaintenance],
                HostState::PrepareForMaintenance,
            )),
            HostAction::CompleteMaintenance => {
                Some((&[HostState::PrepareForMaintenance], HostState::Maintenance))
            }
            HostAction::FailMaintenance => {
                Some((&[HostState::PrepareForMaintenance], HostState::ErrorInMaintenance))
            }
            HostAction::CancelMaintenance => Some((
                &[
                    HostState::PrepareForMaintenance,
                    HostState::ErrorInMaintenance,
                    HostState::Maintenance,
                ],
                HostState::Enabled,
            )),
            HostAction::MarkError => Some((&[HostState::Creating], HostState::Error)),
            HostAction::Retry => Some((&[HostState::Error], HostState::Creating)),
            HostAction::Remove => Some((
                &[
                    HostState::Creating,
                    HostState::Disabled,
                    HostState::Maintenance,
                    HostState::Error,
                ],
                HostState::Removed,
            )),
            HostAction::UpdateDetails => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            HostAction::Enable => "enable",
            HostAction::Disable => "disable",
            HostAction::PrepareForMaintenance => "prepare_for_maintenance",
            HostAction::CompleteMaintenance => "complete_maintenance",
            HostAction::FailMaintenance => "fail_maintenance",
            HostAction::CancelMaintenance => "cancel_maintenance",
            HostAction::MarkError => "mark_error",
            HostAction::Retry => "retry",
            HostAction::Remove => "remove",
            HostAction::UpdateDetails => "update_details",
        }
    }
}

// =============================================================================
// Storage Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageAction {
    Enable,
    Disable,
    PrepareForMaintenance,
    CompleteMaintenance,
    FailMaintenance,
    CancelMaintenance,
    Delete,
    UpdateDetails,
}

impl ActionTable for StorageAction {
    type State = StorageState;

    const ALL: &'static [Self] = &[
        StorageAction::Enable,
        StorageAction::Disable,
        StorageAction::PrepareForMaintenance,
        StorageAction::CompleteMaintenance,
        StorageAction::FailMaintenance,
        StorageAction::CancelMaintenance,
        StorageAction::Delete,
        StorageAction::UpdateDetails,
    ];

    fn transition(&self) -> Option<(&'static [StorageState], StorageState)> {
        match self {
            StorageAction::Enable => Some((&[StorageState::Initialized, StorageState::Disabled], StorageState::Up)),
            StorageAction::Disable => Some((&[StorageState::Up], StorageState::Disabled)),
            StorageAction::PrepareForMaintenance => Some((
                &[StorageState::Up, StorageState::ErrorInMaintenance],
                StorageState::PrepareForMaintenance,
            )),
            StorageAction::CompleteMaintenance => {
                Some((&[StorageState::PrepareForMaintenance], StorageState::Maintenance))
            }
            StorageAction::FailMaintenance => {
                Some((&[StorageState::PrepareForMaintenance], StorageState::ErrorInMaintenance))
            }
            StorageAction::CancelMaintenance => Some((
                &[
                    StorageState::PrepareForMaintenance,
                    StorageState::ErrorInMaintenance,
                    StorageState::Maintenance,
                ],
                StorageState::Up,
            )),
            StorageAction::Delete => Some((
                &[
                    StorageState::Initialized,
                    StorageState::Disabled,
                    StorageState::Maintenance,
                ],
                StorageState::Removed,
            )),
            StorageAction::UpdateDetails => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StorageAction::Enable => "enable",
            StorageAction::Disable => "disable",
            StorageAction::PrepareForMaintenance => "prepare_for_maintenance",
            StorageAction::CompleteMaintenance => "complete_maintenance",
            StorageAction::FailMaintenance => "fail_maintenance",
            StorageAction::CancelMaintenance => "cancel_maintenance",
            StorageAction::Delete => "delete",
            StorageAction::UpdateDetails => "update_details",
        }
    }
}

// =============================================================================
// Action
// =============================================================================

/// An operation tagged with the entity type it applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "action", rename_all = "lowercase")]
pub enum Action {
    Zone(ZoneAction),
    Pod(PodAction),
    Cluster(ClusterAction),
    Host(HostAction),
    Storage(StorageAction),
}

impl Action {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Action::Zone(_) => EntityType::Zone,
            Action::Pod(_) => EntityType::Pod,
            Action::Cluster(_) => EntityType::Cluster,
            Action::Host(_) => EntityType::Host,
            Action::Storage(_) => EntityType::Storage,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Zone(a) => a.name(),
            Action::Pod(a) => a.name(),
            Action::Cluster(a) => a.name(),
            Action::Host(a) => a.name(),
            Action::Storage(a) => a.name(),
        }
    }

    /// Target state for state-changing actions
    pub fn target(&self) -> Option<LifecycleState> {
        match self {
            Action::Zone(a) => a.transition().map(|(_, t)| LifecycleState::Zone(t)),
            Action::Pod(a) => a.transition().map(|(_, t)| LifecycleState::Pod(t)),
            Action::Cluster(a) => a.transition().map(|(_, t)| LifecycleState::Cluster(t)),
            Action::Host(a) => a.transition().map(|(_, t)| LifecycleState::Host(t)),
            Action::Storage(a) => a.transition().map(|(_, t)| LifecycleState::Storage(t)),
        }
    }

    pub fn is_state_change(&self) -> bool {
        self.target().is_some()
    }

    /// Guard predicate over `(type, state)`
    pub fn guard(&self, entity_type: EntityType, state: LifecycleState) -> bool {
        match (self, entity_type, state) {
            (Action::Zone(a), EntityType::Zone, LifecycleState::Zone(s)) => a.allowed(s),
            (Action::Pod(a), EntityType::Pod, LifecycleState::Pod(s)) => a.allowed(s),
            (Action::Cluster(a), EntityType::Cluster, LifecycleState::Cluster(s)) => a.allowed(s),
            (Action::Host(a), EntityType::Host, LifecycleState::Host(s)) => a.allowed(s),
            (Action::Storage(a), EntityType::Storage, LifecycleState::Storage(s)) => a.allowed(s),
            _ => false,
        }
    }

    /// Look up an action by name within a type's table
    pub fn parse(entity_type: EntityType, name: &str) -> Option<Action> {
        ActionCatalog::all(entity_type)
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity_type(), self.name())
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Pure lookup of the actions legal in a given state
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionCatalog;

impl ActionCatalog {
    /// Every action declared for `entity_type`, in declaration order
    pub fn all(entity_type: EntityType) -> Vec<Action> {
        match entity_type {
            EntityType::Zone => ZoneAction::ALL.iter().map(|a| Action::Zone(*a)).collect(),
            EntityType::Pod => PodAction::ALL.iter().map(|a| Action::Pod(*a)).collect(),
            EntityType::Cluster => ClusterAction::ALL.iter().map(|a| Action::Cluster(*a)).collect(),
            EntityType::Host => HostAction::ALL.iter().map(|a| Action::Host(*a)).collect(),
            EntityType::Storage => StorageAction::ALL.iter().map(|a| Action::Storage(*a)).collect(),
        }
    }

    /// Ordered set of actions whose guard holds for `(entity_type, state)`
    pub fn applicable(entity_type: EntityType, state: LifecycleState) -> Vec<Action> {
        Self::all(entity_type)
            .into_iter()
            .filter(|action| action.guard(entity_type, state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(actions: &[Action]) -> Vec<&'static str> {
        actions.iter().map(|a| a.name()).collect()
    }

    #[test]
    fn test_zone_actions_by_state() {
        let disabled = LifecycleState::Zone(AllocationState::Disabled);
        assert_eq!(
            names(&ActionCatalog::applicable(EntityType::Zone, disabled)),
            vec!["enable", "delete", "add_pod", "add_storage", "update_details"]
        );

        let enabled = LifecycleState::Zone(AllocationState::Enabled);
        assert_eq!(
            names(&ActionCatalog::applicable(EntityType::Zone, enabled)),
            vec!["disable", "add_pod", "add_storage", "update_details"]
        );

        let destroyed = LifecycleState::Zone(AllocationState::Destroyed);
        assert!(ActionCatalog::applicable(EntityType::Zone, destroyed).is_empty());
    }

    #[test]
    fn test_host_maintenance_actions() {
        let preparing = LifecycleState::Host(HostState::PrepareForMaintenance);
        let actions = ActionCatalog::applicable(EntityType::Host, preparing);
        assert_eq!(
            names(&actions),
            vec![
                "complete_maintenance",
                "fail_maintenance",
                "cancel_maintenance",
                "update_details"
            ]
        );
    }

    #[test]
    fn test_mismatched_type_yields_nothing() {
        let zone_state = LifecycleState::Zone(AllocationState::Disabled);
        assert!(ActionCatalog::applicable(EntityType::Pod, zone_state).is_empty());
        assert!(!Action::Zone(ZoneAction::Enable).guard(EntityType::Pod, zone_state));
    }

    #[test]
    fn test_transition_actions_follow_graph_edges() {
        for entity_type in EntityType::ALL {
            for action in ActionCatalog::all(entity_type) {
                let Some(target) = action.target() else { continue };
                assert_eq!(target.entity_type(), entity_type);
                for state in LifecycleState::all(entity_type) {
                    if action.guard(entity_type, state) {
                        assert!(
                            state.can_transition_to(target),
                            "{} allowed in {} without edge to {}",
                            action,
                            state,
                            target
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_every_live_state_offers_an_action() {
        for entity_type in EntityType::ALL {
            for state in LifecycleState::all(entity_type) {
                let actions = ActionCatalog::applicable(entity_type, state);
                assert_eq!(actions.is_empty(), state.is_terminal(), "{} {}", entity_type, state);
            }
        }
    }

    #[test]
    fn test_parse_and_display() {
        let action = Action::parse(EntityType::Host, "Prepare_For_Maintenance").unwrap();
        assert_eq!(action, Action::Host(HostAction::PrepareForMaintenance));
        assert_eq!(action.to_string(), "host.prepare_for_maintenance");
        assert!(Action::parse(EntityType::Zone, "add_host").is_none());
    }

    #[test]
    fn test_query_is_pure() {
        let state = LifecycleState::Storage(StorageState::Up);
        let first = ActionCatalog::applicable(EntityType::Storage, state);
        let second = ActionCatalog::applicable(EntityType::Storage, state);
        assert_eq!(first, second);
    }
}
