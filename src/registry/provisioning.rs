//! Provisioning Registry
//!
//! Arena of every managed entity, one table per entity type. Tables map
//! [`EntityId`]s (assigned in creation order) to slots; each slot holds the
//! entity behind its own lock plus the immutable index data needed for
//! hierarchy checks (ancestors, name scope, pod IP range) and the retired flag.
//!
//! Locking discipline:
//! - a table lock is always taken before the locks of its entities
//! - ancestor levels are locked before descendant levels
//!   (zone < pod < cluster < host < storage)
//! - registration holds the parent table's read lock until the child is
//!   committed; retirement needs the write lock of its own table, so a parent
//!   cannot be retired between the parent check and the child commit
//! - state and detail mutations only hold their table's read lock plus the
//!   entity's write lock, so distinct entities never wait on each other

use super::events::RegistryEvent;
use super::requests::{
    ClusterRegistration, HostRegistration, PodRegistration, StorageRegistration, ZoneRegistration,
};
use crate::actions::Action;
use crate::config::RegistryConfig;
use crate::domain::ports::ProvisioningService;
use crate::entity::{
    DetailChange, Details, Entity, EntityId, EntityRef, EntityType, EntityUuid, IpRange,
    Placement, PodNetwork,
};
use crate::error::{Error, ErrorKind, Result};
use crate::lifecycle::{LifecycleState, StateMachine, TransitionRequest};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

// =============================================================================
// Table Slots
// =============================================================================

/// Arena slot for one entity
#[derive(Debug)]
struct Slot {
    entity: Arc<RwLock<Entity>>,
    /// Uniqueness key within `scope`
    name: String,
    scope: Option<EntityRef>,
    /// Enclosing entities, root first
    ancestors: Vec<EntityRef>,
    /// Pod management range, released on retirement
    range: Option<IpRange>,
    retired: bool,
}

impl Slot {
    fn snapshot(&self) -> Entity {
        self.entity.read().clone()
    }

    fn ancestor(&self, entity_type: EntityType) -> Option<EntityId> {
        self.ancestors
            .iter()
            .find(|r| r.entity_type == entity_type)
            .map(|r| r.id)
    }

    fn owner(&self) -> Option<String> {
        self.entity.read().owner().map(str::to_string)
    }
}

/// All entities of one type, ordered by id
#[derive(Debug, Default)]
struct Table {
    slots: BTreeMap<EntityId, Slot>,
}

impl Table {
    fn live(&self) -> impl Iterator<Item = &Slot> + '_ {
        self.slots.values().filter(|slot| !slot.retired)
    }

    fn name_taken(&self, scope: Option<EntityRef>, name: &str) -> bool {
        self.live().any(|slot| slot.scope == scope && slot.name == name)
    }

    fn live_dependents(&self, parent: EntityRef) -> usize {
        self.live()
            .filter(|slot| slot.ancestors.contains(&parent))
            .count()
    }

    /// Parent lookup for registration: must exist and not be retired
    fn resolve_parent(&self, parent: EntityRef) -> Result<&Slot> {
        match self.slots.get(&parent.id) {
            None => Err(Error::Reference {
                parent_type: parent.entity_type,
                parent: parent.id.to_string(),
                reason: "does not exist".to_string(),
            }),
            Some(slot) if slot.retired => Err(Error::Reference {
                parent_type: parent.entity_type,
                parent: parent.id.to_string(),
                reason: "is retired".to_string(),
            }),
            Some(slot) => Ok(slot),
        }
    }
}

/// Validated registration awaiting commit
struct Draft {
    uuid: Option<String>,
    name: String,
    owner: Option<String>,
    tags: Vec<String>,
    details: BTreeMap<String, String>,
    placement: Placement,
    scope: Option<EntityRef>,
    range: Option<IpRange>,
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry-wide counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub registrations: AtomicU64,
    pub deregistrations: AtomicU64,
    pub transitions: AtomicU64,
    pub rejected_transitions: AtomicU64,
    pub cas_conflicts: AtomicU64,
    pub detail_updates: AtomicU64,
    /// Live entities per type, indexed by hierarchy order
    live: [AtomicU64; 5],
}

impl RegistryStats {
    fn live_counter(&self, entity_type: EntityType) -> &AtomicU64 {
        &self.live[entity_type as usize]
    }

    /// Create a snapshot of current stats
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            deregistrations: self.deregistrations.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            rejected_transitions: self.rejected_transitions.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            detail_updates: self.detail_updates.load(Ordering::Relaxed),
            live: EntityType::ALL
                .iter()
                .map(|t| (*t, self.live_counter(*t).load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatsSnapshot {
    pub registrations: u64,
    pub deregistrations: u64,
    pub transitions: u64,
    pub rejected_transitions: u64,
    pub cas_conflicts: u64,
    pub detail_updates: u64,
    pub live: BTreeMap<EntityType, u64>,
}

impl RegistryStatsSnapshot {
    pub fn live_count(&self, entity_type: EntityType) -> u64 {
        self.live.get(&entity_type).copied().unwrap_or(0)
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Result of one reconciliation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No desired state is set
    NoTarget,
    /// Current state already equals the desired state
    Converged,
    /// One transition was applied
    Stepped {
        from: LifecycleState,
        to: LifecycleState,
        converged: bool,
    },
}

/// Summary of a reconciliation pass over the whole registry
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub steps: usize,
    pub converged: Vec<EntityUuid>,
    pub failed: Vec<(EntityUuid, Error)>,
}

// =============================================================================
// Provisioning Registry
// =============================================================================

/// Registry context owning every entity; construct once and share the `Arc`
pub struct ProvisioningRegistry {
    config: RegistryConfig,
    /// One table per entity type, indexed by hierarchy order
    tables: [RwLock<Table>; 5],
    /// Registry-wide uuid index
    uuids: DashMap<EntityUuid, EntityRef>,
    next_id: AtomicU64,
    stats: RegistryStats,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for ProvisioningRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningRegistry")
            .field("entities", &self.uuids.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProvisioningRegistry {
    /// Create a new registry
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(config.event_capacity.max(1));

        Arc::new(Self {
            config,
            tables: Default::default(),
            uuids: DashMap::new(),
            next_id: AtomicU64::new(1),
            stats: RegistryStats::default(),
            event_sender,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }

    fn emit(&self, event: RegistryEvent) {
        // no subscribers is fine
        let _ = self.event_sender.send(event);
    }

    fn table(&self, entity_type: EntityType) -> &RwLock<Table> {
        &self.tables[entity_type as usize]
    }

    /// Resolve a uuid to an arena reference of the expected type
    fn lookup(&self, entity_type: EntityType, uuid: &str) -> Result<EntityRef> {
        let found = self.uuids.get(uuid).map(|entry| *entry.value());
        match found {
            Some(entity_ref) if entity_ref.entity_type == entity_type => Ok(entity_ref),
            _ => Err(Error::NotFound {
                entity_type,
                key: uuid.to_string(),
            }),
        }
    }

    fn record_rejection(&self, entity_type: EntityType, uuid: &str, err: &Error) {
        match err.kind() {
            ErrorKind::InvalidTransition => {
                self.stats.rejected_transitions.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::ConcurrentModification => {
                self.stats.cas_conflicts.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        debug!(%entity_type, uuid, error = %err, "State change rejected");
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Insert a validated draft into `table`; the last fallible step is the
    /// uuid reservation, so a failure leaves nothing behind
    fn commit(&self, table: &mut Table, draft: Draft) -> Result<Entity> {
        let entity_type = draft.placement.entity_type();

        if draft.name.trim().is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} name must not be empty",
                entity_type
            )));
        }
        if table.name_taken(draft.scope, &draft.name) {
            return Err(Error::Duplicate {
                entity_type,
                key: match draft.scope {
                    Some(scope) => format!("{} in {}", draft.name, scope),
                    None => draft.name,
                },
            });
        }

        let uuid = match draft.uuid {
            Some(uuid) if uuid.trim().is_empty() => {
                return Err(Error::InvalidArgument(format!(
                    "{} uuid must not be empty",
                    entity_type
                )))
            }
            Some(uuid) => EntityUuid::new(uuid),
            None => EntityUuid::generate(),
        };

        let id = match self.uuids.entry(uuid.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::Duplicate {
                    entity_type,
                    key: uuid.to_string(),
                })
            }
            Entry::Vacant(vacant) => {
                let id = EntityId(self.next_id.fetch_add(1, Ordering::SeqCst));
                vacant.insert(EntityRef::new(entity_type, id));
                id
            }
        };

        let ancestors = draft.placement.ancestors();
        let entity = Entity::new(
            id,
            uuid,
            draft.name.clone(),
            draft.owner,
            draft.tags,
            Details::from(draft.details),
            draft.placement,
        );
        let snapshot = entity.clone();

        table.slots.insert(
            id,
            Slot {
                entity: Arc::new(RwLock::new(entity)),
                name: draft.name,
                scope: draft.scope,
                ancestors,
                range: draft.range,
                retired: false,
            },
        );

        self.stats.registrations.fetch_add(1, Ordering::Relaxed);
        self.stats.live_counter(entity_type).fetch_add(1, Ordering::Relaxed);

        self.emit(RegistryEvent::EntityRegistered {
            entity_type,
            uuid: snapshot.uuid().to_string(),
            id,
            parent: snapshot.parent(),
        });

        Ok(snapshot)
    }

    /// Register a zone; it starts `Disabled`
    pub fn register_zone(&self, request: ZoneRegistration) -> Result<Entity> {
        if request.uuid.trim().is_empty() {
            return Err(Error::InvalidArgument("zone uuid must not be empty".to_string()));
        }
        let name = request.name.unwrap_or_else(|| request.uuid.clone());

        let mut zones = self.table(EntityType::Zone).write();
        let entity = self.commit(
            &mut zones,
            Draft {
                uuid: Some(request.uuid),
                name,
                owner: request.owner,
                tags: request.tags,
                details: request.details,
                placement: Placement::Zone,
                scope: None,
                range: None,
            },
        )?;
        drop(zones);

        info!(uuid = %entity.uuid(), id = %entity.id(), owner = ?entity.owner(), "Zone registered");
        Ok(entity)
    }

    /// Register a pod inside a live zone
    pub fn register_pod(&self, request: PodRegistration) -> Result<Entity> {
        let zone_ref = EntityRef::new(EntityType::Zone, request.zone_id);

        let zones = self.table(EntityType::Zone).read();
        let zone = zones.resolve_parent(zone_ref)?;
        let owner = request.owner.or_else(|| zone.owner());

        let network = PodNetwork::parse(
            &request.gateway,
            &request.cidr,
            &request.start_ip,
            &request.end_ip,
        )?;

        let mut pods = self.table(EntityType::Pod).write();
        let overlapping = pods.live().find(|slot| {
            slot.scope == Some(zone_ref)
                && slot.range.is_some_and(|range| range.overlaps(&network.range))
        });
        if let Some(sibling) = overlapping {
            warn!(
                zone = %request.zone_id,
                pod = %request.name,
                sibling = %sibling.name,
                "Pod IP range overlaps sibling"
            );
            return Err(Error::Conflict(format!(
                "range {} overlaps pod {} in zone {}",
                network.range, sibling.name, request.zone_id
            )));
        }

        let entity = self.commit(
            &mut pods,
            Draft {
                uuid: request.uuid,
                name: request.name,
                owner,
                tags: request.tags,
                details: request.details,
                placement: Placement::Pod {
                    zone: request.zone_id,
                    network,
                },
                scope: Some(zone_ref),
                range: Some(network.range),
            },
        )?;
        drop(pods);
        drop(zones);

        info!(uuid = %entity.uuid(), id = %entity.id(), zone = %request.zone_id, range = %network.range, "Pod registered");
        Ok(entity)
    }

    /// Register a cluster inside a live pod
    pub fn register_cluster(&self, request: ClusterRegistration) -> Result<Entity> {
        let pod_ref = EntityRef::new(EntityType::Pod, request.pod_id);

        let pods = self.table(EntityType::Pod).read();
        let pod = pods.resolve_parent(pod_ref)?;
        let zone = Self::required_ancestor(pod, pod_ref, EntityType::Zone)?;
        let owner = request.owner.or_else(|| pod.owner());

        let mut clusters = self.table(EntityType::Cluster).write();
        let entity = self.commit(
            &mut clusters,
            Draft {
                uuid: request.uuid,
                name: request.name,
                owner,
                tags: request.tags,
                details: request.details,
                placement: Placement::Cluster {
                    zone,
                    pod: request.pod_id,
                    hypervisor: request.hypervisor,
                },
                scope: Some(pod_ref),
                range: None,
            },
        )?;
        drop(clusters);
        drop(pods);

        info!(uuid = %entity.uuid(), id = %entity.id(), pod = %request.pod_id, "Cluster registered");
        Ok(entity)
    }

    /// Register a host inside a live cluster
    pub fn register_host(&self, request: HostRegistration) -> Result<Entity> {
        let cluster_ref = EntityRef::new(EntityType::Cluster, request.cluster_id);

        let clusters = self.table(EntityType::Cluster).read();
        let cluster = clusters.resolve_parent(cluster_ref)?;
        let zone = Self::required_ancestor(cluster, cluster_ref, EntityType::Zone)?;
        let pod = Self::required_ancestor(cluster, cluster_ref, EntityType::Pod)?;
        let owner = request.owner.or_else(|| cluster.owner());

        let mut hosts = self.table(EntityType::Host).write();
        let entity = self.commit(
            &mut hosts,
            Draft {
                uuid: request.uuid,
                name: request.name,
                owner,
                tags: request.tags,
                details: request.details,
                placement: Placement::Host {
                    zone,
                    pod,
                    cluster: request.cluster_id,
                    address: request.address,
                },
                scope: Some(cluster_ref),
                range: None,
            },
        )?;
        drop(hosts);
        drop(clusters);

        info!(uuid = %entity.uuid(), id = %entity.id(), cluster = %request.cluster_id, "Host registered");
        Ok(entity)
    }

    /// Register a storage pool in a live zone, optionally scoped to a pod or cluster
    pub fn register_storage(&self, request: StorageRegistration) -> Result<Entity> {
        let zone_ref = EntityRef::new(EntityType::Zone, request.zone_id);

        let zones = self.table(EntityType::Zone).read();
        let zone = zones.resolve_parent(zone_ref)?;
        let owner = request.owner.or_else(|| zone.owner());

        let pods = self.table(EntityType::Pod).read();
        if let Some(pod_id) = request.pod_id {
            let pod_ref = EntityRef::new(EntityType::Pod, pod_id);
            let pod = pods.resolve_parent(pod_ref)?;
            if pod.ancestor(EntityType::Zone) != Some(request.zone_id) {
                return Err(Self::outside_scope(pod_ref, zone_ref));
            }
        }

        let clusters = self.table(EntityType::Cluster).read();
        let mut pod_id = request.pod_id;
        if let Some(cluster_id) = request.cluster_id {
            let cluster_ref = EntityRef::new(EntityType::Cluster, cluster_id);
            let cluster = clusters.resolve_parent(cluster_ref)?;
            if cluster.ancestor(EntityType::Zone) != Some(request.zone_id) {
                return Err(Self::outside_scope(cluster_ref, zone_ref));
            }
            let cluster_pod = cluster.ancestor(EntityType::Pod);
            match request.pod_id {
                Some(requested) if cluster_pod != Some(requested) => {
                    return Err(Self::outside_scope(
                        cluster_ref,
                        EntityRef::new(EntityType::Pod, requested),
                    ));
                }
                _ => pod_id = cluster_pod,
            }
        }

        let mut storage = self.table(EntityType::Storage).write();
        let entity = self.commit(
            &mut storage,
            Draft {
                uuid: request.uuid,
                name: request.name,
                owner,
                tags: request.tags,
                details: request.details,
                placement: Placement::Storage {
                    zone: request.zone_id,
                    pod: pod_id,
                    cluster: request.cluster_id,
                    capacity_bytes: request.capacity_bytes,
                },
                scope: Some(zone_ref),
                range: None,
            },
        )?;
        drop(storage);
        drop(clusters);
        drop(pods);
        drop(zones);

        info!(uuid = %entity.uuid(), id = %entity.id(), zone = %request.zone_id, "Storage registered");
        Ok(entity)
    }

    fn required_ancestor(slot: &Slot, slot_ref: EntityRef, entity_type: EntityType) -> Result<EntityId> {
        slot.ancestor(entity_type).ok_or_else(|| Error::Reference {
            parent_type: slot_ref.entity_type,
            parent: slot_ref.id.to_string(),
            reason: format!("has no enclosing {}", entity_type),
        })
    }

    fn outside_scope(child: EntityRef, scope: EntityRef) -> Error {
        Error::Reference {
            parent_type: child.entity_type,
            parent: child.id.to_string(),
            reason: format!("is not inside {}", scope),
        }
    }

    // =========================================================================
    // Deregistration
    // =========================================================================

    /// Retire an entity by moving it to its type's terminal state
    ///
    /// Refused while live children still reference it. The record stays
    /// readable; its name and IP range are released.
    pub fn deregister(&self, entity_type: EntityType, uuid: &str) -> Result<Entity> {
        self.retire(entity_type, uuid, LifecycleState::retired(entity_type), None, None)
    }

    pub fn deregister_zone(&self, uuid: &str) -> Result<Entity> {
        self.deregister(EntityType::Zone, uuid)
    }

    pub fn deregister_pod(&self, uuid: &str) -> Result<Entity> {
        self.deregister(EntityType::Pod, uuid)
    }

    pub fn deregister_cluster(&self, uuid: &str) -> Result<Entity> {
        self.deregister(EntityType::Cluster, uuid)
    }

    pub fn deregister_host(&self, uuid: &str) -> Result<Entity> {
        self.deregister(EntityType::Host, uuid)
    }

    pub fn deregister_storage(&self, uuid: &str) -> Result<Entity> {
        self.deregister(EntityType::Storage, uuid)
    }

    fn retire(
        &self,
        entity_type: EntityType,
        uuid: &str,
        target: LifecycleState,
        expected_state: Option<LifecycleState>,
        expected_version: Option<u64>,
    ) -> Result<Entity> {
        let entity_ref = self.lookup(entity_type, uuid)?;

        // the write lock excludes registrations below this entity
        let mut table = self.table(entity_type).write();
        let entity_lock = table
            .slots
            .get(&entity_ref.id)
            .map(|slot| slot.entity.clone())
            .ok_or_else(|| Error::NotFound {
                entity_type,
                key: uuid.to_string(),
            })?;
        let mut entity = entity_lock.write();

        let checked = Self::check_expectations(&entity, expected_state, expected_version)
            .and_then(|_| StateMachine::validate(entity_type, entity.current_state(), target));
        if let Err(err) = checked {
            self.record_rejection(entity_type, uuid, &err);
            return Err(err);
        }

        for child_type in entity_type.child_types() {
            let count = self.table(*child_type).read().live_dependents(entity_ref);
            if count > 0 {
                warn!(%entity_type, uuid, %child_type, count, "Deregistration refused, live dependents");
                return Err(Error::HasDependents {
                    entity_type,
                    uuid: uuid.to_string(),
                    child_type: *child_type,
                    count,
                });
            }
        }

        let from = entity.current_state();
        entity.apply_transition(target)?;
        let snapshot = entity.clone();
        drop(entity);

        if let Some(slot) = table.slots.get_mut(&entity_ref.id) {
            slot.retired = true;
        }
        drop(table);

        self.stats.deregistrations.fetch_add(1, Ordering::Relaxed);
        self.stats.live_counter(entity_type).fetch_sub(1, Ordering::Relaxed);

        self.emit(RegistryEvent::EntityDeregistered {
            entity_type,
            uuid: uuid.to_string(),
            final_state: target.name().to_string(),
        });

        info!(%entity_type, uuid, %from, to = %target, "Entity deregistered");
        Ok(snapshot)
    }

    // =========================================================================
    // State Changes
    // =========================================================================

    fn check_expectations(
        entity: &Entity,
        expected_state: Option<LifecycleState>,
        expected_version: Option<u64>,
    ) -> Result<()> {
        if entity.is_retired() {
            return Err(Error::Retired {
                entity_type: entity.entity_type(),
                uuid: entity.uuid().to_string(),
            });
        }
        if let Some(expected) = expected_state {
            if expected != entity.current_state() {
                return Err(Error::ConcurrentModification {
                    entity_type: entity.entity_type(),
                    uuid: entity.uuid().to_string(),
                    expected: expected.name().to_string(),
                    actual: entity.current_state().name().to_string(),
                });
            }
        }
        if let Some(expected) = expected_version {
            if expected != entity.version() {
                return Err(Error::ConcurrentModification {
                    entity_type: entity.entity_type(),
                    uuid: entity.uuid().to_string(),
                    expected: format!("version {}", expected),
                    actual: format!("version {}", entity.version()),
                });
            }
        }
        Ok(())
    }

    /// Run `f` on the entity while holding its write lock
    fn with_entity_mut<T>(
        &self,
        entity_type: EntityType,
        uuid: &str,
        f: impl FnOnce(&mut Entity) -> Result<T>,
    ) -> Result<T> {
        let entity_ref = self.lookup(entity_type, uuid)?;
        let table = self.table(entity_type).read();
        let slot = table.slots.get(&entity_ref.id).ok_or_else(|| Error::NotFound {
            entity_type,
            key: uuid.to_string(),
        })?;
        let mut entity = slot.entity.write();
        f(&mut entity)
    }

    /// Apply a transition request, honouring its compare-and-swap expectations
    ///
    /// Requests targeting a terminal state take the deregistration path.
    pub fn transition(&self, request: TransitionRequest) -> Result<Entity> {
        let entity_type = request.entity_type;
        let uuid = request.uuid.as_str();

        if request.target.entity_type() != entity_type {
            return Err(Error::UnknownState {
                entity_type,
                state: format!("{} state {}", request.target.entity_type(), request.target),
            });
        }
        if request.target.is_terminal() {
            return self.retire(
                entity_type,
                uuid,
                request.target,
                request.expected_state,
                request.expected_version,
            );
        }

        let applied = self.with_entity_mut(entity_type, uuid, |entity| {
            Self::check_expectations(entity, request.expected_state, request.expected_version)?;
            let transition = entity.apply_transition(request.target)?;
            Ok((transition, entity.clone()))
        });

        let (transition, snapshot) = match applied {
            Ok(applied) => applied,
            Err(err) => {
                self.record_rejection(entity_type, uuid, &err);
                return Err(err);
            }
        };

        self.stats.transitions.fetch_add(1, Ordering::Relaxed);
        let from = transition
            .from
            .map(|state| state.name().to_string())
            .unwrap_or_default();
        debug!(%entity_type, uuid, %from, to = %transition.to, "State changed");

        self.emit(RegistryEvent::StateChanged {
            entity_type,
            uuid: uuid.to_string(),
            from,
            to: transition.to.name().to_string(),
        });
        Ok(snapshot)
    }

    /// Cross-type entry point: move `uuid` to the named state of `entity_type`'s graph
    pub fn change_state(&self, entity_type: EntityType, uuid: &str, state: &str) -> Result<Entity> {
        let target = match LifecycleState::parse(entity_type, state) {
            Ok(target) => target,
            Err(err) => {
                self.record_rejection(entity_type, uuid, &err);
                return Err(err);
            }
        };
        self.transition(TransitionRequest::new(uuid, target))
    }

    /// Move to `target` only if the entity is still in `expected`
    pub fn compare_and_set_state(
        &self,
        uuid: &str,
        expected: LifecycleState,
        target: LifecycleState,
    ) -> Result<Entity> {
        self.transition(TransitionRequest::new(uuid, target).expecting(expected))
    }

    /// Execute a state-changing action, re-checking its guard
    pub fn perform(&self, entity_type: EntityType, uuid: &str, action: Action) -> Result<Entity> {
        if action.entity_type() != entity_type {
            return Err(Error::InvalidArgument(format!(
                "{} does not apply to {}",
                action, entity_type
            )));
        }
        let Some(target) = action.target() else {
            return Err(Error::InvalidArgument(format!(
                "{} is not a state change",
                action
            )));
        };

        let current = self.get(entity_type, uuid)?.current_state();
        if !action.guard(entity_type, current) {
            let err = Error::InvalidTransition {
                entity_type,
                from: current.name().to_string(),
                to: target.name().to_string(),
            };
            self.record_rejection(entity_type, uuid, &err);
            return Err(err);
        }

        self.transition(TransitionRequest::new(uuid, target).expecting(current))
    }

    // =========================================================================
    // Desired State & Reconciliation
    // =========================================================================

    /// Set the reconciliation target of an entity
    pub fn set_desired_state(&self, entity_type: EntityType, uuid: &str, state: &str) -> Result<Entity> {
        let desired = LifecycleState::parse(entity_type, state)?;
        self.update_desired(entity_type, uuid, Some(desired))
    }

    pub fn clear_desired_state(&self, entity_type: EntityType, uuid: &str) -> Result<Entity> {
        self.update_desired(entity_type, uuid, None)
    }

    fn update_desired(
        &self,
        entity_type: EntityType,
        uuid: &str,
        desired: Option<LifecycleState>,
    ) -> Result<Entity> {
        let snapshot = self.with_entity_mut(entity_type, uuid, |entity| {
            entity.set_desired_state(desired)?;
            Ok(entity.clone())
        })?;

        self.emit(RegistryEvent::DesiredStateChanged {
            entity_type,
            uuid: uuid.to_string(),
            desired: desired.map(|state| state.name().to_string()),
        });
        debug!(%entity_type, uuid, desired = ?desired.map(|s| s.name()), "Desired state updated");
        Ok(snapshot)
    }

    /// Apply one step toward the desired state
    ///
    /// The step is a compare-and-swap on the observed current state, so a
    /// concurrent change makes this fail with a retryable error instead of
    /// overwriting it.
    pub fn reconcile(&self, entity_type: EntityType, uuid: &str) -> Result<ReconcileOutcome> {
        let snapshot = self.get(entity_type, uuid)?;
        let Some(desired) = snapshot.desired_state() else {
            return Ok(ReconcileOutcome::NoTarget);
        };
        let current = snapshot.current_state();
        if desired == current {
            return Ok(ReconcileOutcome::Converged);
        }

        let next = StateMachine::next_step(current, desired).ok_or_else(|| Error::InvalidTransition {
            entity_type,
            from: current.name().to_string(),
            to: desired.name().to_string(),
        })?;

        self.transition(TransitionRequest::new(uuid, next).expecting(current))?;
        Ok(ReconcileOutcome::Stepped {
            from: current,
            to: next,
            converged: next == desired,
        })
    }

    /// Step an entity until it reaches its desired state; returns the steps taken
    pub fn reconcile_until_converged(&self, entity_type: EntityType, uuid: &str) -> Result<usize> {
        // a shortest path never visits a state twice
        let max_steps = LifecycleState::all(entity_type).len();
        let mut steps = 0;

        while steps <= max_steps {
            match self.reconcile(entity_type, uuid)? {
                ReconcileOutcome::NoTarget | ReconcileOutcome::Converged => return Ok(steps),
                ReconcileOutcome::Stepped { converged, .. } => {
                    steps += 1;
                    if converged {
                        return Ok(steps);
                    }
                }
            }
        }
        Err(Error::InvalidTransition {
            entity_type,
            from: self.get(entity_type, uuid)?.current_state().name().to_string(),
            to: "desired state".to_string(),
        })
    }

    /// Entities whose desired state is set and not yet reached, hierarchy order
    pub fn pending_reconciliation(&self) -> Vec<Entity> {
        EntityType::ALL
            .iter()
            .flat_map(|entity_type| {
                self.table(*entity_type)
                    .read()
                    .live()
                    .map(Slot::snapshot)
                    .filter(Entity::needs_reconciliation)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Drive every pending entity to its desired state
    pub fn reconcile_all(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for entity in self.pending_reconciliation() {
            let uuid = entity.uuid().clone();
            match self.reconcile_until_converged(entity.entity_type(), uuid.as_str()) {
                Ok(steps) => {
                    report.steps += steps;
                    report.converged.push(uuid);
                }
                Err(err) => {
                    warn!(uuid = %uuid, error = %err, "Reconciliation failed");
                    report.failed.push((uuid, err));
                }
            }
        }
        report
    }

    // =========================================================================
    // Details
    // =========================================================================

    fn mutate_details(
        &self,
        entity_type: EntityType,
        uuid: &str,
        name: &str,
        f: impl FnOnce(&mut Entity) -> Result<DetailChange>,
    ) -> Result<Entity> {
        let (change, snapshot) = self.with_entity_mut(entity_type, uuid, |entity| {
            let change = f(entity)?;
            Ok((change, entity.clone()))
        })?;

        if change == DetailChange::Changed {
            self.stats.detail_updates.fetch_add(1, Ordering::Relaxed);
            self.emit(RegistryEvent::DetailsChanged {
                entity_type,
                uuid: uuid.to_string(),
                name: name.to_string(),
            });
            debug!(%entity_type, uuid, detail = name, "Details changed");
        }
        Ok(snapshot)
    }

    /// Append `value` to the detail `name`; no-op if already present
    pub fn add_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity> {
        self.mutate_details(entity_type, uuid, name, |entity| entity.add_detail(name, value))
    }

    /// Replace all values of `name` with `value`
    pub fn update_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity> {
        self.mutate_details(entity_type, uuid, name, |entity| entity.update_detail(name, value))
    }

    /// Remove exactly `value` from `name`
    pub fn del_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity> {
        self.mutate_details(entity_type, uuid, name, |entity| entity.del_detail(name, value))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of an entity, retired ones included
    pub fn get(&self, entity_type: EntityType, uuid: &str) -> Result<Entity> {
        let entity_ref = self.lookup(entity_type, uuid)?;
        self.table(entity_type)
            .read()
            .slots
            .get(&entity_ref.id)
            .map(Slot::snapshot)
            .ok_or_else(|| Error::NotFound {
                entity_type,
                key: uuid.to_string(),
            })
    }

    pub fn get_zone(&self, uuid: &str) -> Result<Entity> {
        self.get(EntityType::Zone, uuid)
    }

    pub fn get_by_id(&self, entity_type: EntityType, id: EntityId) -> Result<Entity> {
        self.table(entity_type)
            .read()
            .slots
            .get(&id)
            .map(Slot::snapshot)
            .ok_or_else(|| Error::NotFound {
                entity_type,
                key: format!("#{}", id),
            })
    }

    /// Check if a uuid is registered under any type
    pub fn contains(&self, uuid: &str) -> bool {
        self.uuids.contains_key(uuid)
    }

    /// Live entities of a type, in creation order
    pub fn list(&self, entity_type: EntityType) -> Vec<Entity> {
        self.table(entity_type).read().live().map(Slot::snapshot).collect()
    }

    /// Every entity of a type including retired ones, in creation order
    pub fn list_all(&self, entity_type: EntityType) -> Vec<Entity> {
        self.table(entity_type)
            .read()
            .slots
            .values()
            .map(Slot::snapshot)
            .collect()
    }

    pub fn list_zones(&self) -> Vec<Entity> {
        self.list(EntityType::Zone)
    }

    pub fn list_pods(&self) -> Vec<Entity> {
        self.list(EntityType::Pod)
    }

    pub fn list_clusters(&self) -> Vec<Entity> {
        self.list(EntityType::Cluster)
    }

    pub fn list_hosts(&self) -> Vec<Entity> {
        self.list(EntityType::Host)
    }

    pub fn list_storage(&self) -> Vec<Entity> {
        self.list(EntityType::Storage)
    }

    /// Live entities whose narrowest enclosing entity is `uuid`
    pub fn children(&self, entity_type: EntityType, uuid: &str) -> Result<Vec<Entity>> {
        let entity_ref = self.lookup(entity_type, uuid)?;
        Ok(entity_type
            .child_types()
            .iter()
            .flat_map(|child_type| {
                self.table(*child_type)
                    .read()
                    .live()
                    .filter(|slot| slot.ancestors.last() == Some(&entity_ref))
                    .map(Slot::snapshot)
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    /// Actions legal on the entity right now
    pub fn applicable_actions(&self, entity_type: EntityType, uuid: &str) -> Result<Vec<Action>> {
        Ok(self.get(entity_type, uuid)?.applicable_actions())
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.tables.iter().map(|table| table.read().live().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// ProvisioningService Implementation
// =============================================================================

#[async_trait]
impl ProvisioningService for ProvisioningRegistry {
    async fn register_zone(&self, request: ZoneRegistration) -> Result<Entity> {
        ProvisioningRegistry::register_zone(self, request)
    }

    async fn register_pod(&self, request: PodRegistration) -> Result<Entity> {
        ProvisioningRegistry::register_pod(self, request)
    }

    async fn register_cluster(&self, request: ClusterRegistration) -> Result<Entity> {
        ProvisioningRegistry::register_cluster(self, request)
    }

    async fn register_host(&self, request: HostRegistration) -> Result<Entity> {
        ProvisioningRegistry::register_host(self, request)
    }

    async fn register_storage(&self, request: StorageRegistration) -> Result<Entity> {
        ProvisioningRegistry::register_storage(self, request)
    }

    async fn deregister(&self, entity_type: EntityType, uuid: &str) -> Result<Entity> {
        ProvisioningRegistry::deregister(self, entity_type, uuid)
    }

    async fn change_state(&self, entity_type: EntityType, uuid: &str, state: &str) -> Result<Entity> {
        ProvisioningRegistry::change_state(self, entity_type, uuid, state)
    }

    async fn get(&self, entity_type: EntityType, uuid: &str) -> Result<Entity> {
        ProvisioningRegistry::get(self, entity_type, uuid)
    }

    async fn get_zone(&self, uuid: &str) -> Result<Entity> {
        ProvisioningRegistry::get_zone(self, uuid)
    }

    async fn list(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        Ok(ProvisioningRegistry::list(self, entity_type))
    }

    async fn add_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity> {
        ProvisioningRegistry::add_detail(self, entity_type, uuid, name, value)
    }

    async fn update_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity> {
        ProvisioningRegistry::update_detail(self, entity_type, uuid, name, value)
    }

    async fn del_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity> {
        ProvisioningRegistry::del_detail(self, entity_type, uuid, name, value)
    }

    fn watch(&self) -> BoxStream<'static, RegistryEvent> {
        futures::stream::unfold(self.subscribe(), |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event watcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{AllocationState, HostState, StorageState};
    use assert_matches::assert_matches;
    use std::thread;

    fn registry() -> Arc<ProvisioningRegistry> {
        ProvisioningRegistry::new(RegistryConfig::default())
    }

    fn zone(registry: &ProvisioningRegistry, uuid: &str) -> Entity {
        registry
            .register_zone(ZoneRegistration::new(uuid, "alice").with_detail("region", "us"))
            .unwrap()
    }

    fn pod_request(zone: &Entity, name: &str, start: &str, end: &str) -> PodRegistration {
        PodRegistration::new(name, zone.id(), "10.0.0.1", "10.0.0.0/24", start, end)
    }

    /// zone -> pod -> cluster -> host
    fn hierarchy(registry: &ProvisioningRegistry) -> (Entity, Entity, Entity, Entity) {
        let zone = zone(registry, "Z1");
        let pod = registry
            .register_pod(pod_request(&zone, "pod1", "10.0.0.10", "10.0.0.50"))
            .unwrap();
        let cluster = registry
            .register_cluster(ClusterRegistration::new("c1", pod.id()))
            .unwrap();
        let host = registry
            .register_host(HostRegistration::new("h1", cluster.id()))
            .unwrap();
        (zone, pod, cluster, host)
    }

    #[test]
    fn test_zone_scenario() {
        let registry = registry();
        let created = zone(&registry, "Z1");
        assert_eq!(created.current_state(), LifecycleState::Zone(AllocationState::Disabled));
        assert_eq!(created.desired_state(), None);

        let fetched = registry.get_zone("Z1").unwrap();
        assert_eq!(fetched.current_state().name(), "Disabled");
        assert_eq!(fetched.owner(), Some("alice"));
        let region = fetched.details().get("region").unwrap();
        assert_eq!(region.len(), 1);
        assert!(region.contains("us"));

        let enabled = registry.change_state(EntityType::Zone, "Z1", "Enabled").unwrap();
        assert_eq!(enabled.current_state().name(), "Enabled");
        assert!(enabled.last_updated_time() > fetched.last_updated_time());

        // Enabled -> Destroyed is not an edge
        let before = registry.get_zone("Z1").unwrap();
        assert_matches!(
            registry.change_state(EntityType::Zone, "Z1", "Destroyed"),
            Err(Error::InvalidTransition { .. })
        );
        assert_eq!(registry.get_zone("Z1").unwrap(), before);
    }

    #[test]
    fn test_unknown_zone_and_state() {
        let registry = registry();
        assert_matches!(registry.get_zone("nope"), Err(Error::NotFound { .. }));
        assert_matches!(
            registry.change_state(EntityType::Zone, "nope", "Enabled"),
            Err(Error::NotFound { .. })
        );

        zone(&registry, "Z1");
        let err = registry.change_state(EntityType::Zone, "Z1", "Maintenance").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        // a zone uuid is not a pod
        assert_matches!(registry.get(EntityType::Pod, "Z1"), Err(Error::NotFound { .. }));
    }

    #[test]
    fn test_duplicate_zone_uuid() {
        let registry = registry();
        zone(&registry, "Z1");
        assert_matches!(
            registry.register_zone(ZoneRegistration::new("Z1", "bob")),
            Err(Error::Duplicate { .. })
        );
        assert_eq!(registry.list_zones().len(), 1);
    }

    #[test]
    fn test_uuid_unique_across_types() {
        let registry = registry();
        let zone = zone(&registry, "Z1");
        let result = registry.register_pod(pod_request(&zone, "pod1", "10.0.0.10", "10.0.0.20").with_uuid("Z1"));
        assert_matches!(result, Err(Error::Duplicate { .. }));
        assert!(registry.list_pods().is_empty());
    }

    #[test]
    fn test_register_pod_with_missing_zone() {
        let registry = registry();
        let request = PodRegistration::new("pod1", EntityId(42), "10.0.0.1", "10.0.0.0/24", "10.0.0.10", "10.0.0.20");
        assert_matches!(registry.register_pod(request), Err(Error::Reference { .. }));
        assert!(registry.list_pods().is_empty());
        assert_eq!(registry.stats().registrations, 0);
    }

    #[test]
    fn test_register_pod_with_retired_zone() {
        let registry = registry();
        let zone = zone(&registry, "Z1");
        registry.deregister_zone("Z1").unwrap();

        let result = registry.register_pod(pod_request(&zone, "pod1", "10.0.0.10", "10.0.0.20"));
        assert_matches!(result, Err(Error::Reference { .. }));
    }

    #[test]
    fn test_overlapping_pod_ranges_conflict() {
        let registry = registry();
        let zone = zone(&registry, "Z1");
        registry
            .register_pod(pod_request(&zone, "pod1", "10.0.0.10", "10.0.0.50"))
            .unwrap();

        let result = registry.register_pod(pod_request(&zone, "pod2", "10.0.0.40", "10.0.0.60"));
        assert_matches!(result, Err(Error::Conflict(_)));
        assert_eq!(registry.list_pods().len(), 1);

        registry
            .register_pod(pod_request(&zone, "pod2", "10.0.0.51", "10.0.0.60"))
            .unwrap();
    }

    #[test]
    fn test_overlap_only_checked_within_zone() {
        let registry = registry();
        let z1 = zone(&registry, "Z1");
        let z2 = zone(&registry, "Z2");
        registry
            .register_pod(pod_request(&z1, "pod1", "10.0.0.10", "10.0.0.50"))
            .unwrap();
        registry
            .register_pod(pod_request(&z2, "pod1", "10.0.0.10", "10.0.0.50"))
            .unwrap();
        assert_eq!(registry.list_pods().len(), 2);
    }

    #[test]
    fn test_retired_pod_releases_range_and_name() {
        let registry = registry();
        let zone = zone(&registry, "Z1");
        let pod = registry
            .register_pod(pod_request(&zone, "pod1", "10.0.0.10", "10.0.0.50"))
            .unwrap();
        registry.deregister_pod(pod.uuid().as_str()).unwrap();

        let again = registry
            .register_pod(pod_request(&zone, "pod1", "10.0.0.10", "10.0.0.50"))
            .unwrap();
        assert_ne!(again.uuid(), pod.uuid());
        assert_eq!(registry.list_all(EntityType::Pod).len(), 2);
        assert_eq!(registry.list_pods().len(), 1);
    }

    #[test]
    fn test_invalid_pod_network() {
        let registry = registry();
        let zone = zone(&registry, "Z1");
        let result = registry.register_pod(pod_request(&zone, "pod1", "10.0.0.50", "10.0.0.10"));
        assert_matches!(result, Err(Error::InvalidArgument(_)));
        assert!(registry.list_pods().is_empty());
    }

    #[test]
    fn test_duplicate_names_are_scoped() {
        let registry = registry();
        let (_, pod, cluster, _) = hierarchy(&registry);

        assert_matches!(
            registry.register_cluster(ClusterRegistration::new("c1", pod.id())),
            Err(Error::Duplicate { .. })
        );
        assert_matches!(
            registry.register_host(HostRegistration::new("h1", cluster.id())),
            Err(Error::Duplicate { .. })
        );
        registry
            .register_host(HostRegistration::new("h2", cluster.id()))
            .unwrap();
    }

    #[test]
    fn test_children_inherit_owner_and_ancestry() {
        let registry = registry();
        let (zone, pod, cluster, host) = hierarchy(&registry);

        assert_eq!(host.owner(), Some("alice"));
        assert_eq!(host.parent(), Some(cluster.entity_ref()));
        assert_eq!(
            host.placement().ancestors(),
            vec![zone.entity_ref(), pod.entity_ref(), cluster.entity_ref()]
        );
        assert_eq!(host.current_state(), LifecycleState::Host(HostState::Creating));

        let children = registry.children(EntityType::Zone, "Z1").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].uuid(), pod.uuid());
    }

    #[test]
    fn test_storage_scopes() {
        let registry = registry();
        let (zone, pod, cluster, _) = hierarchy(&registry);

        let zone_wide = registry
            .register_storage(StorageRegistration::new("nfs-1", zone.id()))
            .unwrap();
        assert_eq!(zone_wide.parent(), Some(zone.entity_ref()));
        assert_eq!(zone_wide.current_state(), LifecycleState::Storage(StorageState::Initialized));

        let cluster_scoped = registry
            .register_storage(StorageRegistration::new("ceph-1", zone.id()).in_cluster(cluster.id()))
            .unwrap();
        assert_eq!(cluster_scoped.parent(), Some(cluster.entity_ref()));
        assert!(cluster_scoped.placement().ancestors().contains(&pod.entity_ref()));

        let other_zone = self::zone(&registry, "Z2");
        let result = registry.register_storage(StorageRegistration::new("bad", other_zone.id()).in_pod(pod.id()));
        assert_matches!(result, Err(Error::Reference { .. }));
    }

    #[test]
    fn test_deregister_requires_no_live_children() {
        let registry = registry();
        let (_, pod, cluster, host) = hierarchy(&registry);

        assert_matches!(
            registry.deregister_zone("Z1"),
            Err(Error::HasDependents { child_type: EntityType::Pod, .. })
        );
        assert_matches!(
            registry.deregister_cluster(cluster.uuid().as_str()),
            Err(Error::HasDependents { child_type: EntityType::Host, .. })
        );

        registry.deregister_host(host.uuid().as_str()).unwrap();
        registry.deregister_cluster(cluster.uuid().as_str()).unwrap();
        registry.deregister_pod(pod.uuid().as_str()).unwrap();
        let zone = registry.deregister_zone("Z1").unwrap();

        assert_eq!(zone.current_state(), LifecycleState::Zone(AllocationState::Destroyed));
        assert!(registry.list_zones().is_empty());
        assert!(registry.is_empty());
        // history is kept
        assert!(registry.get_zone("Z1").unwrap().is_retired());
    }

    #[test]
    fn test_deregister_requires_terminal_edge() {
        let registry = registry();
        zone(&registry, "Z1");
        registry.change_state(EntityType::Zone, "Z1", "Enabled").unwrap();
        assert_matches!(
            registry.deregister_zone("Z1"),
            Err(Error::InvalidTransition { .. })
        );
        registry.change_state(EntityType::Zone, "Z1", "Disabled").unwrap();
        registry.deregister_zone("Z1").unwrap();
    }

    #[test]
    fn test_retired_entity_is_read_only() {
        let registry = registry();
        zone(&registry, "Z1");
        registry.deregister_zone("Z1").unwrap();

        assert_matches!(
            registry.add_detail(EntityType::Zone, "Z1", "k", "v"),
            Err(Error::Retired { .. })
        );
        assert_matches!(
            registry.change_state(EntityType::Zone, "Z1", "Enabled"),
            Err(Error::Retired { .. })
        );
        assert_matches!(registry.deregister_zone("Z1"), Err(Error::Retired { .. }));
        assert!(registry.get_zone("Z1").unwrap().applicable_actions().is_empty());
    }

    #[test]
    fn test_change_state_to_terminal_takes_deregistration_path() {
        let registry = registry();
        let (_, pod, _, _) = hierarchy(&registry);
        assert_matches!(
            registry.change_state(EntityType::Pod, pod.uuid().as_str(), "Destroyed"),
            Err(Error::HasDependents { .. })
        );
    }

    #[test]
    fn test_detail_operations() {
        let registry = registry();
        zone(&registry, "Z1");

        let entity = registry.add_detail(EntityType::Zone, "Z1", "k", "v").unwrap();
        assert!(entity.details().contains("k", "v"));

        let entity = registry.del_detail(EntityType::Zone, "Z1", "k", "v").unwrap();
        assert!(entity.details().get("k").is_none());

        assert_matches!(
            registry.del_detail(EntityType::Zone, "Z1", "k", "v"),
            Err(Error::DetailNotFound { .. })
        );
        assert_matches!(
            registry.update_detail(EntityType::Zone, "Z1", "missing", "v"),
            Err(Error::DetailNotFound { .. })
        );

        registry.add_detail(EntityType::Zone, "Z1", "region", "eu").unwrap();
        let entity = registry.update_detail(EntityType::Zone, "Z1", "region", "ap").unwrap();
        assert_eq!(entity.details().get("region").unwrap().len(), 1);
        assert!(entity.details().contains("region", "ap"));
    }

    #[test]
    fn test_add_existing_detail_does_not_touch() {
        let registry = registry();
        let created = zone(&registry, "Z1");
        let after = registry.add_detail(EntityType::Zone, "Z1", "region", "us").unwrap();
        assert_eq!(after.last_updated_time(), created.last_updated_time());
        assert_eq!(registry.stats().detail_updates, 0);
    }

    #[test]
    fn test_compare_and_set_state() {
        let registry = registry();
        zone(&registry, "Z1");
        let disabled = LifecycleState::Zone(AllocationState::Disabled);
        let enabled = LifecycleState::Zone(AllocationState::Enabled);

        registry.compare_and_set_state("Z1", disabled, enabled).unwrap();
        let err = registry.compare_and_set_state("Z1", disabled, enabled).unwrap_err();
        assert_matches!(err, Error::ConcurrentModification { .. });
        assert!(err.is_retryable());
        assert_eq!(registry.stats().cas_conflicts, 1);
    }

    #[test]
    fn test_version_guarded_transition() {
        let registry = registry();
        let created = zone(&registry, "Z1");
        registry.add_detail(EntityType::Zone, "Z1", "rack", "r1").unwrap();

        let stale = TransitionRequest::new("Z1", LifecycleState::Zone(AllocationState::Enabled))
            .at_version(created.version());
        assert_matches!(
            registry.transition(stale),
            Err(Error::ConcurrentModification { .. })
        );
    }

    #[test]
    fn test_concurrent_cas_exactly_one_wins() {
        let registry = registry();
        zone(&registry, "Z1");
        let disabled = LifecycleState::Zone(AllocationState::Disabled);
        let enabled = LifecycleState::Zone(AllocationState::Enabled);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.compare_and_set_state("Z1", disabled, enabled))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_matches!(result, Err(Error::ConcurrentModification { .. }));
        }
        assert_eq!(registry.get_zone("Z1").unwrap().history().len(), 2);
    }

    #[test]
    fn test_concurrent_registration_keeps_uuids_unique() {
        let registry = registry();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    // half the threads race for the same uuid
                    let uuid = if i % 2 == 0 { "shared".to_string() } else { format!("zone-{}", i) };
                    registry.register_zone(ZoneRegistration::new(uuid, "ops"))
                })
            })
            .collect();
        let ok = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        assert_eq!(ok, 5);
        let zones = registry.list_zones();
        let mut uuids: Vec<_> = zones.iter().map(|z| z.uuid().clone()).collect();
        uuids.sort();
        uuids.dedup();
        assert_eq!(uuids.len(), zones.len());
    }

    #[test]
    fn test_concurrent_child_registration_and_parent_retirement() {
        for _ in 0..20 {
            let registry = registry();
            let zone = zone(&registry, "Z1");

            let registering = {
                let registry = registry.clone();
                let zone_id = zone.id();
                thread::spawn(move || {
                    registry.register_pod(PodRegistration::new(
                        "pod1", zone_id, "10.0.0.1", "10.0.0.0/24", "10.0.0.10", "10.0.0.20",
                    ))
                })
            };
            let retiring = {
                let registry = registry.clone();
                thread::spawn(move || registry.deregister_zone("Z1"))
            };

            let pod = registering.join().unwrap();
            let retired = retiring.join().unwrap();

            // never both: a live pod under a destroyed zone
            assert!(pod.is_ok() != retired.is_ok());
        }
    }

    #[test]
    fn test_list_is_creation_ordered() {
        let registry = registry();
        for uuid in ["c", "a", "b"] {
            zone(&registry, uuid);
        }
        let uuids: Vec<_> = registry
            .list_zones()
            .iter()
            .map(|z| z.uuid().to_string())
            .collect();
        assert_eq!(uuids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_perform_rechecks_guard() {
        let registry = registry();
        zone(&registry, "Z1");

        let enable = Action::parse(EntityType::Zone, "enable").unwrap();
        let zone = registry.perform(EntityType::Zone, "Z1", enable).unwrap();
        assert_eq!(zone.current_state().name(), "Enabled");

        assert_matches!(
            registry.perform(EntityType::Zone, "Z1", enable),
            Err(Error::InvalidTransition { .. })
        );
        let add_pod = Action::parse(EntityType::Zone, "add_pod").unwrap();
        assert_matches!(
            registry.perform(EntityType::Zone, "Z1", add_pod),
            Err(Error::InvalidArgument(_))
        );
    }

    #[test]
    fn test_reconcile_walks_toward_desired_state() {
        let registry = registry();
        let (_, _, _, host) = hierarchy(&registry);
        let uuid = host.uuid().as_str();

        assert_eq!(registry.reconcile(EntityType::Host, uuid).unwrap(), ReconcileOutcome::NoTarget);

        registry.set_desired_state(EntityType::Host, uuid, "Maintenance").unwrap();
        assert_eq!(registry.pending_reconciliation().len(), 1);

        let first = registry.reconcile(EntityType::Host, uuid).unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::Stepped {
                from: LifecycleState::Host(HostState::Creating),
                to: LifecycleState::Host(HostState::Enabled),
                converged: false,
            }
        );

        let steps = registry.reconcile_until_converged(EntityType::Host, uuid).unwrap();
        assert_eq!(steps, 2);
        assert_eq!(
            registry.get(EntityType::Host, uuid).unwrap().current_state(),
            LifecycleState::Host(HostState::Maintenance)
        );
        assert!(registry.pending_reconciliation().is_empty());
        assert_eq!(registry.reconcile(EntityType::Host, uuid).unwrap(), ReconcileOutcome::Converged);
    }

    #[test]
    fn test_reconcile_all() {
        let registry = registry();
        zone(&registry, "Z1");
        zone(&registry, "Z2");
        registry.set_desired_state(EntityType::Zone, "Z1", "Enabled").unwrap();
        registry.set_desired_state(EntityType::Zone, "Z2", "Destroyed").unwrap();

        let report = registry.reconcile_all();
        assert_eq!(report.steps, 2);
        assert_eq!(report.converged.len(), 2);
        assert!(report.failed.is_empty());
        assert!(registry.get_zone("Z2").unwrap().is_retired());
    }

    #[test]
    fn test_stats_and_events() {
        let registry = registry();
        let mut events = registry.subscribe();

        zone(&registry, "Z1");
        registry.change_state(EntityType::Zone, "Z1", "Enabled").unwrap();
        let _ = registry.change_state(EntityType::Zone, "Z1", "Destroyed");

        let stats = registry.stats();
        assert_eq!(stats.registrations, 1);
        assert_eq!(stats.transitions, 1);
        assert_eq!(stats.rejected_transitions, 1);
        assert_eq!(stats.live_count(EntityType::Zone), 1);

        assert_matches!(events.try_recv(), Ok(RegistryEvent::EntityRegistered { .. }));
        assert_matches!(
            events.try_recv(),
            Ok(RegistryEvent::StateChanged { ref to, .. }) if to == "Enabled"
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_provisioning_service_port() {
        let registry = registry();
        let service: Arc<dyn ProvisioningService> = registry.clone();
        let mut watch = service.watch();

        let zone = service
            .register_zone(ZoneRegistration::new("Z1", "alice"))
            .await
            .unwrap();
        service
            .register_pod(pod_request(&zone, "pod1", "10.0.0.10", "10.0.0.20"))
            .await
            .unwrap();
        service.change_state(EntityType::Zone, "Z1", "Enabled").await.unwrap();

        assert_eq!(service.list(EntityType::Pod).await.unwrap().len(), 1);
        assert_eq!(service.get_zone("Z1").await.unwrap().current_state().name(), "Enabled");

        let first = watch.next().await.unwrap();
        assert_eq!(first.uuid(), "Z1");
        assert!(first.is_lifecycle_event());
        assert_eq!(watch.next().await.unwrap().entity_type(), EntityType::Pod);
    }

    #[test]
    fn test_service_port_blocking_caller() {
        let registry = registry();
        let service: Arc<dyn ProvisioningService> = registry;
        let zone = tokio_test::block_on(service.register_zone(ZoneRegistration::new("Z1", "alice"))).unwrap();
        assert_eq!(zone.uuid().as_str(), "Z1");
        assert_matches!(
            tokio_test::block_on(service.deregister(EntityType::Pod, "Z1")),
            Err(Error::NotFound { .. })
        );
    }
}
