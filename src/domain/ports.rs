//! Domain Ports - Boundaries toward external collaborators
//!
//! A transport layer maps the read-only accessors of [`ManagedEntity`] to
//! idempotent retrieval requests and the mutating calls of
//! [`ProvisioningService`] to state-changing requests. Neither mapping lives
//! in this crate.

use crate::actions::Action;
use crate::entity::{Details, Entity, EntityId, EntityType};
use crate::error::Result;
use crate::registry::{
    ClusterRegistration, HostRegistration, PodRegistration, RegistryEvent, StorageRegistration,
    ZoneRegistration,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

// =============================================================================
// Entity Accessors Port
// =============================================================================

/// Read-only view every managed resource exposes
pub trait ManagedEntity {
    /// Caller-facing identity
    fn uuid(&self) -> &str;

    /// Internal identity
    fn id(&self) -> EntityId;

    fn current_state(&self) -> String;

    fn desired_state(&self) -> Option<String>;

    fn created_time(&self) -> DateTime<Utc>;

    fn last_updated_time(&self) -> DateTime<Utc>;

    /// Identifier of the owning principal
    fn owner(&self) -> Option<&str>;

    fn details(&self) -> &Details;

    /// Operations legal in the current state
    fn applicable_actions(&self) -> Vec<Action>;
}

// =============================================================================
// Provisioning Service Port
// =============================================================================

/// Registry operations offered to a transport collaborator
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    async fn register_zone(&self, request: ZoneRegistration) -> Result<Entity>;

    async fn register_pod(&self, request: PodRegistration) -> Result<Entity>;

    async fn register_cluster(&self, request: ClusterRegistration) -> Result<Entity>;

    async fn register_host(&self, request: HostRegistration) -> Result<Entity>;

    async fn register_storage(&self, request: StorageRegistration) -> Result<Entity>;

    /// Retire an entity; the record stays readable
    async fn deregister(&self, entity_type: EntityType, uuid: &str) -> Result<Entity>;

    /// Move an entity to the named state of its type's graph
    async fn change_state(&self, entity_type: EntityType, uuid: &str, state: &str) -> Result<Entity>;

    async fn get(&self, entity_type: EntityType, uuid: &str) -> Result<Entity>;

    async fn get_zone(&self, uuid: &str) -> Result<Entity>;

    /// Live entities of a type, in creation order
    async fn list(&self, entity_type: EntityType) -> Result<Vec<Entity>>;

    async fn add_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity>;

    async fn update_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity>;

    async fn del_detail(&self, entity_type: EntityType, uuid: &str, name: &str, value: &str) -> Result<Entity>;

    /// Stream of registry events from now on
    fn watch(&self) -> BoxStream<'static, RegistryEvent>;
}
