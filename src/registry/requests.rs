//! Registration Requests
//!
//! Caller-supplied parameters for the `register_*` operations. Parent
//! references are internal [`EntityId`]s of already registered entities.

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Register a zone under a caller-chosen uuid
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRegistration {
    pub uuid: String,
    /// Defaults to the uuid
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ZoneRegistration {
    pub fn new(uuid: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Register a pod with its management network inside a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRegistration {
    pub name: String,
    pub zone_id: EntityId,
    pub gateway: String,
    pub cidr: String,
    pub start_ip: String,
    pub end_ip: String,
    /// Generated when absent
    #[serde(default)]
    pub uuid: Option<String>,
    /// Inherited from the zone when absent
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl PodRegistration {
    pub fn new(
        name: impl Into<String>,
        zone_id: EntityId,
        gateway: impl Into<String>,
        cidr: impl Into<String>,
        start_ip: impl Into<String>,
        end_ip: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            zone_id,
            gateway: gateway.into(),
            cidr: cidr.into(),
            start_ip: start_ip.into(),
            end_ip: end_ip.into(),
            uuid: None,
            owner: None,
            tags: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }
}

/// Register a cluster inside a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRegistration {
    pub name: String,
    pub pod_id: EntityId,
    #[serde(default)]
    pub hypervisor: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ClusterRegistration {
    pub fn new(name: impl Into<String>, pod_id: EntityId) -> Self {
        Self {
            name: name.into(),
            pod_id,
            hypervisor: None,
            uuid: None,
            owner: None,
            tags: Vec::new(),
            details: BTreeMap::new(),
        }
    }
}

/// Register a host inside a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRegistration {
    pub name: String,
    pub cluster_id: EntityId,
    /// Management address
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl HostRegistration {
    pub fn new(name: impl Into<String>, cluster_id: EntityId) -> Self {
        Self {
            name: name.into(),
            cluster_id,
            address: None,
            uuid: None,
            owner: None,
            tags: Vec::new(),
            details: BTreeMap::new(),
        }
    }
}

/// Register a storage pool in a zone, optionally narrowed to a pod or cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRegistration {
    pub name: String,
    pub zone_id: EntityId,
    #[serde(default)]
    pub pod_id: Option<EntityId>,
    #[serde(default)]
    pub cluster_id: Option<EntityId>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl StorageRegistration {
    pub fn new(name: impl Into<String>, zone_id: EntityId) -> Self {
        Self {
            name: name.into(),
            zone_id,
            pod_id: None,
            cluster_id: None,
            capacity_bytes: None,
            uuid: None,
            owner: None,
            tags: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    /// Narrow the pool to a pod
    pub fn in_pod(mut self, pod_id: EntityId) -> Self {
        self.pod_id = Some(pod_id);
        self
    }

    /// Narrow the pool to a cluster
    pub fn in_cluster(mut self, cluster_id: EntityId) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }
}
