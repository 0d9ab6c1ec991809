//! Configuration
//!
//! Registry tuning plus the topology file format used to seed a registry with
//! a zone hierarchy. Topology files are YAML or JSON; children are nested
//! under their parents so no internal ids are needed.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// =============================================================================
// Registry Configuration
// =============================================================================

/// Configuration for the provisioning registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

// =============================================================================
// Topology
// =============================================================================

/// A zone hierarchy to register
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub zones: Vec<ZoneSpec>,
}

/// Attributes shared by every topology entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    /// Reconciliation target applied after registration
    #[serde(default)]
    pub desired_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSpec {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub pods: Vec<PodSpec>,
    #[serde(default)]
    pub storage: Vec<StorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    pub gateway: String,
    pub cidr: String,
    pub start_ip: String,
    pub end_ip: String,
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub storage: Vec<StorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub hypervisor: Option<String>,
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
    #[serde(default)]
    pub storage: Vec<StorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl TopologyConfig {
    /// Load a topology from a `.yaml`/`.yml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            other => Err(Error::Configuration(format!(
                "unsupported topology file extension: {:?}",
                other
            ))),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// JSON Schema describing the topology file
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(TopologyConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    /// Number of entities the topology describes
    pub fn entity_count(&self) -> usize {
        let storage = |specs: &[StorageSpec]| specs.len();
        self.zones
            .iter()
            .map(|zone| {
                1 + storage(&zone.storage)
                    + zone
                        .pods
                        .iter()
                        .map(|pod| {
                            1 + storage(&pod.storage)
                                + pod
                                    .clusters
                                    .iter()
                                    .map(|cluster| 1 + cluster.hosts.len() + storage(&cluster.storage))
                                    .sum::<usize>()
                        })
                        .sum::<usize>()
            })
            .sum()
    }
}
