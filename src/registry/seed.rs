//! Topology Seeding
//!
//! Registers a [`TopologyConfig`] hierarchy parent-first and records the
//! desired states it declares. Stops at the first failure; entities
//! registered before it stay in the registry.

use super::provisioning::ProvisioningRegistry;
use super::requests::{
    ClusterRegistration, HostRegistration, PodRegistration, StorageRegistration, ZoneRegistration,
};
use crate::config::{EntityMeta, StorageSpec, TopologyConfig};
use crate::entity::{Entity, EntityId, EntityType};
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What a topology seeding registered
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopologyReport {
    /// Registered entities per type
    pub registered: BTreeMap<EntityType, usize>,
    /// Desired states recorded
    pub desired: usize,
}

impl TopologyReport {
    pub fn total(&self) -> usize {
        self.registered.values().sum()
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.registered.get(&entity_type).copied().unwrap_or(0)
    }
}

/// Where a storage entry sits in the topology
#[derive(Clone, Copy)]
enum StorageScope {
    Zone,
    Pod(EntityId),
    Cluster(EntityId),
}

impl ProvisioningRegistry {
    /// Register every entity of `topology`, parents before children
    pub fn apply_topology(&self, topology: &TopologyConfig) -> Result<TopologyReport> {
        let mut report = TopologyReport::default();

        for zone_spec in &topology.zones {
            let zone = self.register_zone(ZoneRegistration {
                uuid: zone_spec.uuid.clone(),
                name: zone_spec.name.clone(),
                owner: zone_spec.meta.owner.clone(),
                tags: zone_spec.meta.tags.clone(),
                details: zone_spec.meta.details.clone(),
            })?;
            self.seeded(&zone, &zone_spec.meta, &mut report)?;
            self.seed_storage(&zone, StorageScope::Zone, &zone_spec.storage, &mut report)?;

            for pod_spec in &zone_spec.pods {
                let pod = self.register_pod(PodRegistration {
                    uuid: pod_spec.uuid.clone(),
                    owner: pod_spec.meta.owner.clone(),
                    tags: pod_spec.meta.tags.clone(),
                    details: pod_spec.meta.details.clone(),
                    ..PodRegistration::new(
                        &pod_spec.name,
                        zone.id(),
                        &pod_spec.gateway,
                        &pod_spec.cidr,
                        &pod_spec.start_ip,
                        &pod_spec.end_ip,
                    )
                })?;
                self.seeded(&pod, &pod_spec.meta, &mut report)?;
                self.seed_storage(&zone, StorageScope::Pod(pod.id()), &pod_spec.storage, &mut report)?;

                for cluster_spec in &pod_spec.clusters {
                    let cluster = self.register_cluster(ClusterRegistration {
                        hypervisor: cluster_spec.hypervisor.clone(),
                        uuid: cluster_spec.uuid.clone(),
                        owner: cluster_spec.meta.owner.clone(),
                        tags: cluster_spec.meta.tags.clone(),
                        details: cluster_spec.meta.details.clone(),
                        ..ClusterRegistration::new(&cluster_spec.name, pod.id())
                    })?;
                    self.seeded(&cluster, &cluster_spec.meta, &mut report)?;

                    for host_spec in &cluster_spec.hosts {
                        let host = self.register_host(HostRegistration {
                            address: host_spec.address.clone(),
                            uuid: host_spec.uuid.clone(),
                            owner: host_spec.meta.owner.clone(),
                            tags: host_spec.meta.tags.clone(),
                            details: host_spec.meta.details.clone(),
                            ..HostRegistration::new(&host_spec.name, cluster.id())
                        })?;
                        self.seeded(&host, &host_spec.meta, &mut report)?;
                    }

                    self.seed_storage(
                        &zone,
                        StorageScope::Cluster(cluster.id()),
                        &cluster_spec.storage,
                        &mut report,
                    )?;
                }
            }
        }

        info!(
            entities = report.total(),
            desired = report.desired,
            "Topology applied"
        );
        Ok(report)
    }

    fn seed_storage(
        &self,
        zone: &Entity,
        scope: StorageScope,
        specs: &[StorageSpec],
        report: &mut TopologyReport,
    ) -> Result<()> {
        for spec in specs {
            let request = StorageRegistration {
                capacity_bytes: spec.capacity_bytes,
                uuid: spec.uuid.clone(),
                owner: spec.meta.owner.clone(),
                tags: spec.meta.tags.clone(),
                details: spec.meta.details.clone(),
                ..StorageRegistration::new(&spec.name, zone.id())
            };
            let request = match scope {
                StorageScope::Zone => request,
                StorageScope::Pod(pod_id) => request.in_pod(pod_id),
                StorageScope::Cluster(cluster_id) => request.in_cluster(cluster_id),
            };
            let storage = self.register_storage(request)?;
            self.seeded(&storage, &spec.meta, report)?;
        }
        Ok(())
    }

    fn seeded(&self, entity: &Entity, meta: &EntityMeta, report: &mut TopologyReport) -> Result<()> {
        *report.registered.entry(entity.entity_type()).or_default() += 1;

        if let Some(desired) = &meta.desired_state {
            self.set_desired_state(entity.entity_type(), entity.uuid().as_str(), desired)?;
            report.desired += 1;
            debug!(uuid = %entity.uuid(), desired = %desired, "Desired state recorded");
        }
        Ok(())
    }
}
