//! Benchmark for the provisioning registry
//!
//! Registration throughput plus state transitions under contention

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dc_provisioner::{
    ClusterRegistration, EntityType, HostRegistration, PodRegistration, ProvisioningRegistry,
    RegistryConfig, ZoneRegistration,
};
use std::sync::Arc;

/// One zone, pod and cluster ready to receive hosts
fn seeded_registry() -> (Arc<ProvisioningRegistry>, dc_provisioner::EntityId) {
    let registry = ProvisioningRegistry::new(RegistryConfig::default());
    let zone = registry
        .register_zone(ZoneRegistration::new("bench-zone", "bench"))
        .unwrap();
    let pod = registry
        .register_pod(PodRegistration::new(
            "bench-pod",
            zone.id(),
            "10.0.0.1",
            "10.0.0.0/16",
            "10.0.1.0",
            "10.0.255.254",
        ))
        .unwrap();
    let cluster = registry
        .register_cluster(ClusterRegistration::new("bench-cluster", pod.id()))
        .unwrap();
    (registry, cluster.id())
}

fn bench_register_hosts(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioning_registry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("register_host", |b| {
        let (registry, cluster_id) = seeded_registry();
        let mut counter = 0u64;

        b.iter(|| {
            counter += 1;
            let request = HostRegistration::new(format!("host-{}", counter), cluster_id);
            let _ = registry.register_host(black_box(request));
        });
    });

    group.finish();
}

fn bench_toggle_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioning_registry");
    group.throughput(Throughput::Elements(1));

    // Pre-register hosts
    let (registry, cluster_id) = seeded_registry();
    let uuids: Vec<String> = (0..1000)
        .map(|i| {
            let host = registry
                .register_host(HostRegistration::new(format!("host-{:04}", i), cluster_id))
                .unwrap();
            registry
                .change_state(EntityType::Host, host.uuid().as_str(), "Enabled")
                .unwrap();
            host.uuid().to_string()
        })
        .collect();

    group.bench_function("enable_disable", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            let uuid = &uuids[counter % uuids.len()];
            let _ = registry.change_state(EntityType::Host, black_box(uuid), "Disabled");
            let _ = registry.change_state(EntityType::Host, black_box(uuid), "Enabled");
        });
    });

    group.finish();
}

fn bench_concurrent_details(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioning_registry");
    group.throughput(Throughput::Elements(100));

    // Pre-register hosts
    let (registry, cluster_id) = seeded_registry();
    let uuids: Arc<Vec<String>> = Arc::new(
        (0..1000)
            .map(|i| {
                registry
                    .register_host(HostRegistration::new(format!("host-{:04}", i), cluster_id))
                    .unwrap()
                    .uuid()
                    .to_string()
            })
            .collect(),
    );

    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("concurrent_100_detail_updates", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for i in 0..100 {
                    let reg = registry.clone();
                    let uuids = uuids.clone();
                    handles.push(tokio::spawn(async move {
                        let uuid = &uuids[i % uuids.len()];
                        let _ = reg.add_detail(EntityType::Host, uuid, "rack", &format!("r{}", i));
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_register_hosts,
    bench_toggle_state,
    bench_concurrent_details
);
criterion_main!(benches);
