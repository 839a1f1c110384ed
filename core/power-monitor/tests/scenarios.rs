//! End-to-end scenarios driven through the collector's public surface,
//! exercising the full tick pipeline (informer refresh, source reads,
//! attribution, terminated tracking, publication) rather than any one
//! module in isolation.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use power_monitor::test_support::{FakeCpuEnergySource, FakeGpuTelemetrySource, FakeResourceInformer};
use power_monitor::{Collector, CollectorConfig, SnapshotPublisher, TrackerConfig};

const TIMEOUT: Duration = Duration::from_secs(1);

fn config() -> CollectorConfig {
    CollectorConfig {
        tick_interval: Duration::from_millis(10),
        source_timeout: TIMEOUT,
    }
}

#[tokio::test]
async fn s1_conservation_under_uniform_load() {
    let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
    let cpu = FakeCpuEnergySource::with_package_zone(1000);
    let gpu = FakeGpuTelemetrySource::empty();
    let mut informer = FakeResourceInformer::with_processes(vec![("p1", 50), ("p2", 50)]);
    informer.set_usage_ratio(1.0);

    let mut collector = Collector::new(cpu, gpu, informer, publisher.clone(), config(), TrackerConfig::default());
    collector.tick().await.unwrap();

    let snapshot = publisher.current();
    let package = snapshot.node.zones.keys().next().unwrap().clone();
    assert_eq!(snapshot.node.zones[&package].active_energy_uj, 1000);
    assert_eq!(snapshot.node.zones[&package].idle_energy_uj, 0);
    assert_eq!(snapshot.processes["p1"].zones[&package].energy_total_uj, 500);
    assert_eq!(snapshot.processes["p2"].zones[&package].energy_total_uj, 500);
}

#[tokio::test]
async fn s2_idle_split() {
    let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
    let cpu = FakeCpuEnergySource::with_package_zone(1000);
    let gpu = FakeGpuTelemetrySource::empty();
    let mut informer = FakeResourceInformer::with_processes(vec![("p1", 50), ("p2", 50)]);
    informer.set_usage_ratio(0.4);

    let mut collector = Collector::new(cpu, gpu, informer, publisher.clone(), config(), TrackerConfig::default());
    collector.tick().await.unwrap();

    let snapshot = publisher.current();
    let package = snapshot.node.zones.keys().next().unwrap().clone();
    assert_eq!(snapshot.node.zones[&package].active_energy_uj, 400);
    assert_eq!(snapshot.node.zones[&package].idle_energy_uj, 600);
    assert_eq!(snapshot.processes["p1"].zones[&package].energy_total_uj, 200);
    assert_eq!(snapshot.processes["p2"].zones[&package].energy_total_uj, 200);
}

#[tokio::test]
async fn s3_gpu_ratio_sums_exactly_to_node_power() {
    let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
    let cpu = FakeCpuEnergySource::with_package_zone(0);
    let mut gpu = FakeGpuTelemetrySource::with_device(0, 0, 150_000_000);
    gpu.set_process_utilization("p1", 0, 30);
    gpu.set_process_utilization("p2", 0, 50);
    gpu.set_process_utilization("p3", 0, 20);
    let informer = FakeResourceInformer::with_processes(vec![("p1", 0), ("p2", 0), ("p3", 0)]);

    let mut collector = Collector::new(cpu, gpu, informer, publisher.clone(), config(), TrackerConfig::default());
    collector.tick().await.unwrap();

    let snapshot = publisher.current();
    assert_eq!(snapshot.processes["p1"].gpus[&0].power_uw, 45_000_000);
    assert_eq!(snapshot.processes["p2"].gpus[&0].power_uw, 75_000_000);
    assert_eq!(snapshot.processes["p3"].gpus[&0].power_uw, 30_000_000);

    let attributed: u64 = snapshot.processes.values().filter_map(|w| w.gpus.get(&0)).map(|u| u.power_uw).sum();
    assert_eq!(attributed, snapshot.node.gpus[&0].power_uw);
}

#[tokio::test]
async fn s6_terminated_process_retained_then_cleared_after_export() {
    let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
    let cpu = FakeCpuEnergySource::with_package_zone(1_000_000);
    let gpu = FakeGpuTelemetrySource::empty();
    let informer = FakeResourceInformer::with_processes(vec![("p", 100)]);

    let mut collector = Collector::new(
        cpu,
        gpu,
        informer,
        publisher.clone(),
        config(),
        TrackerConfig {
            max_terminated: 500,
            min_energy_threshold: 0,
        },
    );

    collector.tick().await.unwrap(); // T: p is alive
    assert!(publisher.current().processes.contains_key("p"));
    assert!(publisher.current().terminated_processes.is_empty());

    // between T and T+1, p disappears.
    collector_informer_mut(&mut collector).terminate("p");
    collector.tick().await.unwrap(); // T+1

    let snapshot = publisher.current();
    assert!(!snapshot.processes.contains_key("p"));
    let terminated = snapshot.terminated_processes.iter().find(|w| w.id == "p");
    assert!(terminated.is_some(), "p should appear in TerminatedProcesses at T+1");
    assert!(terminated.unwrap().total_energy_uj() > 0, "p should keep its last-seen energy");

    publisher.mark_exported();
    collector.tick().await.unwrap(); // T+2: the tracker clears at the start of this tick

    let snapshot = publisher.current();
    assert!(
        snapshot.terminated_processes.iter().all(|w| w.id != "p"),
        "p must not appear again after MarkExported"
    );
}

/// The collector's collaborators are private; this test needs direct access
/// to queue a termination on the fake informer mid-test, which the public
/// collector API deliberately does not expose (a real informer's state lives
/// entirely on the other side of the trait).
fn collector_informer_mut<'a>(
    collector: &'a mut Collector<FakeCpuEnergySource, FakeGpuTelemetrySource, FakeResourceInformer>,
) -> std::sync::MutexGuard<'a, FakeResourceInformer> {
    collector.informer_handle().lock().unwrap()
}
