//! Demonstration binary: wires the power-monitor core to fake hardware
//! collaborators and runs the collection loop until interrupted.
//!
//! A real deployment would implement [`power_monitor::CpuEnergySource`],
//! [`power_monitor::GpuTelemetrySource`] and [`power_monitor::ResourceInformer`]
//! against RAPL/powercap, NVML, and `/proc` with dedicated driver crates. None
//! of that is in scope here (§1 of the core's contract), so this binary uses
//! the same fakes the core's own integration tests use.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use env_logger::Env;
use power_monitor::test_support::{FakeCpuEnergySource, FakeGpuTelemetrySource, FakeResourceInformer};
use power_monitor::{Collector, CollectorConfig, SnapshotPublisher, TrackerConfig};
use tokio_util::sync::CancellationToken;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting power-monitor agent v{VERSION}");

    let cpu = FakeCpuEnergySource::with_package_zone(0);
    let gpu = FakeGpuTelemetrySource::with_device(0, 0, 50_000_000);
    let mut informer = FakeResourceInformer::with_processes(vec![("demo", 100)]);
    informer.set_usage_ratio(0.6);

    let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
    let mut reader = publisher.subscribe();

    let cancel = CancellationToken::new();
    let collector = Collector::new(
        cpu,
        gpu,
        informer,
        publisher.clone(),
        CollectorConfig {
            tick_interval: Duration::from_secs(1),
            source_timeout: Duration::from_millis(500),
        },
        TrackerConfig::default(),
    );

    let loop_cancel = cancel.clone();
    let loop_handle = tokio::spawn(collector.run(loop_cancel));

    let printer_cancel = cancel.clone();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = printer_cancel.cancelled() => break,
                changed = reader.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = reader.borrow().clone();
                    log::info!(
                        "snapshot at {:?}: {} processes, node active power {} uW",
                        snapshot.timestamp,
                        snapshot.processes.len(),
                        snapshot.node.zones.values().map(|z| z.active_power_uw).sum::<u64>(),
                    );
                }
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    log::info!("shutdown signal received");
    cancel.cancel();
    loop_handle.await.context("collection loop task panicked")?;
    printer.await.context("snapshot printer task panicked")?;

    Ok(())
}
