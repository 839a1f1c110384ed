//! The collection loop (§4.4, §5).
//!
//! One task owns this loop; it is the sole writer of the publisher and the
//! terminated trackers. Every suspension point — the tick wait, each source
//! read, the publisher swap — is explicit, and the loop never holds a lock
//! across a source read: hardware reads run inside `spawn_blocking`, each
//! bounded by its own timeout, so a slow or hanging driver can never stall
//! the whole async runtime.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::attribution::{compute_snapshot, GpuReading};
use crate::config::{CollectorConfig, TrackerConfig};
use crate::error::TickError;
use crate::model::{Snapshot, Zone};
use crate::publisher::SnapshotPublisher;
use crate::sources::{CpuEnergySource, GpuTelemetrySource, NodeCpuView, ResourceInformer, RunningProcess};
use crate::terminated::{Retention, TerminatedTrackers};

/// Mirrors the state machine of §4.4. Exposed so embedders can observe it
/// (e.g. for a liveness probe); the loop itself never reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    FirstRead,
    Steady,
    Stopped,
}

/// Drives the collection loop over three opaque collaborators (§6). Generic
/// so tests can substitute fakes without dynamic dispatch; a binary wiring
/// real hardware sources pays the same cost either way since each is called
/// at most once per tick.
pub struct Collector<C, G, R> {
    cpu: Arc<Mutex<C>>,
    gpu: Arc<Mutex<G>>,
    informer: Arc<Mutex<R>>,
    publisher: Arc<SnapshotPublisher>,
    terminated: TerminatedTrackers,
    config: CollectorConfig,
    prev: Option<Arc<Snapshot>>,
    state: LoopState,
}

impl<C, G, R> Collector<C, G, R>
where
    C: CpuEnergySource + 'static,
    G: GpuTelemetrySource + 'static,
    R: ResourceInformer + 'static,
{
    pub fn new(cpu: C, gpu: G, informer: R, publisher: Arc<SnapshotPublisher>, config: CollectorConfig, tracker_config: TrackerConfig) -> Self {
        let terminated = TerminatedTrackers::new(
            Retention::from_max_terminated(tracker_config.max_terminated),
            tracker_config.min_energy_threshold,
        );
        Self {
            cpu: Arc::new(Mutex::new(cpu)),
            gpu: Arc::new(Mutex::new(gpu)),
            informer: Arc::new(Mutex::new(informer)),
            publisher,
            terminated,
            config,
            prev: None,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Exposes the informer collaborator directly. Only meant for tests that
    /// need to mutate a fake informer's state mid-scenario (e.g. queuing a
    /// termination between ticks); a real collaborator's state lives on the
    /// other side of the trait and has no equivalent need for this.
    #[cfg(any(test, feature = "test"))]
    pub fn informer_handle(&self) -> Arc<Mutex<R>> {
        self.informer.clone()
    }

    /// Exposes the CPU energy collaborator directly. Only meant for tests
    /// that need to queue a fake zone-read failure mid-scenario (e.g.
    /// `FakeCpuEnergySource::fail_next_read`), the same way `informer_handle`
    /// does for the resource informer.
    #[cfg(any(test, feature = "test"))]
    pub fn cpu_handle(&self) -> Arc<Mutex<C>> {
        self.cpu.clone()
    }

    /// Runs the loop until `cancel` fires. On entry, performs the
    /// `FirstRead` tick (previous snapshot absent, `Δt = 0` semantics),
    /// then ticks on a fixed interval until cancellation (§4.4).
    pub async fn run(mut self, cancel: CancellationToken) {
        self.state = LoopState::FirstRead;
        log::info!("collection loop: performing first read");
        if let Err(e) = self.tick().await {
            log::error!("collection loop: first read failed: {e:#}");
        }

        self.state = LoopState::Steady;
        log::info!("collection loop: entering steady state with tick interval {:?}", self.config.tick_interval);

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // the first tick() above already covered t=0

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.state = LoopState::Stopped;
                    log::info!("collection loop: cancellation received, stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        log::error!("collection loop: tick aborted: {e:#}");
                    }
                }
            }
        }
    }

    /// Runs exactly one collection cycle: refresh, read, attribute, publish.
    /// A whole-source informer failure aborts the tick and leaves the
    /// previously published snapshot current (§7); partial per-zone/per-GPU
    /// failures are absorbed inside the source reads themselves.
    pub async fn tick(&mut self) -> Result<(), TickError> {
        if self.publisher.take_exported() {
            self.terminated.clear_all();
        }

        let (node_view, running, terminated_pids) = self.refresh_informer().await?;
        let cpu_readings = self.read_cpu_zones().await;
        let gpu_readings = self.read_gpus(&running).await;

        let now = SystemTime::now();
        let mut snapshot = compute_snapshot(self.prev.as_deref(), now, &cpu_readings, &gpu_readings, node_view, &running);

        self.track_terminations(&terminated_pids, &mut snapshot);

        self.publisher.publish(snapshot);
        self.prev = Some(self.publisher.current());
        Ok(())
    }

    /// Ingests workloads that vanished since the previous tick into the
    /// terminated trackers, then stamps the new snapshot's terminated
    /// vectors from what the trackers currently retain. Processes are
    /// identified explicitly by the informer; containers, pods and VMs have
    /// no such signal, so their termination is inferred by absence from the
    /// freshly-computed live maps.
    fn track_terminations(&mut self, terminated_pids: &[String], snapshot: &mut Snapshot) {
        if let Some(prev) = self.prev.clone() {
            for pid in terminated_pids {
                if let Some(w) = prev.processes.get(pid) {
                    self.terminated.processes.insert(w);
                }
            }
            for (id, w) in &prev.containers {
                if !snapshot.containers.contains_key(id) {
                    self.terminated.containers.insert(w);
                }
            }
            for (id, w) in &prev.pods {
                if !snapshot.pods.contains_key(id) {
                    self.terminated.pods.insert(w);
                }
            }
            for (id, w) in &prev.virtual_machines {
                if !snapshot.virtual_machines.contains_key(id) {
                    self.terminated.virtual_machines.insert(w);
                }
            }
        }

        snapshot.terminated_processes = self.terminated.processes.entries().to_vec();
        snapshot.terminated_containers = self.terminated.containers.entries().to_vec();
        snapshot.terminated_pods = self.terminated.pods.entries().to_vec();
        snapshot.terminated_virtual_machines = self.terminated.virtual_machines.entries().to_vec();
    }

    /// Whole-source read: a failure or timeout here aborts the whole tick (§7).
    async fn refresh_informer(&self) -> Result<(NodeCpuView, Vec<RunningProcess>, Vec<String>), TickError> {
        let informer = self.informer.clone();
        let task = tokio::task::spawn_blocking(move || -> anyhow::Result<(NodeCpuView, Vec<RunningProcess>, Vec<String>)> {
            let mut informer = informer.lock().unwrap();
            informer.refresh()?;
            let node = informer.node();
            let (running, terminated) = informer.processes();
            Ok((node, running, terminated))
        });

        match tokio::time::timeout(self.config.source_timeout, task).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(TickError::InformerUnavailable(e)),
            Ok(Err(join_err)) => Err(TickError::InformerUnavailable(anyhow::anyhow!(join_err))),
            Err(_) => Err(TickError::InformerTimeout(self.config.source_timeout)),
        }
    }

    /// Batched zone read. A single zone failing is a partial-source error:
    /// it is logged and simply absent from the returned readings; it never
    /// aborts the tick.
    async fn read_cpu_zones(&self) -> Vec<(Zone, u64)> {
        let cpu = self.cpu.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut cpu = cpu.lock().unwrap();
            let zones = cpu.zones().to_vec();
            let mut readings = Vec::with_capacity(zones.len());
            for zone in zones {
                match cpu.read_energy(&zone.id()) {
                    Ok(value) => readings.push((zone, value)),
                    Err(e) => log::warn!("cpu zone {} failed to read: {e:#}", zone.id()),
                }
            }
            readings
        });

        match tokio::time::timeout(self.config.source_timeout, task).await {
            Ok(Ok(readings)) => readings,
            Ok(Err(join_err)) => {
                log::warn!("cpu energy source panicked: {join_err}");
                Vec::new()
            }
            Err(_) => {
                log::warn!("cpu energy source timed out after {:?}", self.config.source_timeout);
                Vec::new()
            }
        }
    }

    /// Batched GPU read: device energy, instantaneous power, and per-process
    /// SM utilization for every currently-running process. Any individual
    /// method failing for one device is a partial-source error (§7).
    async fn read_gpus(&self, running: &[RunningProcess]) -> Vec<GpuReading> {
        let gpu = self.gpu.clone();
        let pids: Vec<String> = running.iter().map(|p| p.pid.clone()).collect();

        let task = tokio::task::spawn_blocking(move || {
            let mut gpu = gpu.lock().unwrap();
            let devices = gpu.devices().to_vec();
            let mut readings = Vec::with_capacity(devices.len());

            for device in devices {
                let energy_uj = match gpu.energy_uj(device.id) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        log::warn!("gpu {} energy read failed: {e:#}", device.id);
                        None
                    }
                };
                let device_power_uw = match gpu.device_power_uw(device.id) {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("gpu {} power read failed: {e:#}", device.id);
                        None
                    }
                };

                let mut process_utilization = Vec::new();
                for pid in &pids {
                    match gpu.process_utilization(pid, device.id) {
                        Ok(Some(util)) => process_utilization.push((pid.clone(), util)),
                        Ok(None) => {}
                        Err(e) => log::warn!("gpu {} process utilization for pid {pid} failed: {e:#}", device.id),
                    }
                }

                readings.push(GpuReading {
                    device,
                    energy_uj,
                    device_power_uw,
                    process_utilization,
                });
            }

            readings
        });

        match tokio::time::timeout(self.config.source_timeout, task).await {
            Ok(Ok(readings)) => readings,
            Ok(Err(join_err)) => {
                log::warn!("gpu telemetry source panicked: {join_err}");
                Vec::new()
            }
            Err(_) => {
                log::warn!("gpu telemetry source timed out after {:?}", self.config.source_timeout);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{FakeCpuEnergySource, FakeGpuTelemetrySource, FakeResourceInformer};

    fn fast_config() -> CollectorConfig {
        CollectorConfig {
            tick_interval: Duration::from_millis(10),
            source_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn first_tick_publishes_a_snapshot_with_zero_power() {
        let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
        let mut collector = Collector::new(
            FakeCpuEnergySource::with_package_zone(1_000_000),
            FakeGpuTelemetrySource::empty(),
            FakeResourceInformer::with_processes(vec![("p1", 100)]),
            publisher.clone(),
            fast_config(),
            TrackerConfig::default(),
        );

        collector.tick().await.unwrap();
        let snapshot = publisher.current();
        assert!(!snapshot.processes.is_empty());
        let package_power: u64 = snapshot.node.zones.values().map(|u| u.power_uw).sum();
        assert_eq!(package_power, 0);
    }

    #[tokio::test]
    async fn informer_failure_aborts_the_tick_and_keeps_previous_snapshot() {
        let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
        let mut collector = Collector::new(
            FakeCpuEnergySource::with_package_zone(1_000_000),
            FakeGpuTelemetrySource::empty(),
            FakeResourceInformer::failing(),
            publisher.clone(),
            fast_config(),
            TrackerConfig::default(),
        );

        let before = publisher.current().timestamp;
        let result = collector.tick().await;
        assert!(result.is_err());
        assert_eq!(publisher.current().timestamp, before);
    }

    #[tokio::test]
    async fn terminated_process_is_retained_until_export() {
        let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
        let informer = FakeResourceInformer::with_processes(vec![("p1", 100)]);
        let mut collector = Collector::new(
            FakeCpuEnergySource::with_package_zone(1_000_000),
            FakeGpuTelemetrySource::empty(),
            informer,
            publisher.clone(),
            fast_config(),
            TrackerConfig::default(),
        );

        collector.tick().await.unwrap();
        collector.informer.lock().unwrap().terminate("p1");
        collector.tick().await.unwrap();

        let snapshot = publisher.current();
        assert!(snapshot.terminated_processes.iter().any(|w| w.id == "p1"));

        publisher.mark_exported();
        collector.tick().await.unwrap();
        let snapshot = publisher.current();
        assert!(!snapshot.terminated_processes.iter().any(|w| w.id == "p1"));
    }

    #[tokio::test]
    async fn a_zone_that_fails_once_keeps_its_history_and_recovers_cleanly() {
        let publisher = Arc::new(SnapshotPublisher::new(SystemTime::now()));
        let cpu = FakeCpuEnergySource::with_package_zone(1_000_000);
        let mut collector = Collector::new(
            cpu,
            FakeGpuTelemetrySource::empty(),
            FakeResourceInformer::with_processes(vec![("p1", 100)]),
            publisher.clone(),
            fast_config(),
            TrackerConfig::default(),
        );

        collector.tick().await.unwrap();
        let package = publisher.current().node.zones.keys().next().unwrap().clone();
        let before = publisher.current().node.zones[&package].clone();

        collector.cpu_handle().lock().unwrap().fail_next_read(package.clone());
        collector.tick().await.unwrap();

        let mid = publisher.current();
        let mid_usage = &mid.node.zones[&package];
        assert_eq!(mid_usage.energy_total_uj, before.energy_total_uj, "a failed read must not lose the zone's last known counter value");
        assert_eq!(mid_usage.active_energy_uj, before.active_energy_uj);
        assert_eq!(mid_usage.idle_energy_uj, before.idle_energy_uj);
        assert_eq!(mid_usage.power_uw, 0, "a zone that failed to read has no power for this interval");

        collector.cpu_handle().lock().unwrap().set_energy(&package, 1_500_000);
        collector.tick().await.unwrap();

        let after = publisher.current();
        let after_usage = &after.node.zones[&package];
        assert_eq!(after_usage.energy_total_uj, 1_500_000);
        assert_eq!(
            after_usage.active_energy_uj - before.active_energy_uj,
            500_000,
            "the recovery tick must delta against the last good reading, not zero"
        );
    }
}
