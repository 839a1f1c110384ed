//! Fake collaborators, gated behind the `test` feature. These let both this
//! crate's own tests and downstream integration tests exercise the
//! collection loop without any real sysfs or NVML access.

use std::collections::{HashMap, HashSet};

use crate::model::{GpuDevice, ProcessGpuUtilization, Zone, ZoneId};
use crate::sources::{CpuEnergySource, GpuTelemetrySource, NodeCpuView, ResourceInformer, RunningProcess, WorkloadRef};

/// A CPU energy source with a fixed set of zones and directly-settable
/// absolute counter values.
pub struct FakeCpuEnergySource {
    zones: Vec<Zone>,
    values: HashMap<ZoneId, u64>,
    failing: HashSet<ZoneId>,
}

impl FakeCpuEnergySource {
    /// A single `package:0` zone holding `energy_uj`.
    pub fn with_package_zone(energy_uj: u64) -> Self {
        let zone = Zone {
            name: "package".to_string(),
            index: 0,
            path: "/sys/fake/package".to_string(),
            max_energy_uj: Some(u64::MAX),
        };
        let mut values = HashMap::new();
        values.insert(zone.id(), energy_uj);
        Self {
            zones: vec![zone],
            values,
            failing: HashSet::new(),
        }
    }

    pub fn set_energy(&mut self, zone: &ZoneId, energy_uj: u64) {
        self.values.insert(zone.clone(), energy_uj);
    }

    pub fn fail_next_read(&mut self, zone: ZoneId) {
        self.failing.insert(zone);
    }
}

impl CpuEnergySource for FakeCpuEnergySource {
    fn zones(&self) -> &[Zone] {
        &self.zones
    }

    fn read_energy(&mut self, zone: &ZoneId) -> anyhow::Result<u64> {
        if self.failing.remove(zone) {
            anyhow::bail!("fake zone {zone} read failure");
        }
        Ok(*self.values.get(zone).unwrap_or(&0))
    }
}

/// A GPU telemetry source with directly-settable device energy, power, and
/// per-process utilization.
pub struct FakeGpuTelemetrySource {
    devices: Vec<GpuDevice>,
    energy: HashMap<u32, u64>,
    power: HashMap<u32, u64>,
    utilization: HashMap<(String, u32), ProcessGpuUtilization>,
    started: bool,
}

impl FakeGpuTelemetrySource {
    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
            energy: HashMap::new(),
            power: HashMap::new(),
            utilization: HashMap::new(),
            started: false,
        }
    }

    pub fn with_device(id: u32, energy_uj: u64, power_uw: u64) -> Self {
        let mut source = Self::empty();
        source.devices.push(GpuDevice {
            id,
            uuid: format!("GPU-{id}"),
            name: "Fake GPU".to_string(),
            vendor: "fake".to_string(),
        });
        source.energy.insert(id, energy_uj);
        source.power.insert(id, power_uw);
        source
    }

    pub fn set_process_utilization(&mut self, pid: &str, gpu_id: u32, sm_util_percent: u8) {
        self.utilization.insert(
            (pid.to_string(), gpu_id),
            ProcessGpuUtilization {
                sm_util_percent,
                energy_consumed_uj: 0,
            },
        );
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl GpuTelemetrySource for FakeGpuTelemetrySource {
    fn start(&mut self) -> anyhow::Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.started = false;
        Ok(())
    }

    fn devices(&self) -> &[GpuDevice] {
        &self.devices
    }

    fn energy_uj(&mut self, gpu_id: u32) -> anyhow::Result<u64> {
        Ok(*self.energy.get(&gpu_id).unwrap_or(&0))
    }

    fn device_power_uw(&mut self, gpu_id: u32) -> anyhow::Result<Option<u64>> {
        Ok(self.power.get(&gpu_id).copied())
    }

    fn process_utilization(&mut self, pid: &str, gpu_id: u32) -> anyhow::Result<Option<ProcessGpuUtilization>> {
        Ok(self.utilization.get(&(pid.to_string(), gpu_id)).copied())
    }
}

/// A resource informer whose process list and terminations are driven
/// directly by the test. The terminated-pid signal returned by `processes()`
/// only reflects a `terminate()` call once `refresh()` has run since.
pub struct FakeResourceInformer {
    running: Vec<(String, u64)>,
    pending_terminations: Vec<String>,
    last_terminations: Vec<String>,
    usage_ratio: f64,
    fail: bool,
}

impl FakeResourceInformer {
    pub fn with_processes(processes: Vec<(&str, u64)>) -> Self {
        Self {
            running: processes.into_iter().map(|(pid, delta)| (pid.to_string(), delta)).collect(),
            pending_terminations: Vec::new(),
            last_terminations: Vec::new(),
            usage_ratio: 1.0,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            running: Vec::new(),
            pending_terminations: Vec::new(),
            last_terminations: Vec::new(),
            usage_ratio: 0.0,
            fail: true,
        }
    }

    pub fn set_usage_ratio(&mut self, ratio: f64) {
        self.usage_ratio = ratio;
    }

    pub fn add_process(&mut self, pid: &str, cpu_time_delta: u64) {
        self.running.push((pid.to_string(), cpu_time_delta));
    }

    /// Removes `pid` from the running set immediately, but only surfaces it
    /// through `processes()`'s terminated-pid list after the next
    /// `refresh()` — matching how a real informer only learns about a
    /// termination by re-polling `/proc`.
    pub fn terminate(&mut self, pid: &str) {
        self.running.retain(|(p, _)| p != pid);
        self.pending_terminations.push(pid.to_string());
    }
}

impl ResourceInformer for FakeResourceInformer {
    fn refresh(&mut self) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("fake informer refresh failure");
        }
        self.last_terminations = std::mem::take(&mut self.pending_terminations);
        Ok(())
    }

    fn node(&self) -> NodeCpuView {
        NodeCpuView {
            usage_ratio: self.usage_ratio,
            total_cpu_time_delta: self.running.iter().map(|(_, delta)| delta).sum(),
        }
    }

    fn processes(&self) -> (Vec<RunningProcess>, Vec<String>) {
        let running = self
            .running
            .iter()
            .map(|(pid, delta)| RunningProcess {
                pid: pid.clone(),
                command: pid.clone(),
                exe_path: format!("/usr/bin/{pid}"),
                cpu_time_delta: *delta,
                cpu_time_total: *delta,
                parent: WorkloadRef::None,
            })
            .collect();
        (running, self.last_terminations.clone())
    }
}
