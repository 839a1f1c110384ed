//! External collaborator interfaces (§6).
//!
//! The core is built against these traits only; it never knows whether it is
//! talking to a RAPL powercap reader, an NVML client, a fake for tests, or
//! something else entirely: one small trait per kind of hardware concern,
//! implemented by a driver crate that is out of scope here (§1).

use crate::model::{GpuDevice, ProcessGpuUtilization, Zone, ZoneId};

/// Enumerates CPU energy zones and reads their monotonic joule counters.
///
/// A single zone may fail to read without invalidating the others (§7,
/// partial-source error); the trait exposes this by scoping the `Result` to
/// one zone at a time rather than returning a single batch `Result`.
pub trait CpuEnergySource: Send {
    /// The zones known to this source. Stable for the source's lifetime.
    fn zones(&self) -> &[Zone];

    /// Reads `zone`'s current absolute energy counter, in microjoules.
    fn read_energy(&mut self, zone: &ZoneId) -> anyhow::Result<u64>;
}

/// Enumerates GPU devices and reads their telemetry.
///
/// `start`/`stop` bracket the source's lifecycle (e.g. an NVML init/shutdown
/// pair); the core calls `start` once before the first tick and `stop` on
/// shutdown.
pub trait GpuTelemetrySource: Send {
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self) -> anyhow::Result<()>;

    /// The devices known to this source. Stable for the source's lifetime.
    fn devices(&self) -> &[GpuDevice];

    /// Cumulative energy consumed by `gpu_id`, in microjoules.
    fn energy_uj(&mut self, gpu_id: u32) -> anyhow::Result<u64>;

    /// Instantaneous device power, in microwatts, if the device exposes it.
    fn device_power_uw(&mut self, gpu_id: u32) -> anyhow::Result<Option<u64>>;

    /// A process's streaming-multiprocessor utilization on `gpu_id` over the
    /// last sampling window, or `None` if the process reports nothing on
    /// that device this tick.
    fn process_utilization(&mut self, pid: &str, gpu_id: u32) -> anyhow::Result<Option<ProcessGpuUtilization>>;
}

/// The parent workload of a process, as reported by the informer.
///
/// A process belongs to at most one hierarchy: a container (itself part of
/// a pod), a VM, or neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadRef {
    None,
    Container { container_id: String, pod_id: Option<String> },
    VirtualMachine { vm_id: String },
}

/// A currently-running process, as reported by the informer.
#[derive(Debug, Clone)]
pub struct RunningProcess {
    pub pid: String,
    pub command: String,
    pub exe_path: String,
    /// CPU time consumed since the previous refresh, in the same unit as
    /// [`NodeCpuView::total_cpu_time_delta`] (typically microseconds).
    pub cpu_time_delta: u64,
    pub cpu_time_total: u64,
    pub parent: WorkloadRef,
}

/// The node-wide CPU view for the interval just ended.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCpuView {
    /// Fraction of the node's CPU capacity in use, in `[0, 1]`.
    pub usage_ratio: f64,
    pub total_cpu_time_delta: u64,
}

/// Enumerates running processes, reports which ones terminated, and exposes
/// the node-wide CPU usage ratio.
///
/// `refresh` failing is a whole-source error (§7): the tick that observes it
/// is abandoned entirely.
pub trait ResourceInformer: Send {
    fn refresh(&mut self) -> anyhow::Result<()>;
    fn node(&self) -> NodeCpuView;
    /// Running processes, and the ids of processes that have terminated
    /// since the previous `refresh`.
    fn processes(&self) -> (Vec<RunningProcess>, Vec<String>);
}
