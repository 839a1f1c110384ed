//! Generic workload record, shared by processes, containers, pods and VMs.

use indexmap::IndexMap;

use super::usage::Usage;
use super::zone::ZoneId;

/// A process, container, pod, or VM, as it appears in a published snapshot.
///
/// The hierarchy is carried by id, not by embedding parent/child objects:
/// `parent_id` is the container (or VM) id for a
/// process, or the pod id for a container. It is `None` for a process with
/// no container/VM affiliation, and always `None` for pods and VMs (they are
/// the top of their respective hierarchies).
#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub zones: IndexMap<ZoneId, Usage>,
    pub gpus: IndexMap<u32, Usage>,
    pub parent_id: Option<String>,
}

impl Workload {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            zones: IndexMap::new(),
            gpus: IndexMap::new(),
            parent_id: None,
        }
    }

    /// Total energy across every zone and GPU, used by the terminated
    /// tracker to rank and threshold workloads (§4.2).
    pub fn total_energy_uj(&self) -> u64 {
        let zones: u64 = self.zones.values().map(|u| u.energy_total_uj).sum();
        let gpus: u64 = self.gpus.values().map(|u| u.energy_total_uj).sum();
        zones + gpus
    }

    /// Adds `usage` to this workload's running total for `zone`, the way a
    /// container accumulates its member processes' usage.
    pub fn add_zone_usage(&mut self, zone: ZoneId, usage: Usage) {
        *self.zones.entry(zone).or_default() += usage;
    }

    pub fn add_gpu_usage(&mut self, gpu_id: u32, usage: Usage) {
        *self.gpus.entry(gpu_id).or_default() += usage;
    }
}
