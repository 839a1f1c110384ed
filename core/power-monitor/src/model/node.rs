//! The node-level view: one [`NodeUsage`] per zone or GPU, plus the CPU usage ratio.

use super::zone::ZoneId;

/// Per-zone or per-GPU node-level accounting for one collection tick.
///
/// `active_energy_this_interval_uj` is deliberately not part of the public
/// surface that an exporter would read: it only exists so that
/// [`crate::attribution`] can split the interval's active energy across
/// workloads without recomputing the ratio math twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUsage {
    /// The last absolute counter value read from the source, in microjoules
    /// (or, for a GPU, the cumulative energy counter).
    pub energy_total_uj: u64,
    /// Cumulative energy attributed to workload activity, across all ticks.
    pub active_energy_uj: u64,
    /// Cumulative energy *not* attributed to any workload, across all ticks.
    pub idle_energy_uj: u64,
    pub active_power_uw: u64,
    pub idle_power_uw: u64,
    pub power_uw: u64,
    pub(crate) active_energy_this_interval_uj: u64,
}

/// The node-wide view published in every snapshot.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Fraction of the node's CPU capacity in use during the last interval, in `[0, 1]`.
    pub cpu_usage_ratio: f64,
    pub zones: indexmap::IndexMap<ZoneId, NodeUsage>,
    pub gpus: indexmap::IndexMap<u32, NodeUsage>,
}
