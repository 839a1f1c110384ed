//! GPU devices.

/// A GPU device, identified by a small integer id for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuDevice {
    pub id: u32,
    pub uuid: String,
    pub name: String,
    pub vendor: String,
}

/// A process's reported share of a GPU's streaming multiprocessors over the
/// last sampling window, plus the (unreliable, see module docs on
/// [`crate::attribution`]) cumulative energy the device itself attributes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGpuUtilization {
    /// 0-100.
    pub sm_util_percent: u8,
    pub energy_consumed_uj: u64,
}
