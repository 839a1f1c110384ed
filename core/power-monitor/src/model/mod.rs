//! The data model of §3: zones, GPUs, usage, workloads and snapshots.

mod gpu;
mod node;
mod snapshot;
mod usage;
mod workload;
mod zone;

pub use gpu::{GpuDevice, ProcessGpuUtilization};
pub use node::{Node, NodeUsage};
pub use snapshot::Snapshot;
pub use usage::Usage;
pub use workload::Workload;
pub use zone::{Zone, ZoneId};
