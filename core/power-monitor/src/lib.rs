//! Node-local power monitor: attributes CPU and GPU energy to processes,
//! containers, pods and VMs, retains terminated workloads fairly, and
//! publishes a consistent read-only snapshot stream.
//!
//! This crate owns none of the hardware access, wire protocols, or
//! configuration loading around it (§1, §6); it is driven by a binary that
//! implements [`sources::CpuEnergySource`], [`sources::GpuTelemetrySource`]
//! and [`sources::ResourceInformer`] and wires up a [`collector::Collector`].

pub mod attribution;
pub mod collector;
pub mod config;
pub mod error;
pub mod model;
pub mod publisher;
pub mod sources;
pub mod terminated;
mod util;

#[cfg(any(test, feature = "test"))]
pub mod test_support;

pub use collector::{Collector, LoopState};
pub use config::{CollectorConfig, TrackerConfig};
pub use error::TickError;
pub use publisher::{wait_for_fresh, SnapshotPublisher};
pub use sources::{CpuEnergySource, GpuTelemetrySource, NodeCpuView, ResourceInformer, RunningProcess, WorkloadRef};
pub use terminated::{Retention, TerminatedTracker, TerminatedTrackers};
