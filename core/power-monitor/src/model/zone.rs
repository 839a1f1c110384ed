//! CPU energy zones (package, core, uncore, dram, psys).

use std::fmt;

/// Identity of a [`Zone`]: its symbolic name and index.
///
/// A zone's identity does not change for the lifetime of the process, even
/// though the absolute energy counter behind it does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZoneId {
    pub name: String,
    pub index: u32,
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.index)
    }
}

/// An addressable CPU energy domain, as enumerated by the CPU energy source.
///
/// `path` is an opaque identifier from the source (a sysfs path for a
/// RAPL-backed source, for instance); the core never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub index: u32,
    pub path: String,
    /// The counter's wrap-around maximum, in microjoules. `None` means the
    /// source cannot report it, which puts wrap detection in a degraded
    /// mode (see [`crate::util::wrap_aware_delta`]).
    pub max_energy_uj: Option<u64>,
}

impl Zone {
    pub fn id(&self) -> ZoneId {
        ZoneId {
            name: self.name.clone(),
            index: self.index,
        }
    }
}
