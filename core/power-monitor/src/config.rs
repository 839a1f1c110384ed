//! Configuration structs for the collection loop and the terminated tracker.
//!
//! These are plain `serde`-deserializable values; the core never reads a
//! file, an environment variable, or a CLI flag itself (§1, §6 — loading and
//! wiring configuration belongs to whatever binary embeds this crate).

use std::time::Duration;

use serde::Deserialize;

/// Drives [`crate::collector::Collector`]'s timing.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Fixed interval between the start of one tick and the next (§4.4).
    #[serde(with = "millis_duration")]
    pub tick_interval: Duration,
    /// Per-source bound: a source read (informer refresh, CPU zone batch,
    /// GPU device batch) that exceeds this is treated as a failure for that
    /// source this tick (§5, §7).
    #[serde(with = "millis_duration")]
    pub source_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            source_timeout: Duration::from_millis(500),
        }
    }
}

/// Parameterizes the terminated-workload tracker's retention (§4.2), shared
/// by the process, container, pod and VM tiers.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Tri-state: `> 0` keeps the top-N by energy, `0` disables tracking,
    /// `< 0` retains everything above `min_energy_threshold`.
    pub max_terminated: i64,
    pub min_energy_threshold: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_terminated: 500,
            min_energy_threshold: 0,
        }
    }
}

/// A tiny whole-milliseconds duration (de)serializer, so the config structs
/// stay `serde`-only without adding a dedicated duration-parsing crate for
/// two fields.
mod millis_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
