//! The terminated-workload tracker (§4.2).
//!
//! Evicting a workload from the live snapshot the instant it disappears
//! would lose its last interval's energy attribution, which is unfair to
//! short-lived workloads and breaks any cost accounting built on top of the
//! snapshot stream. The tracker holds a bounded, cloned cache of terminated
//! workloads until the exporter has had a chance to observe them.

use rustc_hash::FxHashMap;

use crate::model::Workload;

/// Retention policy for one tier of terminated workloads (processes,
/// containers, pods, or VMs — §4.2 applies the same contract to each
/// independently).
#[derive(Debug, Clone, Copy)]
pub enum Retention {
    /// Keep the top-N terminated workloads by `EnergyTotal`, evicting the
    /// lowest on insert once full.
    Bounded(usize),
    /// Tracking disabled: terminated workloads are dropped immediately.
    Disabled,
    /// No bound; every terminated workload above the threshold is retained
    /// until exported.
    Unbounded,
}

impl Retention {
    /// `maxTerminated`'s tri-state contract: `> 0` bounded, `0` disabled,
    /// `< 0` unbounded.
    pub fn from_max_terminated(max_terminated: i64) -> Self {
        match max_terminated.cmp(&0) {
            std::cmp::Ordering::Greater => Retention::Bounded(max_terminated as usize),
            std::cmp::Ordering::Equal => Retention::Disabled,
            std::cmp::Ordering::Less => Retention::Unbounded,
        }
    }
}

/// Tracks one tier's terminated workloads between the tick that observes
/// their disappearance and the next successful export.
pub struct TerminatedTracker {
    retention: Retention,
    min_energy_threshold: u64,
    /// Inserted-at-most-once guard: a process id cannot terminate twice
    /// during the agent's lifetime, but re-running the same test fixture or
    /// a buggy informer could otherwise double-insert.
    seen: FxHashMap<String, ()>,
    entries: Vec<Workload>,
}

impl TerminatedTracker {
    pub fn new(retention: Retention, min_energy_threshold: u64) -> Self {
        Self {
            retention,
            min_energy_threshold,
            seen: FxHashMap::default(),
            entries: Vec::new(),
        }
    }

    /// Ingests a workload that vanished from this tick's live snapshot. A
    /// deep clone is taken; the tracker never shares storage with the live
    /// snapshot it was read from (§4.2).
    pub fn insert(&mut self, workload: &Workload) {
        if matches!(self.retention, Retention::Disabled) {
            return;
        }
        if workload.total_energy_uj() < self.min_energy_threshold {
            return;
        }
        if self.seen.contains_key(&workload.id) {
            return;
        }
        self.seen.insert(workload.id.clone(), ());
        self.entries.push(workload.clone());

        if let Retention::Bounded(max) = self.retention {
            if self.entries.len() > max {
                self.evict_lowest();
            }
        }
    }

    fn evict_lowest(&mut self) {
        let Some((idx, _)) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.total_energy_uj())
        else {
            return;
        };
        self.entries.remove(idx);
    }

    /// The currently-retained terminated workloads, in insertion order.
    pub fn entries(&self) -> &[Workload] {
        &self.entries
    }

    /// Clears retained entries after a successful export (§4.3
    /// `MarkExported`). Does not clear the insert-once guard: a workload
    /// that already terminated can never be re-inserted.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The four independent tiers of terminated-workload tracking, bundled so
/// the collection loop can drive them together.
pub struct TerminatedTrackers {
    pub processes: TerminatedTracker,
    pub containers: TerminatedTracker,
    pub pods: TerminatedTracker,
    pub virtual_machines: TerminatedTracker,
}

impl TerminatedTrackers {
    pub fn new(retention: Retention, min_energy_threshold: u64) -> Self {
        Self {
            processes: TerminatedTracker::new(retention, min_energy_threshold),
            containers: TerminatedTracker::new(retention, min_energy_threshold),
            pods: TerminatedTracker::new(retention, min_energy_threshold),
            virtual_machines: TerminatedTracker::new(retention, min_energy_threshold),
        }
    }

    pub fn clear_all(&mut self) {
        self.processes.clear();
        self.containers.clear();
        self.pods.clear();
        self.virtual_machines.clear();
    }
}
