//! The immutable, published [`Snapshot`].

use std::time::SystemTime;

use indexmap::IndexMap;

use super::node::Node;
use super::workload::Workload;

/// The publisher's unit of publication: a complete, timestamped view of the
/// node and every workload tier. Immutable once constructed (§3 "Lifecycle").
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: SystemTime,
    pub node: Node,
    pub processes: IndexMap<String, Workload>,
    pub containers: IndexMap<String, Workload>,
    pub pods: IndexMap<String, Workload>,
    pub virtual_machines: IndexMap<String, Workload>,
    pub terminated_processes: Vec<Workload>,
    pub terminated_containers: Vec<Workload>,
    pub terminated_pods: Vec<Workload>,
    pub terminated_virtual_machines: Vec<Workload>,
}

impl Snapshot {
    /// An empty snapshot, used as the implicit "previous" state before the
    /// very first tick (§4.1 "First-read policy").
    pub fn empty(timestamp: SystemTime) -> Self {
        Self {
            timestamp,
            node: Node::default(),
            processes: IndexMap::new(),
            containers: IndexMap::new(),
            pods: IndexMap::new(),
            virtual_machines: IndexMap::new(),
            terminated_processes: Vec::new(),
            terminated_containers: Vec::new(),
            terminated_pods: Vec::new(),
            terminated_virtual_machines: Vec::new(),
        }
    }
}
