//! The attribution engine (§4.1).
//!
//! Computes a new [`Snapshot`]'s `Node`, `Processes`, `Containers`, `Pods` and
//! `VirtualMachines` from the previous snapshot and this tick's fresh
//! readings. Terminated-workload bookkeeping (§4.2) and publication (§4.3)
//! happen one layer up, in [`crate::collector`]; this module is a pure
//! function plus its supporting data types, with no I/O and no shared state,
//! so that the scenarios of §8 can be tested directly against it.
//!
//! # Why ratio-over-reporting-processes for GPUs
//!
//! The hardware's own per-process energy field is known to be wrong under
//! GPU time-slicing: it reports the whole device's energy for every
//! concurrent process. Splitting the device's active energy by each
//! process's share of total reported SM utilization guarantees
//! `Σ process.power == node.power` by construction, which the raw hardware
//! field cannot.

use std::time::SystemTime;

use indexmap::IndexMap;

use crate::model::{GpuDevice, Node, NodeUsage, ProcessGpuUtilization, Snapshot, Usage, Workload, Zone, ZoneId};
use crate::sources::{NodeCpuView, RunningProcess, WorkloadRef};
use crate::util::{distribute_exact, scale_round, wrap_aware_delta};

/// One GPU device's readings for a single tick, already collected by
/// [`crate::collector`]. Individually-absent fields represent a
/// partial-source error for that device/method (§7); the whole `GpuReading`
/// being missing from the input slice represents a whole-source GPU failure.
#[derive(Debug, Clone)]
pub struct GpuReading {
    pub device: GpuDevice,
    pub energy_uj: Option<u64>,
    pub device_power_uw: Option<u64>,
    /// `(pid, utilization)` for every process that reported non-error SM
    /// utilization on this device this tick.
    pub process_utilization: Vec<(String, ProcessGpuUtilization)>,
}

/// Computes the new snapshot's live (non-terminated) fields.
///
/// `cpu_readings` must contain only the zones that were read successfully
/// this tick; a zone that failed to read is simply absent, which is how
/// partial CPU-source errors are represented here. A zone absent this tick
/// still appears in the published `Node`, with its cumulative energies
/// carried forward unchanged and zero power for the interval — only the
/// node's own absolute counter is unavailable, not the zone's history.
/// Likewise, `gpu_readings` should simply be empty (or contain devices with
/// `energy_uj: None`) to represent partial or whole GPU failures.
pub fn compute_snapshot(
    prev: Option<&Snapshot>,
    now: SystemTime,
    cpu_readings: &[(Zone, u64)],
    gpu_readings: &[GpuReading],
    node_view: NodeCpuView,
    running: &[RunningProcess],
) -> Snapshot {
    let dt_secs = interval_seconds(prev, now);
    let node = compute_node(prev, cpu_readings, gpu_readings, node_view, dt_secs);
    let mut processes = compute_processes(prev, &node, node_view, running);
    attribute_gpus_to_processes(prev, &node, gpu_readings, &mut processes);
    let (containers, pods, virtual_machines) = aggregate_hierarchy(running, &processes);

    Snapshot {
        timestamp: now,
        node,
        processes,
        containers,
        pods,
        virtual_machines,
        terminated_processes: Vec::new(),
        terminated_containers: Vec::new(),
        terminated_pods: Vec::new(),
        terminated_virtual_machines: Vec::new(),
    }
}

/// `None` on the first tick, or if the wall clock went backwards (§7,
/// structural error — the tick still publishes, with zero power).
fn interval_seconds(prev: Option<&Snapshot>, now: SystemTime) -> Option<f64> {
    let prev = prev?;
    match now.duration_since(prev.timestamp) {
        Ok(d) if d.as_secs_f64() > 0.0 => Some(d.as_secs_f64()),
        Ok(_) => None,
        Err(_) => {
            log::warn!("collection loop clock went backwards since the previous tick; treating this interval as having no measurable duration");
            None
        }
    }
}

fn compute_node(
    prev: Option<&Snapshot>,
    cpu_readings: &[(Zone, u64)],
    gpu_readings: &[GpuReading],
    node_view: NodeCpuView,
    dt_secs: Option<f64>,
) -> Node {
    let mut node = Node {
        cpu_usage_ratio: node_view.usage_ratio.clamp(0.0, 1.0),
        ..Node::default()
    };

    for (zone, e_now) in cpu_readings {
        let zone_id = zone.id();
        let prev_usage = prev.and_then(|p| p.node.zones.get(&zone_id));
        let e_prev = prev_usage.map(|u| u.energy_total_uj).unwrap_or(0);
        let delta = wrap_aware_delta(e_prev, *e_now, zone.max_energy_uj);

        let active_energy = scale_round(delta, node.cpu_usage_ratio);
        let idle_energy = delta - active_energy;

        let (power, active_power, idle_power) = match dt_secs {
            Some(dt) => {
                let power = (delta as f64 / dt).round() as u64;
                let active_power = scale_round(power, node.cpu_usage_ratio);
                (power, active_power, power - active_power)
            }
            None => (0, 0, 0),
        };

        node.zones.insert(
            zone_id,
            NodeUsage {
                energy_total_uj: *e_now,
                active_energy_uj: prev_usage.map(|u| u.active_energy_uj).unwrap_or(0) + active_energy,
                idle_energy_uj: prev_usage.map(|u| u.idle_energy_uj).unwrap_or(0) + idle_energy,
                active_power_uw: active_power,
                idle_power_uw: idle_power,
                power_uw: power,
                active_energy_this_interval_uj: active_energy,
            },
        );
    }

    // A zone that failed to read this tick (§7, partial-source error) is
    // simply absent from `cpu_readings`. Carry its cumulative history
    // forward unchanged rather than dropping the map entry, so that the
    // next successful read still has a real `e_prev` to delta against
    // instead of treating the whole absolute counter as a fresh reading.
    if let Some(prev) = prev {
        for (zone_id, prev_usage) in &prev.node.zones {
            if node.zones.contains_key(zone_id) {
                continue;
            }
            node.zones.insert(
                zone_id.clone(),
                NodeUsage {
                    energy_total_uj: prev_usage.energy_total_uj,
                    active_energy_uj: prev_usage.active_energy_uj,
                    idle_energy_uj: prev_usage.idle_energy_uj,
                    active_power_uw: 0,
                    idle_power_uw: 0,
                    power_uw: 0,
                    active_energy_this_interval_uj: 0,
                },
            );
        }
    }

    for reading in gpu_readings {
        let Some(e_now) = reading.energy_uj else {
            continue; // partial GPU error: omit this device's field entirely
        };
        let gpu_id = reading.device.id;
        let prev_usage = prev.and_then(|p| p.node.gpus.get(&gpu_id));
        let e_prev = prev_usage.map(|u| u.energy_total_uj).unwrap_or(0);
        // NVML-style counters wrap at u64::MAX; GPUs do not expose a max_energy_uj of their own.
        let delta = wrap_aware_delta(e_prev, e_now, Some(u64::MAX));

        let power = match reading.device_power_uw {
            Some(instant) => instant,
            None => match dt_secs {
                Some(dt) => (delta as f64 / dt).round() as u64,
                None => 0,
            },
        };

        node.gpus.insert(
            gpu_id,
            NodeUsage {
                energy_total_uj: e_now,
                active_energy_uj: prev_usage.map(|u| u.active_energy_uj).unwrap_or(0) + delta,
                // GPUs have no idle split in this model (§4.1, Node GPU computation).
                idle_energy_uj: prev_usage.map(|u| u.idle_energy_uj).unwrap_or(0),
                active_power_uw: power,
                idle_power_uw: 0,
                power_uw: power,
                active_energy_this_interval_uj: delta,
            },
        );
    }

    node
}

fn compute_processes(
    prev: Option<&Snapshot>,
    node: &Node,
    node_view: NodeCpuView,
    running: &[RunningProcess],
) -> IndexMap<String, Workload> {
    let mut processes = IndexMap::new();
    for rp in running {
        let mut w = Workload::new(rp.pid.clone(), rp.command.clone());
        w.parent_id = match &rp.parent {
            WorkloadRef::Container { container_id, .. } => Some(container_id.clone()),
            WorkloadRef::VirtualMachine { vm_id } => Some(vm_id.clone()),
            WorkloadRef::None => None,
        };

        let share = if node_view.total_cpu_time_delta == 0 {
            0.0
        } else {
            rp.cpu_time_delta as f64 / node_view.total_cpu_time_delta as f64
        };

        for (zone_id, usage) in &node.zones {
            let energy_this_interval = scale_round(usage.active_energy_this_interval_uj, share);
            let power = scale_round(usage.active_power_uw, share);
            let prev_total = prev
                .and_then(|p| p.processes.get(&rp.pid))
                .and_then(|pw| pw.zones.get(zone_id))
                .map(|u| u.energy_total_uj)
                .unwrap_or(0);
            w.zones.insert(zone_id.clone(), Usage::new(power, prev_total + energy_this_interval));
        }

        processes.insert(rp.pid.clone(), w);
    }
    processes
}

/// Splits each GPU's active power/energy across the processes that reported
/// SM utilization on it, using exact integer distribution (§4.1, Process
/// attribution — "For each GPU"). `prev_total` is looked up from the
/// previous snapshot rather than the workload being built this tick, the
/// same way `compute_processes` threads CPU-zone cumulative totals forward —
/// `processes` here has not accumulated any GPU history of its own yet.
fn attribute_gpus_to_processes(prev: Option<&Snapshot>, node: &Node, gpu_readings: &[GpuReading], processes: &mut IndexMap<String, Workload>) {
    for reading in gpu_readings {
        let gpu_id = reading.device.id;
        let Some(node_usage) = node.gpus.get(&gpu_id) else {
            continue; // this device's energy failed to read this tick
        };
        if reading.process_utilization.is_empty() {
            continue; // no reporting process: the node's GPU energy is retained, unattributed
        }

        let shares: Vec<u64> = reading
            .process_utilization
            .iter()
            .map(|(_, u)| u.sm_util_percent as u64)
            .collect();
        let power_parts = distribute_exact(node_usage.active_power_uw, &shares);
        let energy_parts = distribute_exact(node_usage.active_energy_this_interval_uj, &shares);

        for (i, (pid, _)) in reading.process_utilization.iter().enumerate() {
            let Some(w) = processes.get_mut(pid) else { continue };
            let prev_total = prev
                .and_then(|p| p.processes.get(pid))
                .and_then(|pw| pw.gpus.get(&gpu_id))
                .map(|u| u.energy_total_uj)
                .unwrap_or(0);
            w.gpus
                .insert(gpu_id, Usage::new(power_parts[i], prev_total + energy_parts[i]));
        }
    }
}

/// Builds containers, pods and VMs by summing their member processes'
/// `Usage`, field-wise, for both CPU zones and GPU zones (§3, invariant 3).
/// Pods are summed directly from member processes in the same pass as their
/// containers, so the pod-vs-container identity holds by construction,
/// without relying on float-free but still separately-rounded aggregation.
fn aggregate_hierarchy(
    running: &[RunningProcess],
    processes: &IndexMap<String, Workload>,
) -> (IndexMap<String, Workload>, IndexMap<String, Workload>, IndexMap<String, Workload>) {
    let mut containers: IndexMap<String, Workload> = IndexMap::new();
    let mut pods: IndexMap<String, Workload> = IndexMap::new();
    let mut virtual_machines: IndexMap<String, Workload> = IndexMap::new();

    for rp in running {
        let Some(proc_w) = processes.get(&rp.pid) else { continue };
        match &rp.parent {
            WorkloadRef::Container { container_id, pod_id } => {
                let c = containers
                    .entry(container_id.clone())
                    .or_insert_with(|| Workload::new(container_id.clone(), container_id.clone()));
                c.parent_id = pod_id.clone();
                merge_into(c, proc_w);

                if let Some(pod_id) = pod_id {
                    let p = pods
                        .entry(pod_id.clone())
                        .or_insert_with(|| Workload::new(pod_id.clone(), pod_id.clone()));
                    merge_into(p, proc_w);
                }
            }
            WorkloadRef::VirtualMachine { vm_id } => {
                let v = virtual_machines
                    .entry(vm_id.clone())
                    .or_insert_with(|| Workload::new(vm_id.clone(), vm_id.clone()));
                merge_into(v, proc_w);
            }
            WorkloadRef::None => {}
        }
    }

    (containers, pods, virtual_machines)
}

fn merge_into(aggregate: &mut Workload, member: &Workload) {
    for (zone_id, usage) in &member.zones {
        aggregate.add_zone_usage(zone_id.clone(), *usage);
    }
    for (gpu_id, usage) in &member.gpus {
        aggregate.add_gpu_usage(*gpu_id, *usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GpuDevice;

    fn zone(name: &str) -> Zone {
        Zone {
            name: name.to_string(),
            index: 0,
            path: format!("/sys/{name}"),
            max_energy_uj: Some(u64::MAX),
        }
    }

    fn process(pid: &str, cpu_delta: u64) -> RunningProcess {
        RunningProcess {
            pid: pid.to_string(),
            command: pid.to_string(),
            exe_path: format!("/usr/bin/{pid}"),
            cpu_time_delta: cpu_delta,
            cpu_time_total: cpu_delta,
            parent: WorkloadRef::None,
        }
    }

    #[test]
    fn s1_conservation_under_uniform_load() {
        let running = vec![process("p1", 50), process("p2", 50)];
        let node_view = NodeCpuView {
            usage_ratio: 1.0,
            total_cpu_time_delta: 100,
        };
        let snap = compute_snapshot(None, SystemTime::now(), &[(zone("package"), 1000)], &[], node_view, &running);

        let package = zone("package").id();
        assert_eq!(snap.node.zones[&package].active_energy_uj, 1000);
        assert_eq!(snap.node.zones[&package].idle_energy_uj, 0);
        assert_eq!(snap.processes["p1"].zones[&package].energy_total_uj, 500);
        assert_eq!(snap.processes["p2"].zones[&package].energy_total_uj, 500);
    }

    #[test]
    fn s2_idle_split() {
        let running = vec![process("p1", 50), process("p2", 50)];
        let node_view = NodeCpuView {
            usage_ratio: 0.4,
            total_cpu_time_delta: 100,
        };
        let snap = compute_snapshot(None, SystemTime::now(), &[(zone("package"), 1000)], &[], node_view, &running);

        let package = zone("package").id();
        assert_eq!(snap.node.zones[&package].active_energy_uj, 400);
        assert_eq!(snap.node.zones[&package].idle_energy_uj, 600);
        assert_eq!(snap.processes["p1"].zones[&package].energy_total_uj, 200);
        assert_eq!(snap.processes["p2"].zones[&package].energy_total_uj, 200);
    }

    fn gpu_reading(power_uw: u64, utils: &[(&str, u8)]) -> GpuReading {
        GpuReading {
            device: GpuDevice {
                id: 0,
                uuid: "GPU-0".into(),
                name: "Test GPU".into(),
                vendor: "test".into(),
            },
            energy_uj: Some(0),
            device_power_uw: Some(power_uw),
            process_utilization: utils
                .iter()
                .map(|(pid, u)| {
                    (
                        pid.to_string(),
                        ProcessGpuUtilization {
                            sm_util_percent: *u,
                            energy_consumed_uj: 0,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn s3_gpu_ratio() {
        let running = vec![process("p1", 0), process("p2", 0), process("p3", 0)];
        let node_view = NodeCpuView::default();
        let gpus = [gpu_reading(150_000_000, &[("p1", 30), ("p2", 50), ("p3", 20)])];
        let snap = compute_snapshot(None, SystemTime::now(), &[], &gpus, node_view, &running);

        assert_eq!(snap.processes["p1"].gpus[&0].power_uw, 45_000_000);
        assert_eq!(snap.processes["p2"].gpus[&0].power_uw, 75_000_000);
        assert_eq!(snap.processes["p3"].gpus[&0].power_uw, 30_000_000);
        let total: u64 = snap.processes.values().filter_map(|w| w.gpus.get(&0)).map(|u| u.power_uw).sum();
        assert_eq!(total, snap.node.gpus[&0].power_uw);
    }

    #[test]
    fn s4_gpu_time_sliced_underutilized() {
        let running = vec![process("p1", 0), process("p2", 0)];
        let node_view = NodeCpuView::default();
        let gpus = [gpu_reading(200_000_000, &[("p1", 10), ("p2", 15)])];
        let snap = compute_snapshot(None, SystemTime::now(), &[], &gpus, node_view, &running);

        assert_eq!(snap.processes["p1"].gpus[&0].power_uw, 80_000_000);
        assert_eq!(snap.processes["p2"].gpus[&0].power_uw, 120_000_000);
    }

    #[test]
    fn container_and_pod_equal_sum_of_processes() {
        let running = vec![
            RunningProcess {
                parent: WorkloadRef::Container {
                    container_id: "c1".into(),
                    pod_id: Some("pod1".into()),
                },
                ..process("p1", 50)
            },
            RunningProcess {
                parent: WorkloadRef::Container {
                    container_id: "c2".into(),
                    pod_id: Some("pod1".into()),
                },
                ..process("p2", 50)
            },
        ];
        let node_view = NodeCpuView {
            usage_ratio: 1.0,
            total_cpu_time_delta: 100,
        };
        let snap = compute_snapshot(None, SystemTime::now(), &[(zone("package"), 1000)], &[], node_view, &running);

        let package = zone("package").id();
        let c1 = snap.containers["c1"].zones[&package].energy_total_uj;
        let c2 = snap.containers["c2"].zones[&package].energy_total_uj;
        let pod = snap.pods["pod1"].zones[&package].energy_total_uj;
        pretty_assertions::assert_eq!(c1 + c2, pod);
        pretty_assertions::assert_eq!(pod, 1000);
    }

    #[test]
    fn energy_total_is_monotonic_across_ticks() {
        let running = vec![process("p1", 100)];
        let node_view = NodeCpuView {
            usage_ratio: 1.0,
            total_cpu_time_delta: 100,
        };
        let t0 = SystemTime::now();
        let snap1 = compute_snapshot(None, t0, &[(zone("package"), 1000)], &[], node_view, &running);
        let t1 = t0 + std::time::Duration::from_secs(1);
        let snap2 = compute_snapshot(Some(&snap1), t1, &[(zone("package"), 1500)], &[], node_view, &running);

        let package = zone("package").id();
        assert!(snap2.processes["p1"].zones[&package].energy_total_uj >= snap1.processes["p1"].zones[&package].energy_total_uj);
    }

    #[test]
    fn first_tick_has_zero_power_but_plausible_energy() {
        let running = vec![process("p1", 100)];
        let node_view = NodeCpuView {
            usage_ratio: 1.0,
            total_cpu_time_delta: 100,
        };
        let snap = compute_snapshot(None, SystemTime::now(), &[(zone("package"), 1000)], &[], node_view, &running);

        let package = zone("package").id();
        assert_eq!(snap.node.zones[&package].power_uw, 0);
        assert_eq!(snap.node.zones[&package].active_energy_uj, 1000);
    }

    fn gpu_reading_with_energy(energy_uj: u64, power_uw: u64, utils: &[(&str, u8)]) -> GpuReading {
        GpuReading {
            device: GpuDevice {
                id: 0,
                uuid: "GPU-0".into(),
                name: "Test GPU".into(),
                vendor: "test".into(),
            },
            energy_uj: Some(energy_uj),
            device_power_uw: Some(power_uw),
            process_utilization: utils
                .iter()
                .map(|(pid, u)| {
                    (
                        pid.to_string(),
                        ProcessGpuUtilization {
                            sm_util_percent: *u,
                            energy_consumed_uj: 0,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn gpu_energy_total_is_monotonic_across_ticks_even_as_share_drops() {
        let running = vec![process("p1", 0), process("p2", 0)];
        let node_view = NodeCpuView::default();
        let t0 = SystemTime::now();

        let gpus_t0 = [gpu_reading_with_energy(100_000_000, 100_000_000, &[("p1", 50), ("p2", 50)])];
        let snap1 = compute_snapshot(None, t0, &[], &gpus_t0, node_view, &running);
        let p1_after_t0 = snap1.processes["p1"].gpus[&0].energy_total_uj;
        assert!(p1_after_t0 > 0);

        // p1's share of SM utilization drops sharply at t1; its cumulative
        // GPU EnergyTotal must still never decrease (data-model invariant 4).
        let t1 = t0 + std::time::Duration::from_secs(1);
        let gpus_t1 = [gpu_reading_with_energy(300_000_000, 200_000_000, &[("p1", 10), ("p2", 90)])];
        let snap2 = compute_snapshot(Some(&snap1), t1, &[], &gpus_t1, node_view, &running);
        let p1_after_t1 = snap2.processes["p1"].gpus[&0].energy_total_uj;

        assert!(
            p1_after_t1 >= p1_after_t0,
            "gpu EnergyTotal decreased from {p1_after_t0} to {p1_after_t1} despite a live workload across both ticks"
        );
    }
}
