//! Result summary of a simulation run

use crate::network::NetworkStats;
use crate::runner::{FaultKind, Simulation};
use member_core::Address;
use serde::Serialize;
use std::collections::BTreeSet;

/// How the group reacted to one fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultReport {
    pub node: Address,
    pub kind: FaultKind,
    pub at_tick: i64,
    /// Healthy nodes expected to notice the fault
    pub survivors: usize,
    /// Healthy nodes that reported the node removed after the fault
    pub detected_by: usize,
    pub first_detection: Option<i64>,
    pub last_detection: Option<i64>,
}

impl FaultReport {
    /// Whether every survivor noticed the fault
    pub fn fully_detected(&self) -> bool {
        self.detected_by == self.survivors
    }

    /// Ticks from the fault to the last survivor noticing it
    pub fn detection_latency(&self) -> Option<i64> {
        self.last_detection.map(|t| t - self.at_tick)
    }
}

/// Final view of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub node: Address,
    pub healthy: bool,
    pub in_group: bool,
    pub heartbeat: i64,
    pub members: usize,
    pub live_neighbors: usize,
    pub failed: usize,
}

/// Everything a run produced, ready to be exported as JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub seed: u64,
    pub ticks: i64,
    pub node_count: usize,
    pub network: NetworkStats,
    pub joins: usize,
    pub removals: usize,
    /// Removals of nodes that were never faulted, or reported before their fault
    pub false_positives: usize,
    pub faults: Vec<FaultReport>,
    pub nodes: Vec<NodeView>,
}

impl SimulationSummary {
    /// Collect the summary of `sim` at its current tick
    pub fn from_simulation(sim: &Simulation) -> Self {
        let log = sim.log();

        let healthy: BTreeSet<Address> = (0..sim.node_count())
            .filter(|&i| sim.is_healthy(i))
            .filter_map(|i| sim.node(i).map(|n| n.address()))
            .collect();

        let faults = sim
            .faults()
            .iter()
            .map(|fault| {
                let detections: Vec<(Address, i64)> = log
                    .removals_of(fault.node)
                    .filter(|e| e.at() >= fault.at_tick && healthy.contains(&e.reporter()))
                    .map(|e| (e.reporter(), e.at()))
                    .collect();
                let reporters: BTreeSet<Address> = detections.iter().map(|(r, _)| *r).collect();

                FaultReport {
                    node: fault.node,
                    kind: fault.kind,
                    at_tick: fault.at_tick,
                    survivors: healthy.iter().filter(|a| **a != fault.node).count(),
                    detected_by: reporters.len(),
                    first_detection: detections.iter().map(|(_, t)| *t).min(),
                    last_detection: detections.iter().map(|(_, t)| *t).max(),
                }
            })
            .collect();

        let false_positives = log
            .events()
            .iter()
            .filter(|e| e.is_removal())
            .filter(|e| {
                !sim
                    .faults()
                    .iter()
                    .any(|f| f.node == e.subject() && e.at() >= f.at_tick)
            })
            .count();

        let nodes = (0..sim.node_count())
            .filter_map(|i| {
                let node = sim.node(i)?;
                let stats = node.table().stats();
                Some(NodeView {
                    node: node.address(),
                    healthy: sim.is_healthy(i),
                    in_group: node.is_in_group(),
                    heartbeat: node.heartbeat(),
                    members: stats.total,
                    live_neighbors: node.table().live_neighbors(),
                    failed: stats.failed,
                })
            })
            .collect();

        Self {
            seed: sim.config().seed,
            ticks: sim.now(),
            node_count: sim.node_count(),
            network: sim.network().stats(),
            joins: log.joins(),
            removals: log.removals(),
            false_positives,
            faults,
            nodes,
        }
    }

    /// Whether every fault was noticed by every survivor
    pub fn all_faults_detected(&self) -> bool {
        self.faults.iter().all(FaultReport::fully_detected)
    }

    /// Export as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
