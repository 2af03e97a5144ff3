//! Tick-driven simulation of a whole group
//!
//! One step processes one tick in a fixed order: scheduled faults, inbound
//! delivery, node starts, node ticks. Everything sent during tick `t` sits in
//! the network until step `t + 1` moves it into the receivers' queues.

use crate::config::{ScheduledPartition, SimulationConfig};
use crate::event_log::EventLog;
use crate::metrics::SimulationSummary;
use crate::network::EmulatedNetwork;
use anyhow::{bail, Context, Result};
use member_core::Address;
use member_gossip::{dispatch_actions, GossipNode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const NODE_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Kind of fault applied to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    Crash,
    Isolation,
}

/// A fault that has taken effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedFault {
    pub node: Address,
    pub kind: FaultKind,
    pub at_tick: i64,
}

struct SimNode {
    node: GossipNode,
    start_tick: i64,
    started: bool,
    crashed: bool,
}

/// A simulated group wired to an [`EmulatedNetwork`]
pub struct Simulation {
    config: SimulationConfig,
    nodes: Vec<SimNode>,
    network: EmulatedNetwork,
    log: EventLog,
    faults: Vec<AppliedFault>,
    now: i64,
}

impl Simulation {
    /// Build every node and schedule the starts; nothing runs until [`Simulation::step`]
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let introducer = config
            .introducer_index()
            .context("introducer is not part of the simulation")?;

        let mut network = EmulatedNetwork::new(config.drop_rate, config.max_datagram_size, config.seed);
        let mut nodes = Vec::with_capacity(config.node_count);
        let mut slot = 0;

        for index in 0..config.node_count {
            let address = SimulationConfig::node_address(index);
            let seed = config
                .seed
                .wrapping_add(u64::from(address.host_id()).wrapping_mul(NODE_SEED_MIX));
            let node = GossipNode::new(address, config.gossip.clone(), seed)?;

            // the introducer goes first, the others follow in index order
            let start_tick = if index == introducer {
                0
            } else {
                slot += 1;
                slot * config.join_interval
            };

            network.register(address);
            nodes.push(SimNode {
                node,
                start_tick,
                started: false,
                crashed: false,
            });
        }

        info!(
            "Created simulation: {} nodes, {} ticks, seed {}",
            config.node_count, config.total_ticks, config.seed
        );

        Ok(Self {
            config,
            nodes,
            network,
            log: EventLog::new(),
            faults: Vec::new(),
            now: 0,
        })
    }

    /// Process the current tick and advance the clock
    pub fn step(&mut self) {
        let now = self.now;
        self.apply_scheduled_faults(now);

        for sim_node in &mut self.nodes {
            let address = sim_node.node.address();
            if sim_node.crashed {
                self.network.discard(address);
            } else if sim_node.started {
                for datagram in self.network.receive(address) {
                    sim_node.node.enqueue(datagram);
                }
            }
        }

        for sim_node in &mut self.nodes {
            if sim_node.started || sim_node.crashed || sim_node.start_tick != now {
                continue;
            }
            sim_node.started = true;
            let address = sim_node.node.address();
            debug!("Starting {} at tick {}", address, now);
            let actions = sim_node.node.start(now);
            let events = dispatch_actions(&mut self.network, address, actions);
            self.log.extend(events);
        }

        for sim_node in &mut self.nodes {
            if !sim_node.started || sim_node.crashed {
                continue;
            }
            let address = sim_node.node.address();
            let actions = sim_node.node.tick(now);
            let events = dispatch_actions(&mut self.network, address, actions);
            self.log.extend(events);
        }

        self.now += 1;
    }

    /// Run until `total_ticks` ticks have been processed
    pub fn run(&mut self) -> &EventLog {
        self.run_until(self.config.total_ticks);
        info!(
            "Simulation finished at tick {}: {} joins, {} removals",
            self.now,
            self.log.joins(),
            self.log.removals()
        );
        &self.log
    }

    /// Run until the clock reaches `tick`
    pub fn run_until(&mut self, tick: i64) {
        while self.now < tick {
            self.step();
        }
    }

    /// Run with one tick per `period` of wall-clock time, stopping early on Ctrl-C
    pub async fn run_paced(&mut self, period: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(period);
        let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

        while !self.is_finished() {
            tokio::select! {
                _ = interval.tick() => self.step(),
                result = &mut ctrl_c => {
                    result.context("failed to listen for Ctrl-C")?;
                    warn!("Interrupted at tick {}", self.now);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop a node: it no longer ticks and everything sent to it is lost
    pub fn crash(&mut self, index: usize) -> Result<()> {
        let now = self.now;
        let Some(sim_node) = self.nodes.get_mut(index) else {
            bail!("No node with index {}", index);
        };
        if sim_node.crashed {
            return Ok(());
        }

        sim_node.crashed = true;
        let address = sim_node.node.address();
        info!("Crashing {} at tick {}", address, now);
        self.faults.push(AppliedFault {
            node: address,
            kind: FaultKind::Crash,
            at_tick: now,
        });
        Ok(())
    }

    /// Cut a node off from the network while it keeps running
    pub fn isolate(&mut self, index: usize) -> Result<()> {
        let Some(sim_node) = self.nodes.get(index) else {
            bail!("No node with index {}", index);
        };
        let address = sim_node.node.address();
        if self.network.is_isolated(address) {
            return Ok(());
        }

        info!("Isolating {} at tick {}", address, self.now);
        self.network.isolate(address);
        self.faults.push(AppliedFault {
            node: address,
            kind: FaultKind::Isolation,
            at_tick: self.now,
        });
        Ok(())
    }

    /// Start dropping the datagrams a partition covers
    pub fn partition(&mut self, partition: ScheduledPartition) -> Result<()> {
        let (from, to) = self.partition_endpoints(&partition)?;
        info!(
            "Partitioning {} -> {}{} at tick {}",
            from,
            to,
            if partition.bidirectional { " and back" } else { "" },
            self.now
        );
        if partition.bidirectional {
            self.network.partition_bidirectional(from, to);
        } else {
            self.network.partition(from, to);
        }
        Ok(())
    }

    /// Restore the link a partition cut
    pub fn heal_partition(&mut self, partition: ScheduledPartition) -> Result<()> {
        let (from, to) = self.partition_endpoints(&partition)?;
        info!("Healing partition {} -> {} at tick {}", from, to, self.now);
        if partition.bidirectional {
            self.network.heal_partition_bidirectional(from, to);
        } else {
            self.network.heal_partition(from, to);
        }
        Ok(())
    }

    fn partition_endpoints(&self, partition: &ScheduledPartition) -> Result<(Address, Address)> {
        let from = self
            .node(partition.from)
            .with_context(|| format!("No node with index {}", partition.from))?
            .address();
        let to = self
            .node(partition.to)
            .with_context(|| format!("No node with index {}", partition.to))?
            .address();
        Ok((from, to))
    }

    fn apply_scheduled_faults(&mut self, now: i64) {
        let crashes: Vec<usize> = self
            .config
            .crashes
            .iter()
            .filter(|f| f.at_tick == now)
            .map(|f| f.node)
            .collect();
        let isolations: Vec<usize> = self
            .config
            .isolations
            .iter()
            .filter(|f| f.at_tick == now)
            .map(|f| f.node)
            .collect();

        for index in crashes {
            if let Err(e) = self.crash(index) {
                warn!("Skipping scheduled crash: {}", e);
            }
        }
        for index in isolations {
            if let Err(e) = self.isolate(index) {
                warn!("Skipping scheduled isolation: {}", e);
            }
        }

        let partitions = self.config.partitions.clone();
        for partition in partitions {
            let result = if partition.at_tick == now {
                self.partition(partition)
            } else if partition.heal_at == Some(now) {
                self.heal_partition(partition)
            } else {
                continue;
            };
            if let Err(e) = result {
                warn!("Skipping scheduled partition: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.now >= self.config.total_ticks
    }

    /// Next tick to be processed
    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Protocol node at `index`
    pub fn node(&self, index: usize) -> Option<&GossipNode> {
        self.nodes.get(index).map(|n| &n.node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GossipNode> + '_ {
        self.nodes.iter().map(|n| &n.node)
    }

    pub fn is_started(&self, index: usize) -> bool {
        self.nodes.get(index).map_or(false, |n| n.started)
    }

    pub fn is_crashed(&self, index: usize) -> bool {
        self.nodes.get(index).map_or(false, |n| n.crashed)
    }

    /// Whether the node at `index` is running and reachable
    pub fn is_healthy(&self, index: usize) -> bool {
        self.nodes.get(index).map_or(false, |n| {
            n.started && !n.crashed && !self.network.is_isolated(n.node.address())
        })
    }

    pub fn network(&self) -> &EmulatedNetwork {
        &self.network
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn faults(&self) -> &[AppliedFault] {
        &self.faults
    }

    /// Summarize the run so far
    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary::from_simulation(self)
    }
}
