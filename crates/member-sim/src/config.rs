//! Simulation scenario configuration

use anyhow::{bail, Result};
use member_core::Address;
use member_gossip::{GossipConfig, MembershipEntry, Message};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment variables overriding scenario fields,
/// e.g. `MEMBERSIM_DROP_RATE=0.1` or `MEMBERSIM_GOSSIP__PROBE_PERIOD=30`.
pub const ENV_PREFIX: &str = "MEMBERSIM";

/// A fault applied to one node at a given tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledFault {
    /// Index of the node, 0 being the introducer
    pub node: usize,
    pub at_tick: i64,
}

impl ScheduledFault {
    pub fn new(node: usize, at_tick: i64) -> Self {
        Self { node, at_tick }
    }
}

/// A network partition between two nodes, optionally healed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPartition {
    /// Index of the sending side
    pub from: usize,
    /// Index of the receiving side
    pub to: usize,
    pub at_tick: i64,
    /// Tick at which the link is restored; the cut lasts the whole run otherwise
    #[serde(default)]
    pub heal_at: Option<i64>,
    /// Cut `to -> from` as well
    #[serde(default)]
    pub bidirectional: bool,
}

impl ScheduledPartition {
    /// Drop everything `from` sends to `to`, starting at `at_tick`
    pub fn one_way(from: usize, to: usize, at_tick: i64) -> Self {
        Self {
            from,
            to,
            at_tick,
            heal_at: None,
            bidirectional: false,
        }
    }

    /// Cut the link between `a` and `b` in both directions
    pub fn both_ways(a: usize, b: usize, at_tick: i64) -> Self {
        Self {
            bidirectional: true,
            ..Self::one_way(a, b, at_tick)
        }
    }

    /// Restore the link at `tick`
    pub fn healed_at(mut self, tick: i64) -> Self {
        self.heal_at = Some(tick);
        self
    }
}

/// Complete scenario description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of nodes, the introducer included
    pub node_count: usize,
    /// Ticks to run
    pub total_ticks: i64,
    /// Ticks between two consecutive node starts
    pub join_interval: i64,
    /// Probability that the network silently drops a datagram
    pub drop_rate: f64,
    /// Largest datagram the network accepts
    pub max_datagram_size: usize,
    /// Nodes that stop ticking and go silent
    pub crashes: Vec<ScheduledFault>,
    /// Nodes that keep running but are cut off from every peer
    pub isolations: Vec<ScheduledFault>,
    /// Links between two nodes that stop carrying datagrams
    pub partitions: Vec<ScheduledPartition>,
    /// Protocol parameters shared by every node
    pub gossip: GossipConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            node_count: 10,
            total_ticks: 700,
            join_interval: 1,
            drop_rate: 0.0,
            max_datagram_size: 4000,
            crashes: Vec::new(),
            isolations: Vec::new(),
            partitions: Vec::new(),
            gossip: GossipConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Address of the node with the given index
    pub fn node_address(index: usize) -> Address {
        Address::new(index as u32 + 1, 0)
    }

    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        Ok(member_core::config::read_yaml(path)?)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: &Path) -> Result<()> {
        member_core::config::write_yaml(path, self)?;
        Ok(())
    }

    /// Layer an optional YAML file and `MEMBERSIM_*` variables over the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(member_core::config::load_layered(&Self::default(), path, ENV_PREFIX)?)
    }

    /// Size of the largest datagram a group of `node_count` members exchanges:
    /// a two-address message whose piggyback lists every member.
    pub fn largest_datagram(node_count: usize) -> usize {
        let header = Message::IndirectProbe {
            origin: Address::NULL,
            suspect: Address::NULL,
            piggyback: Vec::new(),
        }
        .encoded_len();
        header + node_count * MembershipEntry::WIRE_LEN
    }

    /// Index of the node acting as introducer, if it is part of the scenario
    pub fn introducer_index(&self) -> Option<usize> {
        (0..self.node_count).find(|&i| Self::node_address(i) == self.gossip.introducer)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = self.gossip.validate() {
            bail!("Invalid gossip configuration: {}", e);
        }

        if self.node_count == 0 {
            bail!("Must simulate at least one node");
        }
        if self.node_count > i32::MAX as usize {
            bail!("Node count {} does not fit a node id", self.node_count);
        }
        if self.total_ticks <= 0 {
            bail!("Total ticks must be positive");
        }
        if self.join_interval < 0 {
            bail!("Join interval must not be negative");
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            bail!("Drop rate must be in [0, 1), got {}", self.drop_rate);
        }

        let needed = Self::largest_datagram(self.node_count);
        if self.max_datagram_size < needed {
            bail!(
                "Datagram limit {} is too small for {} nodes (need {})",
                self.max_datagram_size,
                self.node_count,
                needed
            );
        }

        if self.introducer_index().is_none() {
            bail!(
                "Introducer {} is not one of the {} simulated nodes",
                self.gossip.introducer,
                self.node_count
            );
        }

        for (label, faults) in [("crash", &self.crashes), ("isolation", &self.isolations)] {
            for fault in faults {
                if fault.node >= self.node_count {
                    bail!("{} targets node {} but only {} exist", label, fault.node, self.node_count);
                }
                if fault.at_tick < 0 || fault.at_tick > self.total_ticks {
                    bail!("{} of node {} at tick {} is outside the run", label, fault.node, fault.at_tick);
                }
            }
        }

        for partition in &self.partitions {
            if partition.from >= self.node_count || partition.to >= self.node_count {
                bail!(
                    "partition {} -> {} names a node outside the {} simulated",
                    partition.from,
                    partition.to,
                    self.node_count
                );
            }
            if partition.from == partition.to {
                bail!("partition of node {} with itself", partition.from);
            }
            if partition.at_tick < 0 || partition.at_tick > self.total_ticks {
                bail!(
                    "partition {} -> {} at tick {} is outside the run",
                    partition.from,
                    partition.to,
                    partition.at_tick
                );
            }
            if let Some(heal_at) = partition.heal_at {
                if heal_at <= partition.at_tick {
                    bail!(
                        "partition {} -> {} heals at tick {}, before it starts at {}",
                        partition.from,
                        partition.to,
                        heal_at,
                        partition.at_tick
                    );
                }
            }
        }

        Ok(())
    }
}
