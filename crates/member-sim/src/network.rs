//! Emulated datagram network with loss, isolation and partitions

use bytes::Bytes;
use member_core::Address;
use member_gossip::{GossipError, Transport};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::trace;

/// Counters kept by the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    /// Datagrams handed to the network
    pub sent: u64,
    /// Datagrams handed to a receiver
    pub delivered: u64,
    /// Datagrams lost to the drop rate, an isolation or a partition
    pub dropped: u64,
}

/// In-memory lossy network shared by every simulated node.
///
/// Datagrams wait in a per-destination inbox until the receiver collects
/// them with [`EmulatedNetwork::receive`]. Partitions are directional: add
/// both `(a, b)` and `(b, a)` to cut a link both ways.
#[derive(Debug)]
pub struct EmulatedNetwork {
    inboxes: BTreeMap<Address, VecDeque<Bytes>>,
    isolated: HashSet<Address>,
    partitions: HashSet<(Address, Address)>,
    drop_rate: f64,
    max_datagram_size: usize,
    rng: SmallRng,
    stats: NetworkStats,
}

impl EmulatedNetwork {
    /// Create a network dropping datagrams with probability `drop_rate`
    pub fn new(drop_rate: f64, max_datagram_size: usize, seed: u64) -> Self {
        Self {
            inboxes: BTreeMap::new(),
            isolated: HashSet::new(),
            partitions: HashSet::new(),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            max_datagram_size,
            rng: SmallRng::seed_from_u64(seed),
            stats: NetworkStats::default(),
        }
    }

    /// Register an endpoint; datagrams to unknown endpoints are dropped
    pub fn register(&mut self, addr: Address) {
        self.inboxes.entry(addr).or_default();
    }

    /// Cut `addr` off from every other endpoint
    pub fn isolate(&mut self, addr: Address) {
        self.isolated.insert(addr);
    }

    pub fn is_isolated(&self, addr: Address) -> bool {
        self.isolated.contains(&addr)
    }

    /// Drop everything sent from `from` to `to`
    pub fn partition(&mut self, from: Address, to: Address) {
        self.partitions.insert((from, to));
    }

    /// Drop everything between `a` and `b` in both directions
    pub fn partition_bidirectional(&mut self, a: Address, b: Address) {
        self.partition(a, b);
        self.partition(b, a);
    }

    /// Remove a directional partition
    pub fn heal_partition(&mut self, from: Address, to: Address) {
        self.partitions.remove(&(from, to));
    }

    /// Remove the partition between `a` and `b` in both directions
    pub fn heal_partition_bidirectional(&mut self, a: Address, b: Address) {
        self.heal_partition(a, b);
        self.heal_partition(b, a);
    }

    /// Whether a datagram from `from` to `to` would be blocked regardless of loss
    pub fn is_blocked(&self, from: Address, to: Address) -> bool {
        self.isolated.contains(&from) || self.isolated.contains(&to) || self.partitions.contains(&(from, to))
    }

    fn should_drop(&mut self) -> bool {
        self.drop_rate > 0.0 && self.rng.gen::<f64>() < self.drop_rate
    }

    /// Take every datagram waiting for `addr`, in arrival order
    pub fn receive(&mut self, addr: Address) -> Vec<Bytes> {
        let Some(inbox) = self.inboxes.get_mut(&addr) else {
            return Vec::new();
        };
        let datagrams: Vec<Bytes> = inbox.drain(..).collect();
        self.stats.delivered += datagrams.len() as u64;
        datagrams
    }

    /// Number of datagrams waiting for `addr`
    pub fn pending_messages(&self, addr: Address) -> usize {
        self.inboxes.get(&addr).map_or(0, VecDeque::len)
    }

    /// Discard everything waiting for `addr`, counting it as dropped
    pub fn discard(&mut self, addr: Address) -> usize {
        let Some(inbox) = self.inboxes.get_mut(&addr) else {
            return 0;
        };
        let count = inbox.len();
        inbox.clear();
        self.stats.dropped += count as u64;
        count
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}

impl Transport for EmulatedNetwork {
    fn send_to(&mut self, from: Address, to: Address, payload: Bytes) -> member_gossip::Result<()> {
        if payload.len() > self.max_datagram_size {
            return Err(GossipError::Transport(format!(
                "datagram of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_datagram_size
            )));
        }

        self.stats.sent += 1;

        if self.is_blocked(from, to) || self.should_drop() {
            trace!("Dropped datagram from {} to {}", from, to);
            self.stats.dropped += 1;
            return Ok(());
        }

        match self.inboxes.get_mut(&to) {
            Some(inbox) => inbox.push_back(payload),
            None => {
                trace!("No endpoint registered at {}", to);
                self.stats.dropped += 1;
            }
        }
        Ok(())
    }
}
