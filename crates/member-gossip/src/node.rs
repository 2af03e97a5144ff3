//! Gossip node: per-node state and the tick driver

use crate::{
    config::GossipConfig,
    detector::FailureDetector,
    event::Action,
    membership::MembershipTable,
    message::{DecodeError, Message},
    GossipError, Result,
};
use bytes::Bytes;
use member_core::Address;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Mutable protocol state of one node
#[derive(Debug, Clone)]
pub struct NodeState {
    pub(crate) address: Address,
    pub(crate) heartbeat: i64,
    pub(crate) table: MembershipTable,
    pub(crate) in_group: bool,
    pub(crate) detector: FailureDetector,
}

impl NodeState {
    fn new(address: Address, config: &GossipConfig) -> Self {
        Self {
            address,
            heartbeat: 0,
            table: MembershipTable::new(address, 0, 0, config.resurrection),
            in_group: false,
            detector: FailureDetector::new(config.probe_period, config.indirect_window),
        }
    }
}

/// A single group member driven by [`GossipNode::tick`].
///
/// The node never touches the network itself: inbound datagrams are queued
/// with [`GossipNode::enqueue`] and everything it wants to send or report is
/// returned as [`Action`]s.
pub struct GossipNode {
    pub(crate) config: GossipConfig,
    pub(crate) state: NodeState,
    inbox: VecDeque<Bytes>,
    pub(crate) rng: SmallRng,
}

impl GossipNode {
    /// Create a node that is not yet part of the group
    pub fn new(address: Address, config: GossipConfig, seed: u64) -> Result<Self> {
        config.validate().map_err(GossipError::Configuration)?;

        if address.is_null() {
            return Err(GossipError::Configuration(
                "Node address must not be the null address".to_string(),
            ));
        }

        Ok(Self {
            state: NodeState::new(address, &config),
            config,
            inbox: VecDeque::new(),
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Enter the group.
    ///
    /// The introducer admits itself; every other node asks the introducer to
    /// be admitted and stays out of the group until the reply arrives.
    pub fn start(&mut self, now: i64) -> Vec<Action> {
        self.state.table.touch_self(self.state.heartbeat, now);

        if self.is_introducer() {
            info!("{} starting up group as introducer", self.state.address);
            self.state.in_group = true;
            return Vec::new();
        }

        info!(
            "{} requesting to join through {}",
            self.state.address, self.config.introducer
        );
        vec![Action::send(
            self.config.introducer,
            Message::JoinRequest {
                requester: self.state.address,
                heartbeat: self.state.heartbeat,
                id: self.state.address.node_id(),
            },
        )]
    }

    /// Queue an inbound datagram for the next tick
    pub fn enqueue(&mut self, datagram: Bytes) {
        self.inbox.push_back(datagram);
    }

    /// Number of datagrams waiting for the next tick
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Run one time unit: drain the inbox, then advance heartbeat and timers
    pub fn tick(&mut self, now: i64) -> Vec<Action> {
        let mut actions = Vec::new();

        while let Some(datagram) = self.inbox.pop_front() {
            let message = match Message::decode(&datagram) {
                Ok(message) => message,
                Err(e @ DecodeError::UnknownKind(_)) => {
                    error!("{} dropping datagram: {}", self.state.address, e);
                    continue;
                }
                Err(e) => {
                    warn!("{} dropping malformed datagram: {}", self.state.address, e);
                    continue;
                }
            };

            match self.handle_message(message, now) {
                Ok(mut produced) => actions.append(&mut produced),
                Err(e @ GossipError::ProtocolViolation(_)) => {
                    error!("{} rejected message: {}", self.state.address, e)
                }
                Err(e) => warn!("{} failed to handle message: {}", self.state.address, e),
            }
        }

        if !self.state.in_group {
            return actions;
        }

        self.state.heartbeat += 1;
        self.state.table.touch_self(self.state.heartbeat, now);
        self.state.detector.count_down();

        if self.state.detector.probe_due() {
            actions.extend(self.run_probe_cycle(now));
        }

        if self.state.detector.indirect_due() {
            actions.extend(self.escalate_probe());
        }

        actions
    }

    /// Handle one decoded message
    pub fn handle_message(&mut self, message: Message, now: i64) -> Result<Vec<Action>> {
        debug!("{} handling {}", self.state.address, message.kind());

        match message {
            Message::JoinRequest {
                requester,
                heartbeat,
                id,
            } => self.on_join_request(requester, heartbeat, id, now),
            Message::JoinReply => Ok(self.on_join_reply(now)),
            Message::Ping { sender, piggyback } => self.on_ping(sender, &piggyback, now),
            Message::Ack { sender, piggyback } => self.on_ack(sender, &piggyback, now),
            Message::IndirectProbe {
                origin,
                suspect,
                piggyback,
            } => self.on_indirect_probe(origin, suspect, &piggyback, now),
            Message::IndirectRequest {
                origin,
                relay,
                piggyback,
            } => self.on_indirect_request(origin, relay, &piggyback, now),
            Message::IndirectReply {
                origin,
                responder,
                piggyback,
            } => self.on_indirect_reply(origin, responder, &piggyback, now),
            Message::IndirectAck {
                confirmed,
                relay,
                piggyback,
            } => self.on_indirect_ack(confirmed, relay, &piggyback, now),
        }
    }

    pub fn address(&self) -> Address {
        self.state.address
    }

    pub fn heartbeat(&self) -> i64 {
        self.state.heartbeat
    }

    pub fn is_in_group(&self) -> bool {
        self.state.in_group
    }

    pub fn is_introducer(&self) -> bool {
        self.state.address == self.config.introducer
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Current membership table
    pub fn table(&self) -> &MembershipTable {
        &self.state.table
    }

    pub fn detector(&self) -> &FailureDetector {
        &self.state.detector
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }
}

impl NodeState {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn heartbeat(&self) -> i64 {
        self.heartbeat
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    pub fn in_group(&self) -> bool {
        self.in_group
    }

    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResurrectionPolicy;
    use crate::detector::ProbePhase;
    use crate::event::ProtocolEvent;
    use crate::membership::MembershipEntry;
    use crate::message::MessageKind;
    use std::collections::{HashMap, HashSet};

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    /// Nodes wired together by hand: everything sent in tick `t` is
    /// delivered before tick `t + 1`.
    struct Cluster {
        nodes: Vec<GossipNode>,
        events: Vec<ProtocolEvent>,
        blocked: HashSet<(Address, Address)>,
        isolated: HashSet<Address>,
        delivered: HashMap<MessageKind, usize>,
        now: i64,
    }

    impl Cluster {
        fn new(count: u32) -> Self {
            let nodes = (1..=count)
                .map(|i| GossipNode::new(Address::new(i, 0), GossipConfig::default(), i as u64).unwrap())
                .collect();

            Self {
                nodes,
                events: Vec::new(),
                blocked: HashSet::new(),
                isolated: HashSet::new(),
                delivered: HashMap::new(),
                now: 0,
            }
        }

        fn start(&mut self) {
            let mut outgoing = Vec::new();
            for node in &mut self.nodes {
                let from = node.address();
                outgoing.extend(node.start(self.now).into_iter().map(|a| (from, a)));
            }
            self.route(outgoing);
        }

        fn step(&mut self) {
            self.now += 1;
            let mut outgoing = Vec::new();
            for node in &mut self.nodes {
                let from = node.address();
                outgoing.extend(node.tick(self.now).into_iter().map(|a| (from, a)));
            }
            self.route(outgoing);
        }

        fn run(&mut self, ticks: usize) {
            for _ in 0..ticks {
                self.step();
            }
        }

        fn route(&mut self, outgoing: Vec<(Address, Action)>) {
            for (from, action) in outgoing {
                match action {
                    Action::Notify(event) => self.events.push(event),
                    Action::Send { to, message } => {
                        if self.isolated.contains(&from)
                            || self.isolated.contains(&to)
                            || self.blocked.contains(&(from, to))
                        {
                            continue;
                        }
                        if let Some(node) = self.nodes.iter_mut().find(|n| n.address() == to) {
                            *self.delivered.entry(message.kind()).or_default() += 1;
                            node.enqueue(message.encode());
                        }
                    }
                }
            }
        }

        fn node(&self, host_id: u32) -> &GossipNode {
            &self.nodes[host_id as usize - 1]
        }

        fn removals(&self, reporter: u32, subject: u32) -> usize {
            self.events
                .iter()
                .filter(|e| {
                    e.is_removal()
                        && e.reporter() == Address::new(reporter, 0)
                        && e.subject() == Address::new(subject, 0)
                })
                .count()
        }

        fn total_removals(&self) -> usize {
            self.events.iter().filter(|e| e.is_removal()).count()
        }
    }

    fn introducer() -> GossipNode {
        introducer_with(GossipConfig::default())
    }

    fn introducer_with(config: GossipConfig) -> GossipNode {
        let mut node = GossipNode::new(Address::new(1, 0), config, 1).unwrap();
        assert!(node.start(0).is_empty());
        node
    }

    fn join(node: &mut GossipNode, host_id: u32, now: i64) -> Vec<Action> {
        node.enqueue(
            Message::JoinRequest {
                requester: Address::new(host_id, 0),
                heartbeat: 0,
                id: host_id as i32,
            }
            .encode(),
        );
        node.tick(now)
    }

    fn removed(actions: &[Action]) -> Vec<Address> {
        actions
            .iter()
            .filter_map(Action::event)
            .filter(|e| e.is_removal())
            .map(|e| e.subject())
            .collect()
    }

    #[test]
    fn test_node_creation() {
        let node = GossipNode::new(Address::new(2, 0), GossipConfig::default(), 0).unwrap();
        assert!(!node.is_in_group());
        assert!(!node.is_introducer());
        assert_eq!(node.table().len(), 1);
        assert_eq!(node.heartbeat(), 0);

        assert!(GossipNode::new(Address::NULL, GossipConfig::default(), 0).is_err());
        let invalid = GossipConfig::default().with_probe_period(0);
        assert!(matches!(
            GossipNode::new(Address::new(2, 0), invalid, 0),
            Err(GossipError::Configuration(_))
        ));
    }

    #[test]
    fn test_start_sends_join_request() {
        let mut node = GossipNode::new(Address::new(2, 0), GossipConfig::default(), 0).unwrap();
        let actions = node.start(0);

        assert_eq!(
            actions,
            vec![Action::send(
                Address::new(1, 0),
                Message::JoinRequest {
                    requester: Address::new(2, 0),
                    heartbeat: 0,
                    id: 2,
                }
            )]
        );

        // out of group nodes neither beat nor probe
        assert!(node.tick(1).is_empty());
        assert_eq!(node.heartbeat(), 0);
    }

    #[test]
    fn test_heartbeat_advances_once_per_tick() {
        let mut node = introducer();
        for now in 1..=3 {
            node.tick(now);
        }
        assert_eq!(node.heartbeat(), 3);
        assert_eq!(node.table().get(1).unwrap().heartbeat, 3);
    }

    #[test]
    fn test_malformed_datagrams_are_dropped() {
        init_logging();
        let mut node = introducer();
        node.enqueue(Bytes::from_static(&[]));
        node.enqueue(Bytes::from_static(&[42, 1, 2]));
        node.enqueue(Bytes::from_static(&[2, 1, 0]));
        assert_eq!(node.pending(), 3);

        assert!(node.tick(1).is_empty());
        assert_eq!(node.pending(), 0);
        assert_eq!(node.table().len(), 1);
    }

    #[test]
    fn test_unconfirmed_failure_is_declared_once() {
        init_logging();
        let mut node = introducer();
        join(&mut node, 2, 1);

        let mut all = Vec::new();
        for now in 2..=4 {
            all.extend(node.tick(now));
        }

        // the first cycle fires once the initial window elapses
        let actions = node.tick(5);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Send { to, message: Message::Ping { .. } } if *to == Address::new(2, 0)
        )));
        assert_eq!(node.detector().phase(), ProbePhase::AwaitingAck { target: 2 });

        for now in 6..=10 {
            all.extend(node.tick(now));
        }
        // nobody to relay through, so escalation sends nothing
        assert_eq!(node.detector().phase(), ProbePhase::AwaitingIndirectAck { target: 2 });
        assert!(all.is_empty());

        for now in 11..=24 {
            assert!(node.tick(now).is_empty());
        }

        let actions = node.tick(25);
        assert_eq!(removed(&actions), vec![Address::new(2, 0)]);
        assert_eq!(
            actions[0],
            Action::Notify(ProtocolEvent::NodeRemoved {
                reporter: Address::new(1, 0),
                subject: Address::new(2, 0),
                at: 25,
            })
        );
        assert!(node.table().get(2).unwrap().is_failed());

        for now in 26..=200 {
            assert!(removed(&node.tick(now)).is_empty());
        }
    }

    #[test]
    fn test_declared_failure_ignores_lagging_gossip() {
        for (policy, revived) in [(ResurrectionPolicy::Forbid, false), (ResurrectionPolicy::Allow, true)] {
            let mut node = introducer_with(GossipConfig::default().with_resurrection(policy));
            join(&mut node, 2, 1);
            let mut removals = 0;
            for now in 2..=25 {
                removals += removed(&node.tick(now)).len();
            }
            assert_eq!(removals, 1);

            // a peer that has not noticed the crash still carries a newer alive heartbeat
            node.enqueue(
                Message::Ping {
                    sender: Address::new(3, 0),
                    piggyback: vec![MembershipEntry::alive(Address::new(2, 0), 7, 20)],
                }
                .encode(),
            );
            let actions = node.tick(26);
            let added = actions
                .iter()
                .filter_map(Action::event)
                .any(|e| !e.is_removal() && e.subject() == Address::new(2, 0));

            assert_eq!(added, revived, "{:?}", policy);
            assert_eq!(node.table().get(2).unwrap().is_alive(), revived, "{:?}", policy);
        }
    }

    #[test]
    fn test_escalation_fans_out_to_other_members() {
        let mut node = introducer();
        join(&mut node, 2, 1);
        join(&mut node, 3, 2);
        for now in 3..=4 {
            node.tick(now);
        }

        let probe = node.tick(5);
        let target = node.detector().target().unwrap();
        assert_eq!(probe.len(), 1);

        for now in 6..=9 {
            assert!(node.tick(now).is_empty());
        }

        let actions = node.tick(10);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::Send {
                to,
                message: Message::IndirectProbe { origin, suspect, .. },
            } => {
                assert_ne!(to.node_id(), target);
                assert_eq!(*origin, Address::new(1, 0));
                assert_eq!(suspect.node_id(), target);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_late_ack_exonerates_target() {
        let mut node = introducer();
        join(&mut node, 2, 1);
        for now in 2..=10 {
            node.tick(now);
        }
        assert_eq!(node.detector().phase(), ProbePhase::AwaitingIndirectAck { target: 2 });

        node.enqueue(
            Message::Ack {
                sender: Address::new(2, 0),
                piggyback: vec![],
            }
            .encode(),
        );
        node.tick(11);
        assert_eq!(node.detector().target(), None);

        for now in 12..=25 {
            assert!(removed(&node.tick(now)).is_empty());
        }
        assert!(node.table().get(2).unwrap().is_alive());
    }

    #[test]
    fn test_direct_probe_success() {
        let mut cluster = Cluster::new(2);
        cluster.start();
        cluster.run(300);

        assert_eq!(cluster.total_removals(), 0);
        assert!(cluster.delivered[&MessageKind::Ack] > 0);
        assert!(cluster.node(1).table().get(2).unwrap().is_alive());
        assert!(cluster.node(2).table().get(1).unwrap().is_alive());
        assert_eq!(cluster.node(1).table().live_neighbors(), 1);
    }

    #[test]
    fn test_three_nodes_converge() {
        let mut cluster = Cluster::new(3);
        cluster.start();
        cluster.run(2);

        // admitted at tick 1, joined at tick 2 with the first pings queued at A
        assert!(cluster.node(2).is_in_group());
        assert!(cluster.node(3).is_in_group());
        assert_eq!(cluster.node(1).pending(), 2);

        cluster.run(38);
        let early: Vec<i64> = (2..=3).map(|h| cluster.node(h).table().get(1).unwrap().heartbeat).collect();

        // each probe round refreshes the view of A, directly or through the
        // third node, so it never trails A by more than two rounds
        let bound = 2 * i64::from(GossipConfig::default().probe_period) + 4;
        for _ in 0..60 {
            cluster.step();
            let current = cluster.node(1).heartbeat();
            for host_id in 2..=3 {
                let seen = cluster.node(host_id).table().get(1).unwrap().heartbeat;
                assert!(current - seen <= bound, "node {} sees {} while A is at {}", host_id, seen, current);
            }
        }
        for (host_id, early) in (2..=3).zip(early) {
            assert!(cluster.node(host_id).table().get(1).unwrap().heartbeat > early);
        }

        for host_id in 1..=3 {
            let table = cluster.node(host_id).table();
            assert_eq!(table.len(), 3);
            assert_eq!(table.live_neighbors(), 2);
        }
        assert_eq!(cluster.total_removals(), 0);
    }

    #[test]
    fn test_indirect_confirmation() {
        let mut cluster = Cluster::new(3);
        cluster.start();
        cluster.run(10);

        // A can no longer reach B directly, but C can relay
        cluster.blocked.insert((Address::new(1, 0), Address::new(2, 0)));
        cluster.run(600);

        assert_eq!(cluster.total_removals(), 0);
        assert!(cluster.delivered[&MessageKind::IndirectAck] > 0);
        assert!(cluster.node(1).table().get(2).unwrap().is_alive());
    }

    #[test]
    fn test_partition_during_indirect_probe() {
        let mut cluster = Cluster::new(3);
        cluster.start();
        cluster.run(10);

        cluster.blocked.insert((Address::new(1, 0), Address::new(2, 0)));
        let mut escalated = false;
        for _ in 0..1000 {
            cluster.step();
            if cluster.node(1).detector().phase() == (ProbePhase::AwaitingIndirectAck { target: 2 }) {
                escalated = true;
                break;
            }
        }
        assert!(escalated);

        // cut B off entirely while the relay is in flight
        cluster.isolated.insert(Address::new(2, 0));
        cluster.run(300);

        assert_eq!(cluster.removals(1, 2), 1);
        assert!(cluster.node(1).table().get(2).unwrap().is_failed());
        assert_eq!(cluster.removals(1, 3), 0);
    }

    #[test]
    fn test_crashed_node_removed_by_every_survivor() {
        let mut cluster = Cluster::new(4);
        cluster.start();
        cluster.run(40);

        cluster.isolated.insert(Address::new(4, 0));
        cluster.run(800);

        for reporter in 1..=3 {
            assert_eq!(cluster.removals(reporter, 4), 1, "reporter {}", reporter);
        }
    }
}
