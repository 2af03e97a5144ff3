//! SWIM protocol handlers
//!
//! Each handler takes the node state plus one message and returns the
//! actions to perform. The indirect probe chain is stateless at the relay
//! and at the suspect: every hop is driven by the addresses the message
//! carries.

use crate::{
    event::{Action, ProtocolEvent},
    membership::{MembershipEntry, MergeResult, Transition},
    message::Message,
    node::GossipNode,
    GossipError, Result,
};
use member_core::{Address, NodeId};
use tracing::{debug, info, warn};

fn require_address(addr: Address, role: &str) -> Result<()> {
    if addr.is_null() {
        return Err(GossipError::ProtocolViolation(format!("null {} address", role)));
    }
    Ok(())
}

impl GossipNode {
    fn added(&self, subject: Address, now: i64) -> Action {
        Action::Notify(ProtocolEvent::NodeAdded {
            reporter: self.state.address,
            subject,
            at: now,
        })
    }

    fn removed(&self, subject: Address, now: i64) -> Action {
        Action::Notify(ProtocolEvent::NodeRemoved {
            reporter: self.state.address,
            subject,
            at: now,
        })
    }

    fn snapshot(&self) -> Vec<MembershipEntry> {
        self.state.table.snapshot()
    }

    /// Merge a piggyback into the table, reporting each liveness transition once
    pub(crate) fn merge_piggyback(&mut self, entries: &[MembershipEntry], now: i64) -> Vec<Action> {
        let mut actions = Vec::new();

        for entry in entries {
            match self.state.table.upsert(entry, now) {
                MergeResult::Added { alive: true } | MergeResult::Updated(Transition::Revived) => {
                    actions.push(self.added(entry.address(), now));
                }
                MergeResult::Updated(Transition::Failed) => {
                    info!(
                        "{} learned through gossip that {} failed",
                        self.state.address,
                        entry.address()
                    );
                    self.state.detector.forget(entry.id);
                    actions.push(self.removed(entry.address(), now));
                }
                MergeResult::Added { alive: false }
                | MergeResult::Updated(Transition::Refreshed)
                | MergeResult::Stale
                | MergeResult::SelfSeen => {}
            }
        }

        actions
    }

    pub(crate) fn on_join_request(
        &mut self,
        requester: Address,
        heartbeat: i64,
        id: NodeId,
        now: i64,
    ) -> Result<Vec<Action>> {
        require_address(requester, "requester")?;

        if id != requester.node_id() {
            debug!(
                "{} join request id {} differs from address {}",
                self.state.address, id, requester
            );
        }

        let mut actions = Vec::new();
        let entry = MembershipEntry::new(requester.node_id(), requester.port(), heartbeat, now);
        if self.state.table.admit(entry, now) {
            info!("{} admitted {} to the group", self.state.address, requester);
            actions.push(self.added(requester, now));
        } else {
            debug!("{} repeated join request from {}", self.state.address, requester);
        }

        actions.push(Action::send(requester, Message::JoinReply));
        Ok(actions)
    }

    pub(crate) fn on_join_reply(&mut self, now: i64) -> Vec<Action> {
        if self.state.in_group {
            debug!("{} ignoring join reply while in group", self.state.address);
            return Vec::new();
        }

        info!("{} joined the group", self.state.address);
        self.state.in_group = true;

        let mut actions = Vec::new();
        let introducer = self.config.introducer;
        if self.state.table.admit(MembershipEntry::alive(introducer, 0, now), now) {
            actions.push(self.added(introducer, now));
        }

        actions.extend(self.run_probe_cycle(now));
        actions
    }

    pub(crate) fn on_ping(
        &mut self,
        sender: Address,
        piggyback: &[MembershipEntry],
        now: i64,
    ) -> Result<Vec<Action>> {
        require_address(sender, "ping sender")?;

        let mut actions = self.merge_piggyback(piggyback, now);
        actions.push(Action::send(
            sender,
            Message::Ack {
                sender: self.state.address,
                piggyback: self.snapshot(),
            },
        ));
        Ok(actions)
    }

    pub(crate) fn on_ack(
        &mut self,
        sender: Address,
        piggyback: &[MembershipEntry],
        now: i64,
    ) -> Result<Vec<Action>> {
        require_address(sender, "ack sender")?;

        let actions = self.merge_piggyback(piggyback, now);
        if self.state.detector.confirm(sender.node_id()) {
            debug!("{} got ack from {}", self.state.address, sender);
        }
        Ok(actions)
    }

    pub(crate) fn on_indirect_probe(
        &mut self,
        origin: Address,
        suspect: Address,
        piggyback: &[MembershipEntry],
        now: i64,
    ) -> Result<Vec<Action>> {
        require_address(origin, "probe origin")?;
        require_address(suspect, "probe suspect")?;

        let mut actions = self.merge_piggyback(piggyback, now);
        debug!("{} relaying probe of {} for {}", self.state.address, suspect, origin);
        actions.push(Action::send(
            suspect,
            Message::IndirectRequest {
                origin,
                relay: self.state.address,
                piggyback: self.snapshot(),
            },
        ));
        Ok(actions)
    }

    pub(crate) fn on_indirect_request(
        &mut self,
        origin: Address,
        relay: Address,
        piggyback: &[MembershipEntry],
        now: i64,
    ) -> Result<Vec<Action>> {
        require_address(origin, "request origin")?;
        require_address(relay, "request relay")?;

        let mut actions = self.merge_piggyback(piggyback, now);
        actions.push(Action::send(
            relay,
            Message::IndirectReply {
                origin,
                responder: self.state.address,
                piggyback: self.snapshot(),
            },
        ));
        Ok(actions)
    }

    pub(crate) fn on_indirect_reply(
        &mut self,
        origin: Address,
        responder: Address,
        piggyback: &[MembershipEntry],
        now: i64,
    ) -> Result<Vec<Action>> {
        require_address(origin, "reply origin")?;
        require_address(responder, "reply responder")?;

        let mut actions = self.merge_piggyback(piggyback, now);
        actions.push(Action::send(
            origin,
            Message::IndirectAck {
                confirmed: responder,
                relay: self.state.address,
                piggyback: self.snapshot(),
            },
        ));
        Ok(actions)
    }

    pub(crate) fn on_indirect_ack(
        &mut self,
        confirmed: Address,
        relay: Address,
        piggyback: &[MembershipEntry],
        now: i64,
    ) -> Result<Vec<Action>> {
        require_address(confirmed, "confirmed")?;
        require_address(relay, "ack relay")?;

        let actions = self.merge_piggyback(piggyback, now);
        if self.state.detector.confirm(confirmed.node_id()) {
            debug!("{} confirmed {} through {}", self.state.address, confirmed, relay);
        }
        Ok(actions)
    }

    /// Close the previous cycle and ping a fresh random target.
    ///
    /// A target still outstanding at this point never answered, directly or
    /// through a relay, and is declared failed.
    pub(crate) fn run_probe_cycle(&mut self, now: i64) -> Vec<Action> {
        let mut actions = Vec::new();

        if let Some(target) = self.state.detector.take_outstanding() {
            if self.state.table.mark_failed(target) {
                let subject = self
                    .state
                    .table
                    .get(target)
                    .map(MembershipEntry::address)
                    .unwrap_or_else(|| Address::from_node(target, 0));
                info!("{} declared {} failed", self.state.address, subject);
                actions.push(self.removed(subject, now));
            }
        }

        let target = self.state.table.pick_random_alive(&[], &mut self.rng);
        match target {
            Some(target) => {
                debug!("{} probing {}", self.state.address, target);
                actions.push(Action::send(
                    target,
                    Message::Ping {
                        sender: self.state.address,
                        piggyback: self.snapshot(),
                    },
                ));
                self.state.detector.begin_probe(Some(target.node_id()));
            }
            None => {
                debug!("{} has nobody to probe", self.state.address);
                self.state.detector.begin_probe(None);
            }
        }

        actions
    }

    /// Ask every other alive member to probe the silent target
    pub(crate) fn escalate_probe(&mut self) -> Vec<Action> {
        let Some(target) = self.state.detector.escalate() else {
            return Vec::new();
        };

        let Some(suspect) = self.state.table.get(target).map(MembershipEntry::address) else {
            warn!("{} lost probe target {} from its table", self.state.address, target);
            self.state.detector.forget(target);
            return Vec::new();
        };

        let relays: Vec<Address> = self
            .state
            .table
            .alive_peers()
            .filter(|e| e.id != target)
            .map(MembershipEntry::address)
            .collect();

        if relays.is_empty() {
            debug!("{} has no relay to probe {}", self.state.address, suspect);
            return Vec::new();
        }

        debug!(
            "{} probing {} indirectly through {} members",
            self.state.address,
            suspect,
            relays.len()
        );

        let piggyback = self.snapshot();
        relays
            .into_iter()
            .map(|relay| {
                Action::send(
                    relay,
                    Message::IndirectProbe {
                        origin: self.state.address,
                        suspect,
                        piggyback: piggyback.clone(),
                    },
                )
            })
            .collect()
    }
}
