//! Probe scheduling for the failure detector
//!
//! The detector only keeps counters and the current probe target. Picking
//! targets, sending messages and touching the membership table is done by
//! [`crate::GossipNode`].

use member_core::NodeId;

/// Where the current probe cycle stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// No target outstanding
    Idle,
    /// Ping sent, waiting for a direct ack
    AwaitingAck { target: NodeId },
    /// Indirect probes sent, waiting for a relay to confirm
    AwaitingIndirectAck { target: NodeId },
}

impl ProbePhase {
    pub fn target(&self) -> Option<NodeId> {
        match self {
            Self::Idle => None,
            Self::AwaitingAck { target } | Self::AwaitingIndirectAck { target } => Some(*target),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureDetector {
    probe_period: u32,
    indirect_window: u32,
    probe_countdown: u32,
    indirect_countdown: Option<u32>,
    phase: ProbePhase,
}

impl FailureDetector {
    /// The first cycle fires after `indirect_window` ticks, with the window disarmed.
    pub fn new(probe_period: u32, indirect_window: u32) -> Self {
        Self {
            probe_period,
            indirect_window,
            probe_countdown: indirect_window,
            indirect_countdown: None,
            phase: ProbePhase::Idle,
        }
    }

    /// Advance both counters by one tick
    pub fn count_down(&mut self) {
        self.probe_countdown = self.probe_countdown.saturating_sub(1);
        if let Some(window) = self.indirect_countdown.as_mut() {
            *window = window.saturating_sub(1);
        }
    }

    /// Whether the probe period has elapsed
    pub fn probe_due(&self) -> bool {
        self.probe_countdown == 0
    }

    /// Whether the indirect window has elapsed without an ack
    pub fn indirect_due(&self) -> bool {
        self.indirect_countdown == Some(0)
    }

    /// Take the target left over from the previous cycle, leaving the detector idle
    pub fn take_outstanding(&mut self) -> Option<NodeId> {
        let target = self.phase.target();
        self.phase = ProbePhase::Idle;
        target
    }

    /// Start a new cycle against `target`, or idle when there is none
    pub fn begin_probe(&mut self, target: Option<NodeId>) {
        self.probe_countdown = self.probe_period;
        match target {
            Some(target) => {
                self.indirect_countdown = Some(self.indirect_window);
                self.phase = ProbePhase::AwaitingAck { target };
            }
            None => {
                self.indirect_countdown = None;
                self.phase = ProbePhase::Idle;
            }
        }
    }

    /// Close the indirect window and return the target to probe indirectly
    pub fn escalate(&mut self) -> Option<NodeId> {
        self.indirect_countdown = None;
        match self.phase {
            ProbePhase::AwaitingAck { target } => {
                self.phase = ProbePhase::AwaitingIndirectAck { target };
                Some(target)
            }
            _ => None,
        }
    }

    /// Record that `id` answered; returns `true` when it was the outstanding target
    pub fn confirm(&mut self, id: NodeId) -> bool {
        if self.phase.target() != Some(id) {
            return false;
        }
        self.phase = ProbePhase::Idle;
        self.indirect_countdown = None;
        true
    }

    /// Drop `id` as a target without declaring anything
    pub fn forget(&mut self, id: NodeId) {
        if self.phase.target() == Some(id) {
            self.phase = ProbePhase::Idle;
            self.indirect_countdown = None;
        }
    }

    pub fn phase(&self) -> ProbePhase {
        self.phase
    }

    pub fn target(&self) -> Option<NodeId> {
        self.phase.target()
    }

    pub fn probe_countdown(&self) -> u32 {
        self.probe_countdown
    }

    pub fn indirect_countdown(&self) -> Option<u32> {
        self.indirect_countdown
    }
}
