//! Configuration for the gossip protocol

use member_core::Address;
use serde::{Deserialize, Serialize};

/// Default number of ticks between direct probe cycles
pub const DEFAULT_PROBE_PERIOD: u32 = 20;

/// Default number of ticks to wait for a direct ack before probing indirectly
pub const DEFAULT_INDIRECT_WINDOW: u32 = 5;

/// What gossip may do with a member this node has already seen fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResurrectionPolicy {
    /// A strictly newer alive heartbeat revives a failed member
    Allow,
    /// Failed members stay failed until they re-join through the introducer.
    /// A lagging peer can still carry a crashed node's last alive heartbeat,
    /// so reviving on gossip would report the same failure twice.
    #[default]
    Forbid,
}

/// Configuration for the SWIM gossip protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Ticks between direct probe cycles
    pub probe_period: u32,

    /// Ticks to wait for a direct ack before fanning out indirect probes
    pub indirect_window: u32,

    /// Well-known address every node joins through
    pub introducer: Address,

    /// Whether gossip may revive members observed as failed
    pub resurrection: ResurrectionPolicy,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            probe_period: DEFAULT_PROBE_PERIOD,
            indirect_window: DEFAULT_INDIRECT_WINDOW,
            introducer: Address::new(1, 0),
            resurrection: ResurrectionPolicy::Forbid,
        }
    }
}

impl GossipConfig {
    /// Create a new gossip configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe period
    pub fn with_probe_period(mut self, ticks: u32) -> Self {
        self.probe_period = ticks;
        self
    }

    /// Set the indirect window
    pub fn with_indirect_window(mut self, ticks: u32) -> Self {
        self.indirect_window = ticks;
        self
    }

    /// Set the introducer address
    pub fn with_introducer(mut self, introducer: Address) -> Self {
        self.introducer = introducer;
        self
    }

    /// Set the resurrection policy
    pub fn with_resurrection(mut self, policy: ResurrectionPolicy) -> Self {
        self.resurrection = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.probe_period == 0 {
            return Err("Probe period must be greater than zero".to_string());
        }

        if self.indirect_window == 0 {
            return Err("Indirect window must be greater than zero".to_string());
        }

        if self.indirect_window >= self.probe_period {
            return Err(format!(
                "Indirect window ({}) must be shorter than the probe period ({})",
                self.indirect_window, self.probe_period
            ));
        }

        if self.introducer.is_null() {
            return Err("Introducer address must not be the null address".to_string());
        }

        Ok(())
    }
}
