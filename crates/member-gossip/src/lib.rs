//! # member-gossip
//!
//! SWIM-style membership and failure detection for membermesh groups.
//!
//! This crate provides:
//! - A per-node membership table merged through piggybacked gossip
//! - Direct and indirect probing with failure declaration
//! - A fixed-layout little-endian wire codec
//! - A synchronous [`Transport`] seam; nodes are driven one tick at a time
//!
//! ## Example
//!
//! ```rust
//! use member_core::Address;
//! use member_gossip::{GossipConfig, GossipNode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GossipConfig::default();
//! let mut introducer = GossipNode::new(config.introducer, config.clone(), 7)?;
//! let mut member = GossipNode::new(Address::new(2, 0), config, 8)?;
//!
//! assert!(introducer.start(0).is_empty());
//! let join = member.start(0);
//! assert_eq!(join.len(), 1);
//! assert!(introducer.is_in_group());
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod config;
pub mod detector;
pub mod event;
pub mod membership;
pub mod message;
pub mod node;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use config::{GossipConfig, ResurrectionPolicy};
pub use detector::{FailureDetector, ProbePhase};
pub use event::{Action, ProtocolEvent};
pub use membership::{MembershipEntry, MembershipStats, MembershipTable, MergeResult, Transition, FAILED};
pub use message::{DecodeError, Message, MessageKind};
pub use node::{GossipNode, NodeState};
pub use transport::{dispatch_actions, Transport};

/// Result type for gossip operations
pub type Result<T> = std::result::Result<T, GossipError>;

/// Errors that can occur during gossip operations
#[derive(Error, Debug)]
pub enum GossipError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Core(#[from] member_core::Error),
}
