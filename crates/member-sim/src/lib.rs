//! # Group simulator for membermesh
//!
//! Runs a whole group of [`member_gossip::GossipNode`]s against an emulated
//! lossy network, one tick at a time, and reports who noticed which join and
//! which failure.
//!
//! ## Features
//!
//! - Staggered joins through a single introducer
//! - Scheduled crashes, isolations and partitions
//! - Seeded datagram loss
//! - A join/removal event log and a JSON summary of the run

pub mod config;
pub mod event_log;
pub mod metrics;
pub mod network;
pub mod runner;

pub use config::{ScheduledFault, ScheduledPartition, SimulationConfig};
pub use event_log::EventLog;
pub use metrics::{FaultReport, NodeView, SimulationSummary};
pub use network::{EmulatedNetwork, NetworkStats};
pub use runner::{AppliedFault, FaultKind, Simulation};
