//! Join and removal log of a simulation run

use member_core::Address;
use member_gossip::ProtocolEvent;
use std::path::Path;
use tracing::debug;

/// Every membership change reported by every node, in the order reported
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: ProtocolEvent) {
        debug!("{} [{}] {}", event.reporter(), event.at(), event);
        self.events.push(event);
    }

    pub fn extend<I: IntoIterator<Item = ProtocolEvent>>(&mut self, events: I) {
        for event in events {
            self.record(event);
        }
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of node-added events
    pub fn joins(&self) -> usize {
        self.events.iter().filter(|e| !e.is_removal()).count()
    }

    /// Number of node-removed events
    pub fn removals(&self) -> usize {
        self.events.iter().filter(|e| e.is_removal()).count()
    }

    /// Removal events about `subject`
    pub fn removals_of(&self, subject: Address) -> impl Iterator<Item = &ProtocolEvent> + '_ {
        self.events
            .iter()
            .filter(move |e| e.is_removal() && e.subject() == subject)
    }

    /// Events reported by `reporter`
    pub fn reported_by(&self, reporter: Address) -> impl Iterator<Item = &ProtocolEvent> + '_ {
        self.events.iter().filter(move |e| e.reporter() == reporter)
    }

    /// Render the log, one line per event:
    ///
    /// ```text
    ///  1.0.0.0:0 [3] Node 2.0.0.0:0 joined at time 3
    /// ```
    pub fn render(&self) -> String {
        self.events
            .iter()
            .map(|event| format!(" {} [{}] {}\n", event.reporter(), event.at(), event))
            .collect()
    }

    /// Write the rendered log to `path`
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}
