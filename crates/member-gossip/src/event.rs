//! Events and actions produced by the protocol engine

use crate::message::Message;
use member_core::Address;
use serde::Serialize;
use std::fmt;

/// Membership change observed by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// `subject` entered the reporter's table as alive
    NodeAdded {
        reporter: Address,
        subject: Address,
        at: i64,
    },

    /// `reporter` observed `subject` fail
    NodeRemoved {
        reporter: Address,
        subject: Address,
        at: i64,
    },
}

impl ProtocolEvent {
    /// Node whose table changed
    pub fn reporter(&self) -> Address {
        match self {
            Self::NodeAdded { reporter, .. } | Self::NodeRemoved { reporter, .. } => *reporter,
        }
    }

    /// Node the event is about
    pub fn subject(&self) -> Address {
        match self {
            Self::NodeAdded { subject, .. } | Self::NodeRemoved { subject, .. } => *subject,
        }
    }

    /// Tick at which the event happened
    pub fn at(&self) -> i64 {
        match self {
            Self::NodeAdded { at, .. } | Self::NodeRemoved { at, .. } => *at,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::NodeRemoved { .. })
    }
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeAdded { subject, at, .. } => write!(f, "Node {} joined at time {}", subject, at),
            Self::NodeRemoved { subject, at, .. } => write!(f, "Node {} removed at time {}", subject, at),
        }
    }
}

/// Side effect requested by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `message` to `to`
    Send { to: Address, message: Message },

    /// Report a membership change
    Notify(ProtocolEvent),
}

impl Action {
    pub fn send(to: Address, message: Message) -> Self {
        Self::Send { to, message }
    }

    /// The event carried by a notification, if any
    pub fn event(&self) -> Option<&ProtocolEvent> {
        match self {
            Self::Notify(event) => Some(event),
            Self::Send { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = ProtocolEvent::NodeRemoved {
            reporter: Address::new(1, 0),
            subject: Address::new(2, 0),
            at: 42,
        };
        assert_eq!(event.reporter(), Address::new(1, 0));
        assert_eq!(event.subject(), Address::new(2, 0));
        assert_eq!(event.at(), 42);
        assert!(event.is_removal());
        assert_eq!(event.to_string(), "Node 2.0.0.0:0 removed at time 42");
    }

    #[test]
    fn test_event_serialization() {
        let event = ProtocolEvent::NodeAdded {
            reporter: Address::new(1, 0),
            subject: Address::new(3, 0),
            at: 7,
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["event"], "node_added");
        assert_eq!(json["subject"], "3.0.0.0:0");
        assert_eq!(json["at"], 7);
    }

    #[test]
    fn test_action_event() {
        let event = ProtocolEvent::NodeAdded {
            reporter: Address::new(1, 0),
            subject: Address::new(3, 0),
            at: 7,
        };
        assert_eq!(Action::Notify(event).event(), Some(&event));
        assert!(Action::send(Address::new(3, 0), Message::JoinReply).event().is_none());
    }
}
