//! Transport seam between the protocol engine and the network

use crate::{event::Action, event::ProtocolEvent, Result};
use bytes::Bytes;
use member_core::Address;
use tracing::{debug, warn};

/// Fire-and-forget datagram delivery.
///
/// Implementations may drop, delay or reject datagrams; the protocol never
/// assumes delivery.
pub trait Transport {
    /// Send one datagram from `from` to `to`
    fn send_to(&mut self, from: Address, to: Address, payload: Bytes) -> Result<()>;
}

/// Encode and send every [`Action::Send`] in `actions` on behalf of `from`.
///
/// Transport failures are logged and skipped. Notifications are returned in
/// their original order.
pub fn dispatch_actions<T>(transport: &mut T, from: Address, actions: Vec<Action>) -> Vec<ProtocolEvent>
where
    T: Transport + ?Sized,
{
    let mut events = Vec::new();

    for action in actions {
        match action {
            Action::Send { to, message } => {
                let kind = message.kind();
                if let Err(e) = transport.send_to(from, to, message.encode()) {
                    warn!("Failed to send {} from {} to {}: {}", kind, from, to, e);
                } else {
                    debug!("Sent {} from {} to {}", kind, from, to);
                }
            }
            Action::Notify(event) => events.push(event),
        }
    }

    events
}
