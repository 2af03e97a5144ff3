//! Gossip message types and wire codec
//!
//! Every datagram starts with a one-byte kind tag followed by a fixed layout
//! per kind. All integers are little-endian. Messages other than the join
//! pair end with a piggyback: a `u64` entry count and that many
//! [`MembershipEntry`] records of [`MembershipEntry::WIRE_LEN`] bytes each.

use crate::membership::MembershipEntry;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use member_core::{Address, NodeId};
use std::fmt;
use thiserror::Error;

impl MembershipEntry {
    /// Number of bytes an entry occupies on the wire
    pub const WIRE_LEN: usize = 4 + 2 + 8 + 8;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.id);
        buf.put_u16_le(self.port);
        buf.put_i64_le(self.heartbeat);
        buf.put_i64_le(self.last_update);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        let id = buf.get_i32_le();
        let port = buf.get_u16_le();
        let heartbeat = buf.get_i64_le();
        let last_update = buf.get_i64_le();
        Self::new(id, port, heartbeat, last_update)
    }
}

/// Kind tag of a gossip message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    JoinRequest = 0,
    JoinReply = 1,
    Ping = 2,
    Ack = 3,
    IndirectProbe = 4,
    IndirectRequest = 5,
    IndirectReply = 6,
    IndirectAck = 7,
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::JoinRequest,
            1 => Self::JoinReply,
            2 => Self::Ping,
            3 => Self::Ack,
            4 => Self::IndirectProbe,
            5 => Self::IndirectRequest,
            6 => Self::IndirectReply,
            7 => Self::IndirectAck,
            other => return Err(DecodeError::UnknownKind(other)),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::JoinRequest => "JOINREQ",
            Self::JoinReply => "JOINREP",
            Self::Ping => "PING",
            Self::Ack => "ACK",
            Self::IndirectProbe => "INDIRECT_PROBE",
            Self::IndirectRequest => "INDIRECT_REQUEST",
            Self::IndirectReply => "INDIRECT_REPLY",
            Self::IndirectAck => "INDIRECT_ACK",
        };
        f.write_str(name)
    }
}

/// Errors raised while decoding a datagram
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty datagram")]
    Empty,

    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Truncated {kind} message: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        kind: MessageKind,
        needed: usize,
        remaining: usize,
    },

    #[error("{kind} piggyback declares {declared} entries but {remaining} bytes remain")]
    CountMismatch {
        kind: MessageKind,
        declared: u64,
        remaining: usize,
    },

    #[error("{extra} trailing bytes after {kind} message")]
    TrailingBytes { kind: MessageKind, extra: usize },
}

/// A decoded gossip message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the introducer to admit `requester`
    JoinRequest {
        requester: Address,
        heartbeat: i64,
        id: NodeId,
    },

    /// Introducer accepted the join
    JoinReply,

    /// Direct probe
    Ping {
        sender: Address,
        piggyback: Vec<MembershipEntry>,
    },

    /// Answer to a direct probe
    Ack {
        sender: Address,
        piggyback: Vec<MembershipEntry>,
    },

    /// Ask a relay to probe `suspect` on behalf of `origin`
    IndirectProbe {
        origin: Address,
        suspect: Address,
        piggyback: Vec<MembershipEntry>,
    },

    /// Relay probing the suspect
    IndirectRequest {
        origin: Address,
        relay: Address,
        piggyback: Vec<MembershipEntry>,
    },

    /// Suspect answering the relay
    IndirectReply {
        origin: Address,
        responder: Address,
        piggyback: Vec<MembershipEntry>,
    },

    /// Relay confirming to the origin that `confirmed` is alive
    IndirectAck {
        confirmed: Address,
        relay: Address,
        piggyback: Vec<MembershipEntry>,
    },
}

impl Message {
    /// Kind tag of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JoinRequest { .. } => MessageKind::JoinRequest,
            Self::JoinReply => MessageKind::JoinReply,
            Self::Ping { .. } => MessageKind::Ping,
            Self::Ack { .. } => MessageKind::Ack,
            Self::IndirectProbe { .. } => MessageKind::IndirectProbe,
            Self::IndirectRequest { .. } => MessageKind::IndirectRequest,
            Self::IndirectReply { .. } => MessageKind::IndirectReply,
            Self::IndirectAck { .. } => MessageKind::IndirectAck,
        }
    }

    /// Membership entries carried by this message, empty for the join pair
    pub fn piggyback(&self) -> &[MembershipEntry] {
        match self {
            Self::JoinRequest { .. } | Self::JoinReply => &[],
            Self::Ping { piggyback, .. }
            | Self::Ack { piggyback, .. }
            | Self::IndirectProbe { piggyback, .. }
            | Self::IndirectRequest { piggyback, .. }
            | Self::IndirectReply { piggyback, .. }
            | Self::IndirectAck { piggyback, .. } => piggyback,
        }
    }

    /// Exact number of bytes [`Message::encode`] produces
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            Self::JoinRequest { .. } => Address::WIRE_LEN + 8 + 4,
            Self::JoinReply => 0,
            Self::Ping { .. } | Self::Ack { .. } => Address::WIRE_LEN,
            _ => 2 * Address::WIRE_LEN,
        };
        let piggyback = match self {
            Self::JoinRequest { .. } | Self::JoinReply => 0,
            _ => 8 + self.piggyback().len() * MembershipEntry::WIRE_LEN,
        };
        1 + body + piggyback
    }

    /// Encode the message into a datagram
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.kind() as u8);

        match self {
            Self::JoinRequest {
                requester,
                heartbeat,
                id,
            } => {
                requester.encode(&mut buf);
                buf.put_i64_le(*heartbeat);
                buf.put_i32_le(*id);
            }
            Self::JoinReply => {}
            Self::Ping { sender, piggyback } | Self::Ack { sender, piggyback } => {
                sender.encode(&mut buf);
                encode_piggyback(&mut buf, piggyback);
            }
            Self::IndirectProbe {
                origin: first,
                suspect: second,
                piggyback,
            }
            | Self::IndirectRequest {
                origin: first,
                relay: second,
                piggyback,
            }
            | Self::IndirectReply {
                origin: first,
                responder: second,
                piggyback,
            }
            | Self::IndirectAck {
                confirmed: first,
                relay: second,
                piggyback,
            } => {
                first.encode(&mut buf);
                second.encode(&mut buf);
                encode_piggyback(&mut buf, piggyback);
            }
        }

        buf.freeze()
    }

    /// Decode a datagram.
    ///
    /// The whole buffer must be consumed: short input, a piggyback count that
    /// disagrees with the remaining length, or leftover bytes are all errors.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, body) = data.split_first().ok_or(DecodeError::Empty)?;
        let kind = MessageKind::try_from(tag)?;
        let mut reader = Reader { kind, buf: body };

        let message = match kind {
            MessageKind::JoinRequest => {
                let requester = reader.address()?;
                let heartbeat = reader.i64()?;
                let id = reader.i32()?;
                Self::JoinRequest {
                    requester,
                    heartbeat,
                    id,
                }
            }
            MessageKind::JoinReply => Self::JoinReply,
            MessageKind::Ping => Self::Ping {
                sender: reader.address()?,
                piggyback: reader.piggyback()?,
            },
            MessageKind::Ack => Self::Ack {
                sender: reader.address()?,
                piggyback: reader.piggyback()?,
            },
            MessageKind::IndirectProbe => Self::IndirectProbe {
                origin: reader.address()?,
                suspect: reader.address()?,
                piggyback: reader.piggyback()?,
            },
            MessageKind::IndirectRequest => Self::IndirectRequest {
                origin: reader.address()?,
                relay: reader.address()?,
                piggyback: reader.piggyback()?,
            },
            MessageKind::IndirectReply => Self::IndirectReply {
                origin: reader.address()?,
                responder: reader.address()?,
                piggyback: reader.piggyback()?,
            },
            MessageKind::IndirectAck => Self::IndirectAck {
                confirmed: reader.address()?,
                relay: reader.address()?,
                piggyback: reader.piggyback()?,
            },
        };

        reader.finish()?;
        Ok(message)
    }
}

fn encode_piggyback(buf: &mut BytesMut, entries: &[MembershipEntry]) {
    buf.put_u64_le(entries.len() as u64);
    for entry in entries {
        entry.encode(buf);
    }
}

/// Bounds-checked cursor over a datagram body
struct Reader<'a> {
    kind: MessageKind,
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                kind: self.kind,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn address(&mut self) -> Result<Address, DecodeError> {
        self.need(Address::WIRE_LEN)?;
        Address::decode(&mut self.buf).ok_or(DecodeError::Truncated {
            kind: self.kind,
            needed: Address::WIRE_LEN,
            remaining: self.buf.remaining(),
        })
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    fn piggyback(&mut self) -> Result<Vec<MembershipEntry>, DecodeError> {
        self.need(8)?;
        let declared = self.buf.get_u64_le();
        let remaining = self.buf.remaining();

        let expected = usize::try_from(declared)
            .ok()
            .and_then(|count| count.checked_mul(MembershipEntry::WIRE_LEN));
        if expected != Some(remaining) {
            return Err(DecodeError::CountMismatch {
                kind: self.kind,
                declared,
                remaining,
            });
        }

        let mut entries = Vec::with_capacity(remaining / MembershipEntry::WIRE_LEN);
        while self.buf.has_remaining() {
            entries.push(MembershipEntry::decode(&mut self.buf));
        }
        Ok(entries)
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes {
                kind: self.kind,
                extra: self.buf.len(),
            })
        }
    }
}
