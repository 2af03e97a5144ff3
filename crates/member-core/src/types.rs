//! Core type definitions for membermesh

use crate::Error;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a group member as carried in membership entries.
///
/// A member's id is the host identifier of its [`Address`], reinterpreted as
/// a signed 32-bit integer.
pub type NodeId = i32;

/// Fixed-width endpoint identity of a node: a host identifier plus a port.
///
/// The all-zero value is the null address ([`Address::NULL`]), a sentinel
/// for "no address". Equality is byte-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    host_id: u32,
    port: u16,
}

impl Address {
    /// The null address
    pub const NULL: Address = Address { host_id: 0, port: 0 };

    /// Number of bytes an address occupies on the wire
    pub const WIRE_LEN: usize = 6;

    /// Create a new address
    pub const fn new(host_id: u32, port: u16) -> Self {
        Self { host_id, port }
    }

    /// Build the address of a membership entry from its id and port
    pub fn from_node(id: NodeId, port: u16) -> Self {
        Self::new(id as u32, port)
    }

    pub fn host_id(&self) -> u32 {
        self.host_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Member id this address maps to
    pub fn node_id(&self) -> NodeId {
        self.host_id as NodeId
    }

    /// Check whether this is the null sentinel
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Write the six wire bytes (little-endian host id, then port)
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.host_id);
        buf.put_u16_le(self.port);
    }

    /// Read an address from the front of `buf`.
    ///
    /// Returns `None` without consuming anything when fewer than
    /// [`Address::WIRE_LEN`] bytes remain.
    pub fn decode<B: Buf>(buf: &mut B) -> Option<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return None;
        }
        let host_id = buf.get_u32_le();
        let port = buf.get_u16_le();
        Some(Self { host_id, port })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.host_id.to_le_bytes();
        write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_address(format!("missing port in '{}'", s)))?;

        let octets = host
            .split('.')
            .map(|part| part.parse::<u8>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::invalid_address(format!("bad host '{}': {}", host, e)))?;
        let octets: [u8; 4] = octets
            .try_into()
            .map_err(|_| Error::invalid_address(format!("host '{}' must have four parts", host)))?;

        let port = port
            .parse::<u16>()
            .map_err(|e| Error::invalid_address(format!("bad port '{}': {}", port, e)))?;

        Ok(Self::new(u32::from_le_bytes(octets), port))
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = Address::new(1, 0);
        assert_eq!(addr.to_string(), "1.0.0.0:0");
        assert_eq!("1.0.0.0:0".parse::<Address>().unwrap(), addr);

        let addr = Address::new(0x0403_0201, 8080);
        assert_eq!(addr.to_string(), "1.2.3.4:8080");
        assert_eq!("1.2.3.4:8080".parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_parse_errors() {
        assert!("1.0.0.0".parse::<Address>().is_err());
        assert!("1.0.0:0".parse::<Address>().is_err());
        assert!("1.0.0.256:0".parse::<Address>().is_err());
        assert!("1.0.0.0:70000".parse::<Address>().is_err());
    }

    #[test]
    fn test_null_address() {
        assert!(Address::NULL.is_null());
        assert!(Address::default().is_null());
        assert!(!Address::new(1, 0).is_null());
        assert!(!Address::new(0, 1).is_null());
    }

    #[test]
    fn test_wire_layout() {
        let addr = Address::new(0x0403_0201, 0x0605);
        let mut buf = Vec::new();
        addr.encode(&mut buf);
        assert_eq!(buf, vec![1, 2, 3, 4, 5, 6]);

        let mut slice = &buf[..];
        assert_eq!(Address::decode(&mut slice), Some(addr));
        assert!(slice.is_empty());
    }

    #[test]
    fn test_decode_short_buffer() {
        let mut slice: &[u8] = &[1, 2, 3, 4, 5];
        assert_eq!(Address::decode(&mut slice), None);
        assert_eq!(slice.len(), 5);
    }

    #[test]
    fn test_node_id_mapping() {
        let addr = Address::from_node(7, 0);
        assert_eq!(addr.node_id(), 7);
        assert_eq!(addr.host_id(), 7);
        assert_eq!(addr.port(), 0);
    }

    #[test]
    fn test_serde_as_string() {
        let addr = Address::new(3, 0);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"3.0.0.0:0\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }
}
