//! Flow keys and their wire layout
//!
//! The hashing units on the device consume header fields in network byte
//! order. [`FlowKey::to_bytes`] must produce exactly that byte string, or
//! Count-Min column indices computed here silently diverge from the ones the
//! data plane increments.

use alloc::vec::Vec;
use core::net::Ipv4Addr;

use crate::error::{ConfigError, Result};

/// Length of the five-tuple encoding
pub const FIVE_TUPLE_LEN: usize = 13;

/// IPv4 five-tuple identifying a flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowKey {
    /// Source address
    pub src_addr: Ipv4Addr,
    /// Destination address
    pub dst_addr: Ipv4Addr,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// IP protocol number
    pub protocol: u8,
}

impl FlowKey {
    /// IP protocol number for TCP
    pub const TCP: u8 = 6;
    /// IP protocol number for UDP
    pub const UDP: u8 = 17;

    /// Create a flow key
    pub fn new(
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// TCP flow key
    pub fn tcp(src_addr: Ipv4Addr, dst_addr: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        Self::new(src_addr, dst_addr, src_port, dst_port, Self::TCP)
    }

    /// Encode as 4 + 4 + 2 + 2 + 1 bytes, network order
    pub fn to_bytes(&self) -> [u8; FIVE_TUPLE_LEN] {
        let mut out = [0u8; FIVE_TUPLE_LEN];
        out[0..4].copy_from_slice(&self.src_addr.octets());
        out[4..8].copy_from_slice(&self.dst_addr.octets());
        out[8..10].copy_from_slice(&self.src_port.to_be_bytes());
        out[10..12].copy_from_slice(&self.dst_port.to_be_bytes());
        out[12] = self.protocol;
        out
    }

    /// Parse the 13-byte encoding produced by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; FIVE_TUPLE_LEN] =
            bytes.try_into().map_err(|_| ConfigError::KeyLength {
                expected: FIVE_TUPLE_LEN,
                found: bytes.len(),
            })?;

        Ok(Self {
            src_addr: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            dst_addr: Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]),
            src_port: u16::from_be_bytes([bytes[8], bytes[9]]),
            dst_port: u16::from_be_bytes([bytes[10], bytes[11]]),
            protocol: bytes[12],
        })
    }

    /// Bytes the cardinality sketch hashes: the source address
    pub fn source_bytes(&self) -> [u8; 4] {
        self.src_addr.octets()
    }
}

/// Which header fields the Count-Min hashing units consume
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum KeyLayout {
    /// Full five-tuple, 13 bytes
    #[default]
    FiveTuple,
    /// Destination address only, 4 bytes
    DestinationAddress,
}

impl KeyLayout {
    /// Encoded length in bytes
    pub const fn encoded_len(self) -> usize {
        match self {
            KeyLayout::FiveTuple => FIVE_TUPLE_LEN,
            KeyLayout::DestinationAddress => 4,
        }
    }

    /// Encode `key` in this layout
    pub fn encode(self, key: &FlowKey) -> Vec<u8> {
        match self {
            KeyLayout::FiveTuple => key.to_bytes().to_vec(),
            KeyLayout::DestinationAddress => key.dst_addr.octets().to_vec(),
        }
    }

    /// Stable tag used in the schema fingerprint
    pub(crate) const fn tag(self) -> u8 {
        match self {
            KeyLayout::FiveTuple => 0,
            KeyLayout::DestinationAddress => 1,
        }
    }
}
