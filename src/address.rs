//! # Overlay Addresses
//!
//! Every overlay participant owns a 16-byte address derived from its Ed25519
//! public key. The derivation rewards keys with many leading zero bits with
//! numerically smaller (more "central") addresses:
//!
//! 1. Bitwise-invert the 32-byte public key.
//! 2. Count the leading one bits `n` of the inverted key.
//! 3. Drop those bits plus the zero bit that terminates them.
//! 4. Pack the following bits into bytes.
//! 5. Address = `ADDRESS_PREFIX || n || packed[..14]`.
//!
//! The result lies in `0200::/7` and is rendered as IPv6.
//!
//! ## Invariants
//!
//! - Pure: the same key always yields the same address.
//! - Equal addresses imply equal keys for all practical purposes; the overlay's
//!   session layer binds the address to the key before traffic reaches a filter.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of an overlay address in bytes.
pub const ADDRESS_LENGTH: usize = 16;

/// First byte of every node address.
pub const ADDRESS_PREFIX: u8 = 0x02;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    #[inline]
    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Whether the address carries the node-address prefix.
    pub fn is_node_address(&self) -> bool {
        self.0[0] == ADDRESS_PREFIX
    }

    pub fn to_ipv6(self) -> Ipv6Addr {
        Ipv6Addr::from(self.0)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Self(ip.octets())
    }
}

impl From<Address> for Ipv6Addr {
    fn from(addr: Address) -> Self {
        addr.to_ipv6()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_ipv6())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_ipv6(), f)
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv6Addr>().map(Self::from)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Derive the overlay address for a 32-byte public key.
pub fn derive_address(public_key: &[u8; 32]) -> Address {
    let mut inverted = *public_key;
    for byte in inverted.iter_mut() {
        *byte = !*byte;
    }

    let mut packed = Vec::with_capacity(32);
    let mut ones: u8 = 0;
    let mut done = false;
    let mut acc: u8 = 0;
    let mut n_bits = 0;

    for idx in 0..(8 * inverted.len()) {
        let bit = (inverted[idx / 8] >> (7 - (idx % 8))) & 1;
        if !done {
            if bit != 0 {
                ones = ones.wrapping_add(1);
            } else {
                done = true;
            }
            continue;
        }
        acc = (acc << 1) | bit;
        n_bits += 1;
        if n_bits == 8 {
            n_bits = 0;
            packed.push(acc);
        }
    }

    let mut out = [0u8; ADDRESS_LENGTH];
    out[0] = ADDRESS_PREFIX;
    out[1] = ones;
    let tail = (ADDRESS_LENGTH - 2).min(packed.len());
    out[2..2 + tail].copy_from_slice(&packed[..tail]);
    Address(out)
}
