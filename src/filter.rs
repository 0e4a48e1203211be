//! # Admission Filter
//!
//! Decides whether inbound traffic from an overlay address is accepted.
//!
//! The filter is built once from the node's hex-encoded allowed keys. Each key
//! is mapped to its derived address and only the addresses are kept; lookups
//! are exact set membership with no prefix or wildcard matching.
//!
//! Matching on addresses is sound because the overlay's session layer has
//! already bound the sender's address to its key before a packet gets here.
//!
//! After construction the filter is immutable, so a shared reference can be
//! consulted from any number of packet-processing tasks without locking.
//! Denials are silent: callers drop the packet without a reply.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::path::Path;

use tracing::{debug, info, trace};

use crate::address::{Address, ADDRESS_LENGTH};
use crate::config::{ConfigError, ManagerConfig};
use crate::identity::{KeyError, PublicKey};

/// Fixed IPv6 header length.
const IPV6_HEADER_LEN: usize = 40;

/// Offset of the source address within the IPv6 header.
const IPV6_SRC_OFFSET: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("allowed key #{index} has invalid encoding: {source}")]
    InvalidKeyEncoding {
        index: usize,
        #[source]
        source: KeyError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionFilter {
    allowed: HashSet<Address>,
}

impl AdmissionFilter {
    /// Build from hex public keys. Any malformed entry fails the whole build.
    pub fn from_hex_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, FilterError> {
        let public_keys = keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                PublicKey::from_hex(key.as_ref())
                    .map_err(|source| FilterError::InvalidKeyEncoding { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_public_keys(&public_keys))
    }

    pub fn from_public_keys(keys: &[PublicKey]) -> Self {
        let allowed: HashSet<Address> = keys.iter().map(PublicKey::address).collect();
        debug!(keys = keys.len(), addresses = allowed.len(), "admission filter built");
        Self { allowed }
    }

    pub fn from_manager_config(config: &ManagerConfig) -> Result<Self, FilterError> {
        Self::from_hex_keys(config.allowed_public_keys())
    }

    /// Load a node document and build its filter.
    pub async fn load(path: &Path) -> Result<Self, FilterError> {
        let config = ManagerConfig::load(path).await?;
        let filter = Self::from_manager_config(&config)?;
        info!(path = %path.display(), allowed = filter.len(), "loaded admission filter");
        Ok(filter)
    }

    #[inline]
    pub fn is_allowed(&self, address: &Address) -> bool {
        self.allowed.contains(address)
    }

    /// Admit an IPv6 packet by its source address. Non-IPv6 or truncated
    /// packets are denied.
    pub fn admit_packet(&self, packet: &[u8]) -> bool {
        if packet.len() < IPV6_HEADER_LEN || packet[0] >> 4 != 6 {
            trace!(len = packet.len(), "dropping non-ipv6 packet");
            return false;
        }
        let mut src = [0u8; ADDRESS_LENGTH];
        src.copy_from_slice(&packet[IPV6_SRC_OFFSET..IPV6_SRC_OFFSET + ADDRESS_LENGTH]);
        let source = Address::from_bytes(src);
        let allowed = self.is_allowed(&source);
        if !allowed {
            trace!(src = %Ipv6Addr::from(source), "dropping packet from unlisted address");
        }
        allowed
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}
