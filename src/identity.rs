//! # Node Keys
//!
//! Ed25519 key material for mesh nodes:
//!
//! - [`Keypair`]: signing keypair loaded from a node's configured private key
//! - [`PublicKey`]: 32-byte public key, the input to address derivation
//!
//! ## Key Encoding
//!
//! Private keys travel as hex in node documents. Two lengths are accepted on input:
//!
//! | Bytes | Layout |
//! |-------|--------|
//! | 64 | `seed || public_key` (the overlay's native form) |
//! | 32 | `seed` only |
//!
//! The 64-byte form is checked for consistency: the trailing public key must be
//! the one the seed produces. Output always uses the 64-byte form.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{SecretKey, SigningKey, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::{derive_address, Address};

/// Error type for key decoding failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid key length {actual}, expected {expected}")]
    InvalidLength { actual: usize, expected: &'static str },
    #[error("private key's embedded public key does not match its seed")]
    MismatchedPublicKey,
}

#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &SecretKey) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Decode a private key from raw bytes in either accepted layout.
    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        match bytes.len() {
            KEYPAIR_LENGTH => {
                let mut full = [0u8; KEYPAIR_LENGTH];
                full.copy_from_slice(bytes);
                let signing_key = SigningKey::from_keypair_bytes(&full)
                    .map_err(|_| KeyError::MismatchedPublicKey)?;
                Ok(Self { signing_key })
            }
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(bytes);
                Ok(Self::from_seed(&seed))
            }
            actual => Err(KeyError::InvalidLength {
                actual,
                expected: "32 or 64 bytes",
            }),
        }
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())?;
        Self::from_private_key_bytes(&bytes)
    }

    /// The 64-byte `seed || public_key` form.
    pub fn private_key_bytes(&self) -> [u8; KEYPAIR_LENGTH] {
        self.signing_key.to_keypair_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.private_key_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn address(&self) -> Address {
        self.public_key().address()
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.signing_key.to_bytes() == other.signing_key.to_bytes()
    }
}

impl Eq for Keypair {}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    #[inline]
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; PUBLIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidLength {
                actual: bytes.len(),
                expected: "32 bytes",
            })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Derived overlay address for this key.
    pub fn address(&self) -> Address {
        derive_address(&self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
