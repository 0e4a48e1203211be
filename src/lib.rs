//! # Meshgate - Overlay Mesh Topology and Admission Control
//!
//! Meshgate configures nodes of an overlay mesh whose addresses are derived
//! from Ed25519 public keys, and enforces who may talk to them:
//!
//! - **Generation**: a declarative node inventory becomes one node document per
//!   node, with listen address, peer links, public relays and an allow-list of
//!   every other node's key
//! - **Relay selection**: public relays are fetched from a directory, echo-probed
//!   live, and the fastest lossless ones are added to every node
//! - **Admission**: at runtime the allow-list becomes a set of derived addresses
//!   and inbound traffic is admitted by exact address match
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `address` | Public key to overlay address derivation |
//! | `identity` | Private/public key decoding and encoding |
//! | `inventory` | Input node specs and validation |
//! | `directory` | Public relay directory fetch and parsing |
//! | `probe` | Echo probing and relay ranking |
//! | `topology` | Per-node listen, peer and allow-list derivation |
//! | `config` | Node documents, runtime config loading, batch persistence |
//! | `filter` | Address-based admission filter |
//! | `generate` | Generation run wiring and settings |

pub mod address;
pub mod config;
pub mod directory;
pub mod filter;
pub mod generate;
pub mod identity;
pub mod inventory;
pub mod probe;
pub mod topology;

pub use address::{derive_address, Address};
pub use config::{ConfigError, ManagerConfig, NodeConfig};
pub use directory::{DirectoryError, DirectorySource, HttpDirectory, StaticDirectory};
pub use filter::{AdmissionFilter, FilterError};
pub use generate::{GenerateError, Generator, GeneratorSettings};
pub use identity::{KeyError, Keypair, PublicKey};
pub use inventory::{Inventory, InventoryError, ListenSpec, MulticastInterface, NodeSpec};
pub use probe::{PeerCandidate, ProbeError, ProbeStats, Prober};
pub use topology::build_node_configs;
