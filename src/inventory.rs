//! Node inventory: the declarative list of nodes a generation run covers.
//!
//! The input document is a JSON array of node records:
//!
//! ```json
//! [
//!   { "Name": "hub", "PrivateKey": "<hex>",
//!     "Listen": { "Port": 9001, "PublicHost": "10.0.0.1", "PublicPort": 9001 } },
//!   { "Name": "laptop", "PrivateKey": "<hex>",
//!     "MulticastInterfaces": [{ "Regex": "en.*", "Beacon": true, "Listen": true }] }
//! ]
//! ```
//!
//! Names must be unique and non-empty. Self-exclusion during allow-list
//! construction is by name, so a duplicate would silently drop a key from
//! every other node's allow-list.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::identity::{KeyError, Keypair, PublicKey};

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("failed to read node inventory {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed node inventory: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("node {name:?} has an invalid private key: {source}")]
    InvalidKey {
        name: String,
        #[source]
        source: KeyError,
    },
    #[error("node at position {0} has an empty name")]
    EmptyName(usize),
    #[error("node name {0:?} is declared more than once")]
    DuplicateName(String),
    #[error("node name {0:?} is not a plain file name")]
    InvalidName(String),
}

/// Listener settings for a node that accepts inbound links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenSpec {
    /// Local port bound on all interfaces.
    pub port: u16,
    /// Host other nodes dial.
    pub public_host: String,
    /// Port other nodes dial; differs from `port` behind port forwarding.
    pub public_port: u16,
}

/// Link-local peer discovery settings for one interface pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MulticastInterface {
    pub regex: String,
    #[serde(default)]
    pub beacon: bool,
    #[serde(default)]
    pub listen: bool,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub priority: u64,
    #[serde(default)]
    pub password: String,
}

/// One node of the inventory, with its private key already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub private_key: Keypair,
    pub listen: Option<ListenSpec>,
    pub multicast_interfaces: Vec<MulticastInterface>,
}

impl NodeSpec {
    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    pub fn is_listener(&self) -> bool {
        self.listen.is_some()
    }
}

/// Validated, ordered set of node specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    nodes: Vec<NodeSpec>,
}

impl Inventory {
    pub fn new(nodes: Vec<NodeSpec>) -> Result<Self, InventoryError> {
        {
            let mut seen = HashSet::with_capacity(nodes.len());
            for (idx, node) in nodes.iter().enumerate() {
                if node.name.trim().is_empty() {
                    return Err(InventoryError::EmptyName(idx));
                }
                if !is_plain_file_name(&node.name) {
                    return Err(InventoryError::InvalidName(node.name.clone()));
                }
                if !seen.insert(node.name.as_str()) {
                    return Err(InventoryError::DuplicateName(node.name.clone()));
                }
            }
        }
        Ok(Self { nodes })
    }

    pub fn from_json(data: &str) -> Result<Self, InventoryError> {
        // Decode keys after the structural parse so the error names the node.
        let raw: Vec<RawNodeSpec> = serde_json::from_str(data)?;
        let nodes = raw
            .into_iter()
            .map(RawNodeSpec::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(nodes)
    }

    pub async fn load(path: &Path) -> Result<Self, InventoryError> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| InventoryError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json(&data)
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn listeners(&self) -> impl Iterator<Item = (&NodeSpec, &ListenSpec)> {
        self.nodes
            .iter()
            .filter_map(|n| n.listen.as_ref().map(|l| (n, l)))
    }
}

/// Names become `<name>.json` inside the output directory, so they must not
/// carry path separators or directory references.
fn is_plain_file_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name() == Some(std::ffi::OsStr::new(name))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNodeSpec {
    name: String,
    private_key: String,
    #[serde(default)]
    listen: Option<ListenSpec>,
    #[serde(default)]
    multicast_interfaces: Vec<MulticastInterface>,
}

impl RawNodeSpec {
    fn into_spec(self) -> Result<NodeSpec, InventoryError> {
        let private_key = Keypair::from_hex(&self.private_key).map_err(|source| {
            InventoryError::InvalidKey {
                name: self.name.clone(),
                source,
            }
        })?;
        Ok(NodeSpec {
            name: self.name,
            private_key,
            listen: self.listen,
            multicast_interfaces: self.multicast_interfaces,
        })
    }
}
