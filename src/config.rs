//! # Node Documents
//!
//! Each generated node gets one JSON document that serves two readers:
//!
//! - the overlay runtime, which consumes the PascalCase node settings
//!   (`PrivateKey`, `Listen`, `Peers`, `AllowedPublicKeys`, ...)
//! - the admission filter, which consumes `Manager.FilterAllowedPublicKeys`
//!
//! `MulticastInterfaces` is omitted when empty so the runtime falls back to
//! its platform default instead of an explicit empty override.
//!
//! ## Persistence
//!
//! A batch is written all-or-nothing from the caller's point of view: every
//! document is serialized before the first write, each file lands as
//! `<name>.json.tmp` and is renamed into place, and on any failure the
//! temporaries and already-renamed files of this batch are removed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::identity::{Keypair, PublicKey};
use crate::inventory::MulticastInterface;

/// Extension of generated node documents.
pub const NODE_DOCUMENT_EXTENSION: &str = "json";

/// Admin socket setting written to every document; the generated nodes do not
/// expose one.
const DEFAULT_ADMIN_LISTEN: &str = "none";
const DEFAULT_IF_NAME: &str = "auto";
const DEFAULT_IF_MTU: u32 = 65535;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to serialize config for node {name:?}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse node config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Manager.FilterAllowedPublicKeys is a required field")]
    MissingAllowList,
}

/// Generated configuration for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub private_key: Keypair,
    /// Zero or one listen URI.
    pub listen: Vec<String>,
    /// Listener links first, then public relays.
    pub peers: Vec<String>,
    /// Keys of every other node, in inventory order.
    pub allowed_public_keys: Vec<PublicKey>,
    pub multicast_interfaces: Vec<MulticastInterface>,
}

impl NodeConfig {
    /// Derived addresses of the allowed keys.
    pub fn allowed_addresses(&self) -> std::collections::BTreeSet<Address> {
        self.allowed_public_keys.iter().map(PublicKey::address).collect()
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, NODE_DOCUMENT_EXTENSION)
    }

    pub fn to_document(&self) -> NodeDocument {
        let mut node_info = BTreeMap::new();
        node_info.insert("name".to_string(), serde_json::Value::from(self.name.clone()));
        let allowed: Vec<String> = self
            .allowed_public_keys
            .iter()
            .map(|k| k.to_hex())
            .collect();

        NodeDocument {
            private_key: self.private_key.to_hex(),
            peers: self.peers.clone(),
            listen: self.listen.clone(),
            admin_listen: DEFAULT_ADMIN_LISTEN.to_string(),
            multicast_interfaces: self.multicast_interfaces.clone(),
            allowed_public_keys: allowed.clone(),
            if_name: DEFAULT_IF_NAME.to_string(),
            if_mtu: DEFAULT_IF_MTU,
            node_info_privacy: false,
            node_info,
            manager: ManagerOptions {
                filter_allowed_public_keys: allowed,
            },
        }
    }

    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(&self.to_document()).map_err(|source| {
            ConfigError::Serialize {
                name: self.name.clone(),
                source,
            }
        })
    }
}

/// On-disk layout of a node document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeDocument {
    pub private_key: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub listen: Vec<String>,
    #[serde(default)]
    pub admin_listen: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multicast_interfaces: Vec<MulticastInterface>,
    #[serde(default)]
    pub allowed_public_keys: Vec<String>,
    #[serde(default, rename = "IfName")]
    pub if_name: String,
    #[serde(default, rename = "IfMTU")]
    pub if_mtu: u32,
    #[serde(default)]
    pub node_info_privacy: bool,
    #[serde(default)]
    pub node_info: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub manager: ManagerOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagerOptions {
    /// Hex public keys allowed to exchange traffic with this node.
    #[serde(default)]
    pub filter_allowed_public_keys: Vec<String>,
}

/// Filter-side view of a node document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagerConfig {
    #[serde(default)]
    pub manager: ManagerOptions,
}

impl ManagerConfig {
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&data)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.filter_allowed_public_keys.is_empty() {
            return Err(ConfigError::MissingAllowList);
        }
        Ok(())
    }

    pub fn allowed_public_keys(&self) -> &[String] {
        &self.manager.filter_allowed_public_keys
    }
}

/// Write every node document into `dir`, or none of them.
///
/// Returns the final paths in inventory order.
pub async fn write_node_configs(
    dir: &Path,
    configs: &[NodeConfig],
) -> Result<Vec<PathBuf>, ConfigError> {
    let rendered = configs
        .iter()
        .map(|c| c.to_json().map(|json| (c.file_name(), json)))
        .collect::<Result<Vec<_>, _>>()?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(rendered.len());
    for (file_name, json) in rendered {
        let final_path = dir.join(&file_name);
        let tmp_path = dir.join(format!("{file_name}.tmp"));
        if let Err(source) = tokio::fs::write(&tmp_path, json.as_bytes()).await {
            discard_staged(&staged).await;
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(ConfigError::Write {
                path: tmp_path,
                source,
            });
        }
        debug!(path = %tmp_path.display(), "staged node config");
        staged.push((tmp_path, final_path));
    }

    let mut written: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (idx, (tmp_path, final_path)) in staged.iter().enumerate() {
        if let Err(source) = tokio::fs::rename(tmp_path, final_path).await {
            discard_staged(&staged[idx..]).await;
            for path in &written {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove partial config");
                }
            }
            return Err(ConfigError::Write {
                path: final_path.clone(),
                source,
            });
        }
        written.push(final_path.clone());
    }

    info!(dir = %dir.display(), count = written.len(), "node configs written");
    Ok(written)
}

async fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (tmp_path, _) in staged {
        if let Err(e) = tokio::fs::remove_file(tmp_path).await {
            warn!(path = %tmp_path.display(), error = %e, "failed to remove staged config");
        }
    }
}
