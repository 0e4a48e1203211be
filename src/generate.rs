//! Generation run: inventory in, one node document per node out.
//!
//! Relay selection runs once per batch before any node is built. Any hard
//! failure (directory, inventory, serialization, write) aborts the whole run;
//! a directory left by an aborted run must not be deployed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{write_node_configs, ConfigError, NodeConfig};
use crate::directory::{DirectoryError, DirectorySource, HttpDirectory};
use crate::inventory::{Inventory, InventoryError};
use crate::probe::{select_public_peers, IcmpProber, Prober, SelectionSettings};
use crate::topology::build_node_configs;

/// Default public relay directory.
pub const DEFAULT_DIRECTORY_URL: &str = "https://publicpeers.neilalexander.dev/";

/// Default directory section to draw relays from.
pub const DEFAULT_REGION: &str = "united-states";

/// Default link transport scheme.
pub const DEFAULT_SCHEME: &str = "quic";

/// Public relays added to every node.
pub const DEFAULT_RELAY_COUNT: usize = 3;

/// Echo probes per candidate.
pub const DEFAULT_PROBE_COUNT: u16 = 5;

/// Wait per echo probe, in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;

/// Wait per echo probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS);

/// Candidates probed at once.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 8;

/// Directory HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("relay directory unavailable: {0}")]
    DirectoryUnavailable(#[from] DirectoryError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub directory_url: String,
    pub region: String,
    pub scheme: String,
    pub relay_count: usize,
    pub probe_count: u16,
    pub probe_timeout: Duration,
    pub probe_concurrency: usize,
    pub http_timeout: Duration,
    /// Skip directory lookup and probing entirely.
    pub offline: bool,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            region: DEFAULT_REGION.to_string(),
            scheme: DEFAULT_SCHEME.to_string(),
            relay_count: DEFAULT_RELAY_COUNT,
            probe_count: DEFAULT_PROBE_COUNT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            offline: false,
        }
    }
}

impl GeneratorSettings {
    pub fn selection(&self) -> SelectionSettings {
        SelectionSettings {
            scheme: self.scheme.clone(),
            count: self.relay_count,
            concurrency: self.probe_concurrency,
        }
    }
}

/// Wires a directory and prober to the topology builder.
pub struct Generator {
    settings: GeneratorSettings,
    directory: Arc<dyn DirectorySource>,
    prober: Arc<dyn Prober>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Live generator: HTTP directory plus ICMP prober.
    pub fn new(settings: GeneratorSettings) -> Result<Self, GenerateError> {
        let directory = HttpDirectory::new(
            settings.directory_url.clone(),
            settings.region.clone(),
            settings.http_timeout,
        )?;
        let prober = IcmpProber::new(settings.probe_count, settings.probe_timeout);
        Ok(Self::with_sources(settings, Arc::new(directory), Arc::new(prober)))
    }

    pub fn with_sources(
        settings: GeneratorSettings,
        directory: Arc<dyn DirectorySource>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            settings,
            directory,
            prober,
        }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Fetch, probe and rank public relays.
    pub async fn select_relays(&self) -> Result<Vec<String>, GenerateError> {
        if self.settings.offline {
            info!("offline run, no public relays selected");
            return Ok(Vec::new());
        }
        info!(region = %self.settings.region, "selecting public relays");
        let endpoints = self.directory.fetch_endpoints().await?;
        let selected =
            select_public_peers(endpoints, self.prober.clone(), &self.settings.selection()).await;
        Ok(selected.into_iter().map(|c| c.endpoint).collect())
    }

    /// Build every node config without touching the filesystem.
    pub async fn build(&self, inventory: &Inventory) -> Result<Vec<NodeConfig>, GenerateError> {
        let relays = self.select_relays().await?;
        Ok(build_node_configs(inventory, &relays, &self.settings.scheme))
    }

    /// Load `input`, build all configs and write them to `output_dir`.
    pub async fn run(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, GenerateError> {
        let inventory = Inventory::load(input).await?;
        info!(nodes = inventory.len(), input = %input.display(), "loaded node inventory");
        let configs = self.build(&inventory).await?;
        Ok(write_node_configs(output_dir, &configs).await?)
    }
}
