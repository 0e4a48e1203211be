use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use meshgate::generate::{
    DEFAULT_DIRECTORY_URL, DEFAULT_PROBE_CONCURRENCY, DEFAULT_PROBE_COUNT,
    DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_REGION, DEFAULT_RELAY_COUNT, DEFAULT_SCHEME,
};
use meshgate::{Address, AdmissionFilter, Generator, GeneratorSettings, PublicKey};

#[derive(Parser, Debug)]
#[command(name = "meshgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one node config per inventory entry.
    Generate {
        /// Node inventory JSON file.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving `<name>.json` files.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value = DEFAULT_DIRECTORY_URL)]
        directory_url: String,

        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,

        #[arg(long, default_value = DEFAULT_SCHEME)]
        scheme: String,

        #[arg(long, default_value_t = DEFAULT_RELAY_COUNT)]
        relays: usize,

        #[arg(long, default_value_t = DEFAULT_PROBE_COUNT)]
        probe_count: u16,

        /// Per-probe timeout in milliseconds.
        #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
        probe_timeout_ms: u64,

        #[arg(long, default_value_t = DEFAULT_PROBE_CONCURRENCY)]
        probe_concurrency: usize,

        /// Do not add public relays.
        #[arg(long)]
        no_public_peers: bool,
    },
    /// Check whether a node would admit traffic from an address.
    Check {
        /// Generated node config.
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        address: Ipv6Addr,
    },
    /// Print the overlay address of a public key.
    Address {
        #[arg(short, long)]
        public_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Generate {
            input,
            output,
            directory_url,
            region,
            scheme,
            relays,
            probe_count,
            probe_timeout_ms,
            probe_concurrency,
            no_public_peers,
        } => {
            let settings = GeneratorSettings {
                directory_url,
                region,
                scheme,
                relay_count: relays,
                probe_count,
                probe_timeout: Duration::from_millis(probe_timeout_ms),
                probe_concurrency,
                offline: no_public_peers,
                ..Default::default()
            };
            let generator = Generator::new(settings).context("failed to set up generator")?;
            let written = generator
                .run(&input, &output)
                .await
                .context("config generation failed")?;
            info!(count = written.len(), "configs written to {}", output.display());
        }
        Command::Check { config, address } => {
            let filter = AdmissionFilter::load(&config)
                .await
                .with_context(|| format!("failed to load filter from {}", config.display()))?;
            let verdict = if filter.is_allowed(&Address::from(address)) {
                "allowed"
            } else {
                "denied"
            };
            println!("{verdict}");
        }
        Command::Address { public_key } => {
            let key: PublicKey = public_key.parse().context("invalid public key")?;
            println!("{}", key.address());
        }
    }

    Ok(())
}
