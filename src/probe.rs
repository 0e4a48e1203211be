//! # Relay Candidate Probing
//!
//! Ranks advertised public relays by measured round-trip time:
//!
//! 1. Drop endpoints whose scheme is not the configured transport.
//! 2. Echo-probe each remaining host a fixed number of times, each probe
//!    bounded by a timeout.
//! 3. Drop candidates that could not be probed or lost any probe.
//! 4. Sort by average RTT (endpoint text breaks ties) and keep at most `K`.
//!
//! Per-candidate failures are logged and skipped; they never fail the pass.
//! Probes run concurrently up to a fixed bound and each writes its own result
//! slot, so ranking happens once over completed results.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::random;
use reqwest::Url;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// ICMP echo payload size in bytes.
const PING_PAYLOAD_SIZE: usize = 56;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("endpoint has no host")]
    MissingHost,
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} resolved to no addresses")]
    NoAddress(String),
    #[error("failed to open echo socket: {0}")]
    Socket(#[source] std::io::Error),
}

/// Result of one probe sequence against a host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeStats {
    pub sent: u16,
    pub received: u16,
    /// Mean RTT over received replies; zero when nothing came back.
    pub avg_rtt: Duration,
}

impl ProbeStats {
    /// Fraction of probes without a reply, in `[0, 1]`.
    pub fn packet_loss(&self) -> f64 {
        if self.sent == 0 {
            return 1.0;
        }
        f64::from(self.sent - self.received.min(self.sent)) / f64::from(self.sent)
    }
}

/// A relay that survived probing.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerCandidate {
    pub endpoint: String,
    pub latency: Duration,
    pub packet_loss: f64,
}

/// Measures reachability of a candidate endpoint.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, endpoint: &Url) -> Result<ProbeStats, ProbeError>;
}

/// Knobs for one selection pass.
#[derive(Debug, Clone)]
pub struct SelectionSettings {
    /// Only endpoints with this URI scheme are considered.
    pub scheme: String,
    /// Maximum relays returned.
    pub count: usize,
    /// Parallel probe sequences.
    pub concurrency: usize,
}

/// ICMP echo prober.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    pub count: u16,
    pub timeout: Duration,
}

impl IcmpProber {
    pub fn new(count: u16, timeout: Duration) -> Self {
        Self { count, timeout }
    }

    async fn resolve(host: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| ProbeError::Resolve {
                host: host.to_string(),
                source,
            })?;
        addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| ProbeError::NoAddress(host.to_string()))
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, endpoint: &Url) -> Result<ProbeStats, ProbeError> {
        let host = endpoint.host_str().ok_or(ProbeError::MissingHost)?;
        let ip = Self::resolve(host.trim_start_matches('[').trim_end_matches(']')).await?;

        let config = match ip {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(ProbeError::Socket)?;
        let mut pinger = client.pinger(ip, PingIdentifier(random())).await;
        pinger.timeout(self.timeout);

        let payload = [0u8; PING_PAYLOAD_SIZE];
        let mut received = 0u16;
        let mut total = Duration::ZERO;
        for seq in 0..self.count {
            match pinger.ping(PingSequence(seq), &payload).await {
                Ok((_, rtt)) => {
                    received += 1;
                    total += rtt;
                }
                Err(e) => debug!(%ip, seq, error = %e, "echo probe lost"),
            }
        }

        let avg_rtt = if received > 0 {
            total / u32::from(received)
        } else {
            Duration::ZERO
        };
        Ok(ProbeStats {
            sent: self.count,
            received,
            avg_rtt,
        })
    }
}

fn matches_scheme(endpoint: &str, scheme: &str) -> bool {
    endpoint
        .strip_prefix(scheme)
        .is_some_and(|rest| rest.starts_with("://"))
}

/// Probe `endpoints` and return at most `settings.count` lossless relays,
/// fastest first.
pub async fn select_public_peers(
    endpoints: Vec<String>,
    prober: Arc<dyn Prober>,
    settings: &SelectionSettings,
) -> Vec<PeerCandidate> {
    let limiter = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for endpoint in endpoints {
        if !matches_scheme(&endpoint, &settings.scheme) {
            debug!(%endpoint, scheme = %settings.scheme, "skipping relay with other transport");
            continue;
        }
        let url = match Url::parse(&endpoint) {
            Ok(url) => url,
            Err(e) => {
                warn!(%endpoint, error = %e, "failed to parse relay endpoint");
                continue;
            }
        };
        let prober = prober.clone();
        let limiter = limiter.clone();
        join_set.spawn(async move {
            let _permit = limiter.acquire_owned().await.ok()?;
            match prober.probe(&url).await {
                Ok(stats) if stats.packet_loss() > 0.0 => {
                    warn!(
                        %endpoint,
                        loss_pct = format!("{:.2}", stats.packet_loss() * 100.0),
                        "skipping relay with packet loss"
                    );
                    None
                }
                Ok(stats) => Some(PeerCandidate {
                    endpoint,
                    latency: stats.avg_rtt,
                    packet_loss: stats.packet_loss(),
                }),
                Err(e) => {
                    warn!(%endpoint, error = %e, "could not probe relay");
                    None
                }
            }
        });
    }

    let mut survivors = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Some(candidate)) => survivors.push(candidate),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "relay probe task failed"),
        }
    }

    rank_candidates(survivors, settings.count)
}

/// Sort by latency and keep the first `count`; shorter inputs are returned whole.
pub fn rank_candidates(mut survivors: Vec<PeerCandidate>, count: usize) -> Vec<PeerCandidate> {
    survivors.sort_by(|a, b| {
        a.latency
            .cmp(&b.latency)
            .then_with(|| a.endpoint.cmp(&b.endpoint))
    });
    survivors.truncate(count);

    for candidate in &survivors {
        info!(
            endpoint = %candidate.endpoint,
            latency_ms = format!("{:.2}", candidate.latency.as_secs_f64() * 1000.0),
            "selected public relay"
        );
    }
    survivors
}
