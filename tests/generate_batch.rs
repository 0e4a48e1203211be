//! Integration tests for batch config generation.
//!
//! These tests drive the public `Generator` end to end against a fake
//! directory and prober, plus one real HTTP directory that fails.
//!
//! Run with verbose output: RUST_LOG=debug cargo test --test generate_batch -- --nocapture

use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use meshgate::generate::GenerateError;
use meshgate::{
    derive_address, AdmissionFilter, Generator, GeneratorSettings, Keypair, ProbeError,
    ProbeStats, Prober, StaticDirectory,
};
use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::EnvFilter::from_default_env()
        } else {
            tracing_subscriber::EnvFilter::new("debug")
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Latency in ms is the endpoint's port; hosts named `lossy*` drop one probe.
struct PortLatencyProber;

#[async_trait]
impl Prober for PortLatencyProber {
    async fn probe(&self, endpoint: &Url) -> Result<ProbeStats, ProbeError> {
        let host = endpoint.host_str().ok_or(ProbeError::MissingHost)?;
        let received = if host.starts_with("lossy") { 4 } else { 5 };
        Ok(ProbeStats {
            sent: 5,
            received,
            avg_rtt: Duration::from_millis(u64::from(endpoint.port().unwrap_or(0))),
        })
    }
}

struct TestNode {
    name: &'static str,
    key: Keypair,
    listen: Option<(&'static str, u16)>,
}

impl TestNode {
    fn new(name: &'static str, listen: Option<(&'static str, u16)>) -> Self {
        Self {
            name,
            key: Keypair::generate(),
            listen,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let mut v = serde_json::json!({ "Name": self.name, "PrivateKey": self.key.to_hex() });
        if let Some((host, port)) = self.listen {
            v["Listen"] = serde_json::json!({ "Port": port, "PublicHost": host, "PublicPort": port });
        }
        v
    }
}

fn write_inventory(dir: &Path, nodes: &[TestNode]) -> std::path::PathBuf {
    let path = dir.join("nodes.json");
    let doc = serde_json::Value::Array(nodes.iter().map(TestNode::to_json).collect());
    std::fs::write(&path, doc.to_string()).expect("write inventory");
    path
}

fn read_doc(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).expect("read config")).expect("json")
}

fn strings(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn fake_generator(endpoints: &[&str]) -> Generator {
    Generator::with_sources(
        GeneratorSettings::default(),
        Arc::new(StaticDirectory::new(endpoints.iter().copied())),
        Arc::new(PortLatencyProber),
    )
}

#[tokio::test]
async fn listener_connector_pair_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = [TestNode::new("A", Some(("10.0.0.1", 9001))), TestNode::new("B", None)];
    let input = write_inventory(dir.path(), &nodes);
    let out = dir.path().join("out");

    let generator = fake_generator(&[
        "quic://r3:30",
        "quic://r1:10",
        "tls://tcp-only:1",
        "quic://lossy:2",
        "quic://r2:20",
        "quic://r4:40",
    ]);
    let written = generator.run(&input, &out).await.expect("generation succeeds");
    assert_eq!(written, vec![out.join("A.json"), out.join("B.json")]);

    let relays = ["quic://r1:10", "quic://r2:20", "quic://r3:30"];
    let a = read_doc(&out.join("A.json"));
    let b = read_doc(&out.join("B.json"));

    assert_eq!(strings(&a["Listen"]), ["quic://0.0.0.0:9001"]);
    assert_eq!(strings(&a["Peers"]), relays);
    assert!(strings(&b["Listen"]).is_empty());
    let mut expected_b = vec!["quic://10.0.0.1:9001"];
    expected_b.extend(relays);
    assert_eq!(strings(&b["Peers"]), expected_b);

    assert_eq!(strings(&a["AllowedPublicKeys"]), [nodes[1].key.public_key().to_hex()]);
    assert_eq!(
        strings(&b["Manager"]["FilterAllowedPublicKeys"]),
        [nodes[0].key.public_key().to_hex()]
    );
    assert!(a.get("MulticastInterfaces").is_none());
}

#[tokio::test]
async fn generated_allow_lists_drive_the_filter() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = [
        TestNode::new("hub", Some(("hub.example", 7000))),
        TestNode::new("n1", None),
        TestNode::new("n2", None),
        TestNode::new("n3", None),
    ];
    let input = write_inventory(dir.path(), &nodes);
    let out = dir.path().join("out");

    fake_generator(&[]).run(&input, &out).await.expect("generation succeeds");

    let outsider = Keypair::generate();
    for (idx, node) in nodes.iter().enumerate() {
        let filter = AdmissionFilter::load(&out.join(format!("{}.json", node.name)))
            .await
            .expect("filter loads");
        assert_eq!(filter.len(), nodes.len() - 1);
        for (other_idx, other) in nodes.iter().enumerate() {
            let addr = derive_address(other.key.public_key().as_bytes());
            assert_eq!(filter.is_allowed(&addr), idx != other_idx);
        }
        assert!(!filter.is_allowed(&outsider.address()));
    }
}

#[tokio::test]
async fn repeated_runs_are_byte_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = [TestNode::new("a", Some(("1.2.3.4", 1))), TestNode::new("b", None)];
    let input = write_inventory(dir.path(), &nodes);
    let generator = fake_generator(&["quic://r:5"]);

    generator.run(&input, &dir.path().join("one")).await.expect("first run");
    generator.run(&input, &dir.path().join("two")).await.expect("second run");

    for name in ["a.json", "b.json"] {
        assert_eq!(
            std::fs::read(dir.path().join("one").join(name)).expect("first"),
            std::fs::read(dir.path().join("two").join(name)).expect("second"),
        );
    }
}

#[tokio::test]
async fn duplicate_names_abort_before_writing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = [TestNode::new("same", None), TestNode::new("same", None)];
    let input = write_inventory(dir.path(), &nodes);
    let out = dir.path().join("out");

    let err = fake_generator(&[]).run(&input, &out).await.expect_err("duplicate");
    assert!(matches!(err, GenerateError::Inventory(_)));
    assert!(!out.exists());
}

#[tokio::test]
async fn path_like_name_aborts_before_writing() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = [TestNode::new("../escaped", None), TestNode::new("B", None)];
    let input = write_inventory(dir.path(), &nodes);
    let out = dir.path().join("out");

    let err = fake_generator(&[]).run(&input, &out).await.expect_err("path-like name");
    assert!(matches!(err, GenerateError::Inventory(_)));
    assert!(!out.exists());
    assert!(!dir.path().join("escaped.json").exists());
}

/// Serve a single canned HTTP 500 response.
async fn failing_directory() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                )
                .await;
            let _ = stream.shutdown().await;
        }
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn directory_http_error_aborts_without_output() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = [TestNode::new("a", None), TestNode::new("b", None)];
    let input = write_inventory(dir.path(), &nodes);
    let out = dir.path().join("out");

    let settings = GeneratorSettings {
        directory_url: failing_directory().await,
        http_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let generator = Generator::new(settings).expect("generator");

    let err = generator.run(&input, &out).await.expect_err("directory failed");
    assert!(matches!(err, GenerateError::DirectoryUnavailable(_)), "got {err:?}");
    assert!(!out.exists());
}
