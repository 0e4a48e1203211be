//! # Topology Builder
//!
//! Turns a validated [`Inventory`] plus the selected public relays into one
//! [`NodeConfig`] per node.
//!
//! | Role | Listen | Peers |
//! |------|--------|-------|
//! | Listener (`Listen` set) | `<scheme>://0.0.0.0:<port>` | relays |
//! | Connector | none | every listener's `<scheme>://<public_host>:<public_port>`, then relays |
//!
//! Every node allows every *other* node's key. Each allow-list is built fresh
//! from the full inventory, so no list is shared between nodes.

use tracing::debug;

use crate::config::NodeConfig;
use crate::identity::PublicKey;
use crate::inventory::{Inventory, ListenSpec, NodeSpec};

/// Wildcard bind host for listeners.
const LISTEN_ALL_INTERFACES: &str = "0.0.0.0";

/// URI other nodes dial to reach `listen`.
pub fn dial_uri(scheme: &str, listen: &ListenSpec) -> String {
    let host = if listen.public_host.contains(':') && !listen.public_host.starts_with('[') {
        format!("[{}]", listen.public_host)
    } else {
        listen.public_host.clone()
    };
    format!("{scheme}://{host}:{}", listen.public_port)
}

/// Local bind URI for a listener.
pub fn listen_uri(scheme: &str, listen: &ListenSpec) -> String {
    format!("{scheme}://{LISTEN_ALL_INTERFACES}:{}", listen.port)
}

/// Keys of every node except `node`, in inventory order.
pub fn allowed_keys_for(node: &NodeSpec, inventory: &Inventory) -> Vec<PublicKey> {
    inventory
        .nodes()
        .iter()
        .filter(|other| other.name != node.name)
        .map(NodeSpec::public_key)
        .collect()
}

fn build_node_config(
    node: &NodeSpec,
    inventory: &Inventory,
    relays: &[String],
    scheme: &str,
) -> NodeConfig {
    let mut listen = Vec::new();
    let mut peers = Vec::new();

    match &node.listen {
        Some(spec) => listen.push(listen_uri(scheme, spec)),
        None => {
            peers.extend(
                inventory
                    .listeners()
                    .filter(|(other, _)| other.name != node.name)
                    .map(|(_, spec)| dial_uri(scheme, spec)),
            );
        }
    }
    peers.extend(relays.iter().cloned());

    let allowed_public_keys = allowed_keys_for(node, inventory);
    debug!(
        node = %node.name,
        listener = node.is_listener(),
        peers = peers.len(),
        allowed = allowed_public_keys.len(),
        "built node config"
    );

    NodeConfig {
        name: node.name.clone(),
        private_key: node.private_key.clone(),
        listen,
        peers,
        allowed_public_keys,
        multicast_interfaces: node.multicast_interfaces.clone(),
    }
}

/// Build configs for every node in inventory order.
pub fn build_node_configs(inventory: &Inventory, relays: &[String], scheme: &str) -> Vec<NodeConfig> {
    inventory
        .nodes()
        .iter()
        .map(|node| build_node_config(node, inventory, relays, scheme))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::derive_address;
    use crate::identity::Keypair;

    fn listener(name: &str, host: &str, port: u16) -> NodeSpec {
        NodeSpec {
            name: name.into(),
            private_key: Keypair::generate(),
            listen: Some(ListenSpec {
                port,
                public_host: host.into(),
                public_port: port,
            }),
            multicast_interfaces: Vec::new(),
        }
    }

    fn connector(name: &str) -> NodeSpec {
        NodeSpec {
            name: name.into(),
            private_key: Keypair::generate(),
            listen: None,
            multicast_interfaces: Vec::new(),
        }
    }

    #[test]
    fn listener_and_connector_pair() {
        let a = listener("A", "10.0.0.1", 9001);
        let b = connector("B");
        let inv = Inventory::new(vec![a.clone(), b.clone()]).expect("valid");

        let configs = build_node_configs(&inv, &[], "quic");
        let (ca, cb) = (&configs[0], &configs[1]);

        assert_eq!(ca.listen, ["quic://0.0.0.0:9001"]);
        assert!(ca.peers.is_empty());
        assert!(cb.listen.is_empty());
        assert_eq!(cb.peers, ["quic://10.0.0.1:9001"]);

        assert_eq!(ca.allowed_public_keys, [b.public_key()]);
        assert_eq!(cb.allowed_public_keys, [a.public_key()]);
        assert!(ca
            .allowed_addresses()
            .contains(&derive_address(b.public_key().as_bytes())));
    }

    #[test]
    fn relays_follow_listener_links_for_every_role() {
        let inv = Inventory::new(vec![
            listener("hub1", "198.51.100.1", 9001),
            listener("hub2", "198.51.100.2", 9002),
            connector("leaf"),
        ])
        .expect("valid");
        let relays = vec!["quic://r1:443".to_string(), "quic://r2:443".to_string()];

        let configs = build_node_configs(&inv, &relays, "quic");
        assert_eq!(configs[0].peers, relays);
        assert_eq!(configs[1].peers, relays);
        assert_eq!(
            configs[2].peers,
            [
                "quic://198.51.100.1:9001",
                "quic://198.51.100.2:9002",
                "quic://r1:443",
                "quic://r2:443"
            ]
        );
    }

    #[test]
    fn no_listeners_means_relays_only() {
        let inv = Inventory::new(vec![connector("x"), connector("y"), connector("z")]).expect("valid");
        let relays = vec!["quic://r:1".to_string()];
        for config in build_node_configs(&inv, &relays, "quic") {
            assert_eq!(config.peers, relays);
            assert!(config.listen.is_empty());
        }
    }

    #[test]
    fn allow_lists_exclude_self_and_cover_everyone_else() {
        let nodes: Vec<_> = (0..5).map(|i| connector(&format!("n{i}"))).collect();
        let inv = Inventory::new(nodes.clone()).expect("valid");

        for (idx, config) in build_node_configs(&inv, &[], "quic").iter().enumerate() {
            assert_eq!(config.allowed_public_keys.len(), nodes.len() - 1);
            assert!(!config.allowed_public_keys.contains(&nodes[idx].public_key()));
            let addrs = config.allowed_addresses();
            for (other_idx, other) in nodes.iter().enumerate() {
                if other_idx != idx {
                    assert!(addrs.contains(&other.private_key.address()));
                }
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let inv = Inventory::new(vec![listener("a", "h", 1), connector("b"), connector("c")])
            .expect("valid");
        let relays = vec!["quic://r:1".to_string()];
        assert_eq!(
            build_node_configs(&inv, &relays, "quic"),
            build_node_configs(&inv, &relays, "quic")
        );
    }

    #[test]
    fn ipv6_public_host_is_bracketed() {
        let spec = ListenSpec {
            port: 1,
            public_host: "2001:db8::1".into(),
            public_port: 7000,
        };
        assert_eq!(dial_uri("tls", &spec), "tls://[2001:db8::1]:7000");
    }

    #[test]
    fn multicast_settings_copied_through() {
        let mut node = connector("m");
        node.multicast_interfaces.push(crate::inventory::MulticastInterface {
            regex: "eth.*".into(),
            beacon: false,
            listen: true,
            port: 9999,
            priority: 1,
            password: "pw".into(),
        });
        let inv = Inventory::new(vec![node.clone()]).expect("valid");
        let configs = build_node_configs(&inv, &[], "quic");
        assert_eq!(configs[0].multicast_interfaces, node.multicast_interfaces);
        assert!(configs[0].allowed_public_keys.is_empty());
    }
}
