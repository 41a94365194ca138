//! The configuration files under `configs/` load and agree with each other.

use std::path::PathBuf;

use droneloc_core::{ArrayMode, NodeConfig, ServerConfig};

fn configs_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../configs")
}

#[test]
fn server_config_loads() {
    let cfg = ServerConfig::from_json(&configs_dir().join("server.json")).unwrap();
    assert_eq!(cfg, ServerConfig::default());
}

#[test]
fn node_configs_match_server_placements() {
    let server = ServerConfig::from_json(&configs_dir().join("server.json")).unwrap();
    for placement in &server.nodes {
        let path = configs_dir().join(format!("node-{}.json", placement.node_id));
        let node = NodeConfig::from_json(&path).unwrap();
        assert_eq!(node.node_id, placement.node_id);
        assert_eq!(node.global_position, placement.position);
        assert_eq!(node.orientation, placement.orientation);
        assert_eq!(node.fusion_port, server.listen_port);
        assert_eq!(node.array_mode, ArrayMode::Triangle);
        assert!(node.simulator.enabled);
        assert_eq!(node.sampling, NodeConfig::default().sampling);
    }
}
