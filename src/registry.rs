//! Node registry snapshot
//!
//! The provisioning layer writes one entry per host. Entries may omit ports,
//! in which case the configured defaults apply. Entries flagged
//! `active = false` are on their way out of the cluster. Worker entries
//! share the file but never run the consensus store and are skipped.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{MemberError, MemberResult};
use crate::types::{DecommissionSignal, Node};

/// Registry entry as written by the provisioning layer
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub peer_port: Option<u16>,
    #[serde(default)]
    pub client_port: Option<u16>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Host role; absent means control plane
    #[serde(default)]
    pub role: Option<String>,
}

impl RegistryEntry {
    fn is_control_plane(&self) -> bool {
        !matches!(self.role.as_deref(), Some("worker"))
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    nodes: Vec<RegistryEntry>,
}

/// Ports applied to entries that do not name their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDefaults {
    pub peer: u16,
    pub client: u16,
}

/// All nodes known to the provisioning layer, in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Load a snapshot; `.json` files are parsed as JSON, anything else as TOML
    pub fn load(path: &Path, ports: PortDefaults) -> MemberResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            MemberError::Configuration(format!("cannot read registry {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&text, ports),
            _ => Self::from_toml(&text, ports),
        }
    }

    pub fn from_toml(text: &str, ports: PortDefaults) -> MemberResult<Self> {
        let file: RegistryFile = toml::from_str(text)?;
        Ok(Self::from_entries(file.nodes, ports))
    }

    pub fn from_json(text: &str, ports: PortDefaults) -> MemberResult<Self> {
        let file: RegistryFile = serde_json::from_str(text)?;
        Ok(Self::from_entries(file.nodes, ports))
    }

    fn from_entries(entries: Vec<RegistryEntry>, ports: PortDefaults) -> Self {
        let nodes = entries
            .into_iter()
            .filter(RegistryEntry::is_control_plane)
            .map(|entry| Node {
                name: entry.name,
                address: entry.address,
                peer_port: entry.peer_port.unwrap_or(ports.peer),
                client_port: entry.client_port.unwrap_or(ports.client),
                active: entry.active,
            })
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Look up the local node, which must be registered
    pub fn local(&self, name: &str) -> MemberResult<&Node> {
        self.get(name).ok_or_else(|| {
            MemberError::Topology(format!("node {} is not in the registry", name))
        })
    }

    /// Removal request for the local node, if the registry flags it inactive
    pub fn decommission_signal(&self, name: &str) -> Option<DecommissionSignal> {
        self.get(name)
            .filter(|node| !node.active)
            .map(|node| DecommissionSignal::new(node.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTS: PortDefaults = PortDefaults { peer: 2380, client: 2379 };

    #[test]
    fn test_toml_registry_applies_port_defaults() {
        let registry = NodeRegistry::from_toml(
            r#"
            [[nodes]]
            name = "controlplane-1-a7f3"
            address = "10.0.1.2"

            [[nodes]]
            name = "controlplane-2-c91d"
            address = "10.0.1.3"
            peer_port = 12380
            client_port = 12379
            active = false
            "#,
            PORTS,
        )
        .unwrap();

        let first = registry.get("controlplane-1-a7f3").unwrap();
        assert_eq!(first.peer_port, 2380);
        assert!(first.active);

        let second = registry.get("controlplane-2-c91d").unwrap();
        assert_eq!(second.client_port, 12379);
        assert!(!second.active);
    }

    #[test]
    fn test_worker_entries_are_skipped() {
        let registry = NodeRegistry::from_toml(
            r#"
            [[nodes]]
            name = "controlplane-1-a7f3"
            address = "10.0.1.2"
            role = "control"

            [[nodes]]
            name = "worker-1-77e0"
            address = "10.0.2.2"
            role = "worker"
            "#,
            PORTS,
        )
        .unwrap();
        assert_eq!(registry.nodes().len(), 1);
        assert!(registry.get("worker-1-77e0").is_none());
    }

    #[test]
    fn test_json_registry() {
        let registry = NodeRegistry::from_json(
            r#"{"nodes": [{"name": "cp-1", "address": "10.0.0.2"}]}"#,
            PORTS,
        )
        .unwrap();
        assert_eq!(registry.nodes().len(), 1);
        assert_eq!(registry.nodes()[0].client_url(), "http://10.0.0.2:2379");
    }

    #[test]
    fn test_load_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("registry.json");
        fs::write(&json, r#"{"nodes": [{"name": "cp-1", "address": "10.0.0.2"}]}"#).unwrap();
        let toml_path = dir.path().join("registry.toml");
        fs::write(&toml_path, "[[nodes]]\nname = \"cp-1\"\naddress = \"10.0.0.2\"\n").unwrap();

        assert_eq!(
            NodeRegistry::load(&json, PORTS).unwrap(),
            NodeRegistry::load(&toml_path, PORTS).unwrap()
        );
    }

    #[test]
    fn test_missing_registry_is_configuration_error() {
        let err = NodeRegistry::load(Path::new("/nonexistent/registry.toml"), PORTS).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_decommission_signal_only_for_inactive_nodes() {
        let registry = NodeRegistry::new(vec![
            Node::new("a", "10.0.0.1"),
            Node::new("b", "10.0.0.2").inactive(),
        ]);
        assert_eq!(registry.decommission_signal("a"), None);
        assert_eq!(registry.decommission_signal("b"), Some(DecommissionSignal::new("b")));
        assert_eq!(registry.decommission_signal("zzz"), None);
    }

    #[test]
    fn test_unregistered_local_node_is_topology_error() {
        let registry = NodeRegistry::new(vec![Node::new("a", "10.0.0.1")]);
        let err = registry.local("b").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
