//! Cluster topology resolution
//!
//! Every node resolves the same registry snapshot on its own, with no lock
//! to agree on ordering. The resolved member list is therefore sorted by
//! identity, and every string derived from it is a pure function of that
//! list. The initial-cluster string ends up in each node's immutable startup
//! configuration, so two nodes resolving one snapshot must produce the same
//! bytes.

use std::collections::HashSet;
use tracing::debug;

use crate::client::MembershipClient;
use crate::error::{MemberError, MemberResult};
use crate::registry::NodeRegistry;
use crate::types::Node;

/// Active nodes, sorted by identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    members: Vec<Node>,
}

impl ClusterTopology {
    /// Resolve the active member set from a registry snapshot
    pub fn resolve(registry: &NodeRegistry) -> MemberResult<Self> {
        let mut members: Vec<Node> = registry
            .nodes()
            .iter()
            .filter(|node| node.active)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));

        if members.is_empty() {
            return Err(MemberError::Topology("registry has no active nodes".to_string()));
        }
        // A two-member quorum survives no failure at all
        if members.len() == 2 {
            return Err(MemberError::Topology(
                "two active members cannot form a fault-tolerant quorum; use 1 or 3 and more"
                    .to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut peer_urls = HashSet::new();
        for node in &members {
            validate_name(&node.name)?;
            if !names.insert(node.name.as_str()) {
                return Err(MemberError::Topology(format!("duplicate node identity {}", node.name)));
            }
            if !peer_urls.insert(node.peer_url()) {
                return Err(MemberError::Topology(format!(
                    "peer URL {} is claimed by more than one node",
                    node.peer_url()
                )));
            }
        }

        Ok(Self { members })
    }

    pub fn members(&self) -> &[Node] {
        &self.members
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.members.iter().find(|node| node.name == name)
    }

    /// `name=peerURL` pairs joined by commas, in identity order
    pub fn initial_cluster(&self) -> String {
        self.members
            .iter()
            .map(|node| format!("{}={}", node.name, node.peer_url()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Client URLs of all active members, in identity order
    pub fn client_endpoints(&self) -> Vec<String> {
        self.members.iter().map(Node::client_url).collect()
    }

    /// Active members other than `local`
    pub fn peers_of<'a>(&'a self, local: &'a Node) -> impl Iterator<Item = &'a Node> + 'a {
        self.members.iter().filter(move |node| node.name != local.name)
    }

    /// Whether the endpoint list reduces to `local`'s own endpoint
    pub fn is_sole_endpoint(&self, local: &Node) -> bool {
        self.client_endpoints() == [local.client_url()]
    }
}

fn validate_name(name: &str) -> MemberResult<()> {
    if name.is_empty() {
        return Err(MemberError::Topology("node with empty identity".to_string()));
    }
    // These characters would corrupt the initial-cluster string
    if name.contains(|c: char| c == ',' || c == '=' || c.is_whitespace()) {
        return Err(MemberError::Topology(format!("invalid node identity {:?}", name)));
    }
    Ok(())
}

/// Resolved topology from the point of view of one node
#[derive(Debug, Clone)]
pub struct TopologyState {
    pub topology: ClusterTopology,
    pub local: Node,
    /// Other active members that answered a health probe
    pub reachable_peers: Vec<Node>,
}

impl TopologyState {
    /// Bind the topology to the local node, which must be an active member
    pub fn new(topology: ClusterTopology, local: &Node) -> MemberResult<Self> {
        let local = topology.get(&local.name).cloned().ok_or_else(|| {
            MemberError::Topology(format!("node {} is not an active member", local.name))
        })?;
        Ok(Self {
            topology,
            local,
            reachable_peers: Vec::new(),
        })
    }

    /// Probe every other active member and record the ones that answer
    pub fn probe<C: MembershipClient>(mut self, client: &C) -> Self {
        self.reachable_peers = self
            .topology
            .peers_of(&self.local)
            .filter(|peer| match client.endpoint_health(&[peer.client_url()]) {
                Ok(()) => true,
                Err(err) => {
                    debug!(peer = %peer.name, error = %err, "peer not reachable");
                    false
                }
            })
            .cloned()
            .collect();
        self
    }

    /// Whether any other active member is reachable
    pub fn cluster_non_empty(&self) -> bool {
        !self.reachable_peers.is_empty()
    }

    pub fn reachable_endpoints(&self) -> Vec<String> {
        self.reachable_peers.iter().map(Node::client_url).collect()
    }
}
