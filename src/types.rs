//! Core types shared across the membership lifecycle
//!
//! Nodes come from the registry, member records come from the consensus
//! store. URLs are always derived from address and port, never stored.

use std::fmt;

/// Default port for inter-member replication traffic
pub const DEFAULT_PEER_PORT: u16 = 2380;

/// Default port for client traffic
pub const DEFAULT_CLIENT_PORT: u16 = 2379;

/// A host as described by the node registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Unique identity; carries the provisioning layer's per-incarnation suffix
    pub name: String,
    /// Internal (private network) address
    pub address: String,
    pub peer_port: u16,
    pub client_port: u16,
    /// False once the node is flagged for removal
    pub active: bool,
}

impl Node {
    /// Create an active node on the default ports
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            peer_port: DEFAULT_PEER_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            active: true,
        }
    }

    pub fn with_ports(mut self, peer_port: u16, client_port: u16) -> Self {
        self.peer_port = peer_port;
        self.client_port = client_port;
        self
    }

    /// Mark the node as flagged for removal
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// URL advertised to other members for replication traffic
    pub fn peer_url(&self) -> String {
        format!("http://{}:{}", self.host(), self.peer_port)
    }

    /// URL clients use to reach this member
    pub fn client_url(&self) -> String {
        format!("http://{}:{}", self.host(), self.client_port)
    }

    fn host(&self) -> String {
        // IPv6 literals need brackets inside a URL
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        }
    }
}

/// A member as reported by the consensus store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    /// Store-assigned member ID
    pub id: u64,
    /// Member name; empty while an added member has not started yet
    pub name: String,
    /// Advertised peer URLs
    pub peer_urls: Vec<String>,
    /// Advertised client URLs
    pub client_urls: Vec<String>,
}

impl MemberRecord {
    /// Whether this record represents the given node, by name or peer URL
    pub fn matches(&self, node: &Node) -> bool {
        (!self.name.is_empty() && self.name == node.name)
            || self.peer_urls.iter().any(|url| *url == node.peer_url())
    }

    /// ID in the hexadecimal form `etcdctl member remove` expects
    pub fn hex_id(&self) -> String {
        format!("{:x}", self.id)
    }
}

/// Startup parameters assigned by the cluster on member-add
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddMemberResponse {
    pub initial_advertise_peer_urls: String,
    pub initial_cluster: String,
    pub initial_cluster_state: String,
}

/// How a membership claim was established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// A live member list contained this node
    Queried,
    /// The node is the only endpoint, so no query was made
    Assumed,
}

/// Classification of the node's persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    /// No data directory
    NoData,
    /// Data directory present, membership not yet checked
    DataPresentUnconfirmed,
    /// The cluster knows this node
    ConfirmedMember(Confirmation),
    /// The cluster does not know this node although local data exists
    ConfirmedNotMember,
}

impl fmt::Display for LocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalState::NoData => write!(f, "no data"),
            LocalState::DataPresentUnconfirmed => write!(f, "data present, unconfirmed"),
            LocalState::ConfirmedMember(Confirmation::Queried) => write!(f, "confirmed member"),
            LocalState::ConfirmedMember(Confirmation::Assumed) => {
                write!(f, "member (assumed, single endpoint)")
            }
            LocalState::ConfirmedNotMember => write!(f, "data present, not a member"),
        }
    }
}

/// Request to remove a node from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecommissionSignal {
    /// Identity of the node to remove
    pub target: String,
}

impl DecommissionSignal {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}
