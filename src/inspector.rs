//! Node state inspection
//!
//! Classifies what the local node already has on disk and, when that is
//! ambiguous, what the cluster thinks of it. Inspection is re-derived from
//! scratch on every run; nothing is carried over between invocations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::client::MembershipClient;
use crate::error::MemberResult;
use crate::topology::ClusterTopology;
use crate::types::{Confirmation, LocalState, Node};

/// Inspects the daemon's persisted data directory
#[derive(Debug, Clone)]
pub struct NodeStateInspector {
    data_dir: PathBuf,
}

impl NodeStateInspector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Filesystem-only classification: `NoData` or `DataPresentUnconfirmed`
    pub fn local_state(&self) -> MemberResult<LocalState> {
        if has_data(&self.data_dir)? {
            Ok(LocalState::DataPresentUnconfirmed)
        } else {
            Ok(LocalState::NoData)
        }
    }

    /// Full classification, querying the cluster when local data exists
    pub fn inspect<C: MembershipClient>(
        &self,
        topology: &ClusterTopology,
        local: &Node,
        client: &C,
    ) -> MemberResult<LocalState> {
        let state = self.local_state()?;
        if state == LocalState::NoData {
            info!(data_dir = %self.data_dir.display(), "no local data");
            return Ok(state);
        }
        confirm(topology, local, client)
    }
}

/// Resolve `DataPresentUnconfirmed` against the live member list
pub fn confirm<C: MembershipClient>(
    topology: &ClusterTopology,
    local: &Node,
    client: &C,
) -> MemberResult<LocalState> {
    if topology.is_sole_endpoint(local) {
        warn!(
            node = %local.name,
            "only endpoint in the topology is this node; assuming membership without a query"
        );
        return Ok(LocalState::ConfirmedMember(Confirmation::Assumed));
    }

    let members = client.member_list(&topology.client_endpoints())?;
    if members.iter().any(|member| member.matches(local)) {
        info!(node = %local.name, "membership confirmed");
        Ok(LocalState::ConfirmedMember(Confirmation::Queried))
    } else {
        warn!(
            node = %local.name,
            members = members.len(),
            "local data present but the cluster does not list this node"
        );
        Ok(LocalState::ConfirmedNotMember)
    }
}

/// A data directory counts as present only if it exists and is non-empty
fn has_data(dir: &Path) -> MemberResult<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemberError;
    use crate::mock::MockMembershipClient;
    use crate::registry::NodeRegistry;
    use tempfile::TempDir;

    fn three_nodes() -> (ClusterTopology, Node) {
        let registry = NodeRegistry::new(vec![
            Node::new("a", "10.0.0.1"),
            Node::new("b", "10.0.0.2"),
            Node::new("c", "10.0.0.3"),
        ]);
        let topology = ClusterTopology::resolve(&registry).unwrap();
        let local = topology.get("a").unwrap().clone();
        (topology, local)
    }

    fn populated_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("member/wal")).unwrap();
        dir
    }

    #[test]
    fn test_absent_directory_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = NodeStateInspector::new(dir.path().join("etcd"));
        assert_eq!(inspector.local_state().unwrap(), LocalState::NoData);
    }

    #[test]
    fn test_empty_directory_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = NodeStateInspector::new(dir.path());
        assert_eq!(inspector.local_state().unwrap(), LocalState::NoData);
    }

    #[test]
    fn test_populated_directory_is_unconfirmed() {
        let dir = populated_dir();
        let inspector = NodeStateInspector::new(dir.path());
        assert_eq!(inspector.local_state().unwrap(), LocalState::DataPresentUnconfirmed);
    }

    #[test]
    fn test_no_data_makes_no_query() {
        let dir = tempfile::tempdir().unwrap();
        let (topology, local) = three_nodes();
        let client = MockMembershipClient::new();
        let state = NodeStateInspector::new(dir.path().join("etcd"))
            .inspect(&topology, &local, &client)
            .unwrap();
        assert_eq!(state, LocalState::NoData);
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_listed_member_is_confirmed() {
        let dir = populated_dir();
        let (topology, local) = three_nodes();
        let client = MockMembershipClient::new().with_members(topology.members());
        let state = NodeStateInspector::new(dir.path())
            .inspect(&topology, &local, &client)
            .unwrap();
        assert_eq!(state, LocalState::ConfirmedMember(Confirmation::Queried));
    }

    #[test]
    fn test_unlisted_member_is_not_member() {
        let dir = populated_dir();
        let (topology, local) = three_nodes();
        let client = MockMembershipClient::new().with_members(&topology.members()[1..]);
        let state = NodeStateInspector::new(dir.path())
            .inspect(&topology, &local, &client)
            .unwrap();
        assert_eq!(state, LocalState::ConfirmedNotMember);
    }

    #[test]
    fn test_single_endpoint_skips_query() {
        let dir = populated_dir();
        let registry = NodeRegistry::new(vec![Node::new("solo", "10.0.0.1")]);
        let topology = ClusterTopology::resolve(&registry).unwrap();
        let local = topology.get("solo").unwrap().clone();
        let client = MockMembershipClient::new().failing("member_list");

        let state = NodeStateInspector::new(dir.path())
            .inspect(&topology, &local, &client)
            .unwrap();
        assert_eq!(state, LocalState::ConfirmedMember(Confirmation::Assumed));
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_query_failure_is_fatal() {
        let dir = populated_dir();
        let (topology, local) = three_nodes();
        let client = MockMembershipClient::new().failing("member_list");
        let err = NodeStateInspector::new(dir.path())
            .inspect(&topology, &local, &client)
            .unwrap_err();
        assert!(matches!(err, MemberError::Rpc(_)));
    }
}
