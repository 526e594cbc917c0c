//! Membership reconciliation
//!
//! A pure decision function: given what the node has locally, what the
//! topology looks like from here and whether removal was requested, pick
//! exactly one [`Action`]. Nothing in this module performs I/O; the
//! executor applies the decision.
//!
//! | local state          | peers reachable | action    |
//! |----------------------|-----------------|-----------|
//! | no data              | no              | Bootstrap |
//! | no data              | yes             | Join      |
//! | member (any)         | -               | Resume    |
//! | not a member         | yes             | Repair    |
//! | decommission request | -               | Removing  |

use std::fmt;

use crate::error::{MemberError, MemberResult};
use crate::topology::TopologyState;
use crate::types::{DecommissionSignal, LocalState, MemberRecord, Node};

/// The single transition a run performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Found a new cluster from the locally resolved member list
    Bootstrap { initial_cluster: String },
    /// Ask a reachable member to add this node, then start with its answer
    Join { endpoints: Vec<String> },
    /// Start with base configuration only
    Resume,
    /// Wipe stale local data and reconcile again from scratch
    Repair,
    /// Remove the target from the cluster
    Removing { target: String },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Bootstrap { initial_cluster } => write!(f, "bootstrap ({})", initial_cluster),
            Action::Join { endpoints } => write!(f, "join via {}", endpoints.join(",")),
            Action::Resume => write!(f, "resume"),
            Action::Repair => write!(f, "repair"),
            Action::Removing { target } => write!(f, "remove {}", target),
        }
    }
}

/// Whether deciding on `state` depends on which peers are reachable
pub fn needs_reachability(state: LocalState) -> bool {
    matches!(state, LocalState::NoData | LocalState::ConfirmedNotMember)
}

/// Choose the action for this run
///
/// `topology` may be absent only when a decommission signal is present,
/// since a node on its way out is no longer an active member.
pub fn decide(
    state: LocalState,
    topology: Option<&TopologyState>,
    decommission: Option<&DecommissionSignal>,
) -> MemberResult<Action> {
    if let Some(signal) = decommission {
        return Ok(Action::Removing {
            target: signal.target.clone(),
        });
    }

    let topology = topology.ok_or_else(|| {
        MemberError::Topology("local node is not an active member of the topology".to_string())
    })?;

    match state {
        LocalState::NoData if topology.cluster_non_empty() => Ok(Action::Join {
            endpoints: topology.reachable_endpoints(),
        }),
        LocalState::NoData => Ok(Action::Bootstrap {
            initial_cluster: topology.topology.initial_cluster(),
        }),
        LocalState::ConfirmedMember(_) => Ok(Action::Resume),
        LocalState::ConfirmedNotMember if topology.cluster_non_empty() => Ok(Action::Repair),
        LocalState::ConfirmedNotMember => Err(MemberError::Topology(format!(
            "{} has local data the cluster does not recognise, and no peer is reachable to rejoin",
            topology.local.name
        ))),
        LocalState::DataPresentUnconfirmed => Err(MemberError::Topology(
            "local data present but membership was never checked".to_string(),
        )),
    }
}

/// Find the member record that represents the removal target
///
/// Matches by name first. A target still present in the registry also
/// matches an unnamed record (added but never started) by peer URL. A named
/// record on the same peer URL belongs to another incarnation and is never
/// the target.
pub fn removal_target<'a>(
    members: &'a [MemberRecord],
    target: &str,
    target_node: Option<&Node>,
) -> Option<&'a MemberRecord> {
    members
        .iter()
        .find(|member| !member.name.is_empty() && member.name == target)
        .or_else(|| {
            let peer_url = target_node?.peer_url();
            members
                .iter()
                .find(|member| member.name.is_empty() && member.peer_urls.contains(&peer_url))
        })
}
