//! Reconciliation run executor
//!
//! Ties the pieces together for one run: inspect, decide, then apply the
//! decision through the supervisor and the health verifier. The decision
//! itself comes from [`crate::reconciler::decide`]; this module owns every
//! side effect, including the Repair re-entry into the no-data branch.

use std::fs;
use tracing::{info, warn};

use crate::client::MembershipClient;
use crate::config::Config;
use crate::error::{MemberError, MemberResult};
use crate::health::HealthVerifier;
use crate::inspector::NodeStateInspector;
use crate::reconciler::{decide, needs_reachability, removal_target, Action};
use crate::registry::NodeRegistry;
use crate::supervisor::{ApplyOutcome, DaemonConfig, ServiceManager, StartupMode, Supervisor};
use crate::topology::{ClusterTopology, TopologyState};
use crate::types::{AddMemberResponse, DecommissionSignal, LocalState, Node};

/// What a run would do, computed without side effects
#[derive(Debug, Clone)]
pub struct Plan {
    pub local: Node,
    pub local_state: LocalState,
    /// Absent for a node that is being decommissioned
    pub topology: Option<TopologyState>,
    pub action: Action,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Daemon configured and verified healthy
    Applied {
        outcome: ApplyOutcome,
        health_attempts: u32,
    },
    /// Member removed from the cluster
    Removed { member_id: u64 },
    /// Nothing to remove; the member was already gone
    AlreadyRemoved,
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub node: String,
    pub initial_state: LocalState,
    /// Whether stale local data was wiped during this run
    pub repaired: bool,
    /// The action that was finally applied
    pub action: Action,
    pub outcome: RunOutcome,
}

/// Applies reconciler decisions for the local node
pub struct Executor<'a, C: MembershipClient, S: ServiceManager> {
    config: &'a Config,
    client: &'a C,
    service: &'a S,
}

impl<'a, C: MembershipClient, S: ServiceManager> Executor<'a, C, S> {
    pub fn new(config: &'a Config, client: &'a C, service: &'a S) -> Self {
        Self {
            config,
            client,
            service,
        }
    }

    fn supervisor(&self) -> Supervisor<'a, S> {
        Supervisor::new(self.service, self.config.daemon_config_path.clone())
    }

    fn decommission_signal(
        &self,
        registry: &NodeRegistry,
        local: &Node,
    ) -> Option<DecommissionSignal> {
        self.config
            .decommission
            .as_deref()
            .map(DecommissionSignal::new)
            .or_else(|| registry.decommission_signal(&local.name))
    }

    /// Inspect and decide; read-only apart from membership and health queries
    pub fn plan(&self, registry: &NodeRegistry) -> MemberResult<Plan> {
        let local = registry.local(self.config.node_name()?)?.clone();
        let inspector = NodeStateInspector::new(&self.config.data_dir);

        if let Some(signal) = self.decommission_signal(registry, &local) {
            let local_state = inspector.local_state()?;
            let action = decide(local_state, None, Some(&signal))?;
            return Ok(Plan {
                local,
                local_state,
                topology: None,
                action,
            });
        }

        let topology = TopologyState::new(ClusterTopology::resolve(registry)?, &local)?;
        let local_state = inspector.inspect(&topology.topology, &topology.local, self.client)?;
        let topology = if needs_reachability(local_state) {
            topology.probe(self.client)
        } else {
            topology
        };
        let action = decide(local_state, Some(&topology), None)?;

        Ok(Plan {
            local,
            local_state,
            topology: Some(topology),
            action,
        })
    }

    /// Perform one reconciliation run
    pub fn run(&self, registry: &NodeRegistry) -> MemberResult<RunReport> {
        let plan = self.plan(registry)?;
        info!(
            node = %plan.local.name,
            state = %plan.local_state,
            action = %plan.action,
            "reconciling membership"
        );

        let mut repaired = false;
        let mut action = plan.action.clone();

        let outcome = match (&plan.action, &plan.topology) {
            (Action::Removing { target }, _) => self.remove(registry, &plan.local, target)?,
            (Action::Repair, Some(topology)) => {
                self.repair()?;
                repaired = true;
                action = decide(LocalState::NoData, Some(topology), None)?;
                info!(action = %action, "re-evaluated after repair");
                self.start(&action, topology)?
            }
            (_, Some(topology)) => self.start(&action, topology)?,
            (_, None) => {
                return Err(MemberError::Topology(format!(
                    "{} needs a resolved topology",
                    plan.action
                )))
            }
        };

        Ok(RunReport {
            node: plan.local.name,
            initial_state: plan.local_state,
            repaired,
            action,
            outcome,
        })
    }

    /// Configure and (re)start the daemon for a startup action, then verify health
    fn start(&self, action: &Action, topology: &TopologyState) -> MemberResult<RunOutcome> {
        let local = &topology.local;
        let mode = match action {
            Action::Bootstrap { initial_cluster } => StartupMode::Bootstrap {
                initial_cluster: initial_cluster.clone(),
            },
            Action::Join { endpoints } => StartupMode::Join(self.join(endpoints, local)?),
            Action::Resume => StartupMode::Resume,
            Action::Repair | Action::Removing { .. } => {
                return Err(MemberError::Topology(format!("{} is not a startup action", action)))
            }
        };

        let config = DaemonConfig::render(local, &self.config.data_dir, &mode);
        let outcome = self.supervisor().apply(&config)?;
        let health_attempts = HealthVerifier::new(self.client, self.config.health_policy())
            .verify(&local.client_url())?;

        Ok(RunOutcome::Applied {
            outcome,
            health_attempts,
        })
    }

    /// Register this node through a reachable member
    fn join(&self, endpoints: &[String], local: &Node) -> MemberResult<AddMemberResponse> {
        // A registration left behind by an earlier failed join (or a lost data
        // directory) would make member-add reject our peer URL.
        let members = self.client.member_list(endpoints)?;
        if let Some(stale) = members.iter().find(|member| member.matches(local)) {
            warn!(
                node = %local.name,
                member_id = %stale.hex_id(),
                "removing stale registration before joining"
            );
            self.client.member_remove(endpoints, stale.id)?;
        }

        info!(node = %local.name, peer_url = %local.peer_url(), "adding member");
        let response = self.client.member_add(endpoints, &local.name, &local.peer_url())?;
        Ok(response)
    }

    /// Stop the daemon and wipe the data directory
    fn repair(&self) -> MemberResult<()> {
        let data_dir = &self.config.data_dir;
        self.supervisor().stop_confirmed()?;
        warn!(data_dir = %data_dir.display(), "wiping local data directory");
        fs::remove_dir_all(data_dir).map_err(|e| {
            MemberError::CorruptState(format!("cannot remove {}: {}", data_dir.display(), e))
        })?;
        Ok(())
    }

    /// Remove `target` from the cluster; stop the daemon if it is ours
    fn remove(
        &self,
        registry: &NodeRegistry,
        local: &Node,
        target: &str,
    ) -> MemberResult<RunOutcome> {
        let endpoints = removal_endpoints(registry, local);
        let members = self.client.member_list(&endpoints)?;

        let outcome = match removal_target(&members, target, registry.get(target)) {
            Some(member) => {
                if member.client_urls.is_empty() {
                    warn!(
                        target,
                        member_id = %member.hex_id(),
                        "removing member that never started"
                    );
                } else {
                    warn!(
                        target,
                        member_id = %member.hex_id(),
                        client_urls = %member.client_urls.join(","),
                        "removing member from cluster"
                    );
                }
                self.client.member_remove(&endpoints, member.id)?;
                RunOutcome::Removed { member_id: member.id }
            }
            None => {
                info!(target, "no matching member, already removed");
                RunOutcome::AlreadyRemoved
            }
        };

        if target == local.name {
            self.supervisor().decommission()?;
        }
        Ok(outcome)
    }
}

/// Endpoints used for removal: every active member plus the local node
fn removal_endpoints(registry: &NodeRegistry, local: &Node) -> Vec<String> {
    let mut endpoints: Vec<String> = registry
        .nodes()
        .iter()
        .filter(|node| node.active)
        .map(Node::client_url)
        .collect();
    endpoints.push(local.client_url());
    endpoints.sort();
    endpoints.dedup();
    endpoints
}
