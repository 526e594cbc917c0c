//! Test doubles for the consensus store, the service manager and the
//! command runner.
//!
//! Each double records what was asked of it and serves controllable
//! responses, so reconciliation logic can be exercised deterministically
//! without a network or a real daemon.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use crate::client::MembershipClient;
use crate::error::{MemberResult, RpcError, RpcResult};
use crate::runner::{CommandRunner, RunFailure};
use crate::supervisor::ServiceManager;
use crate::types::{AddMemberResponse, MemberRecord, Node};

/// A call made against [`MockMembershipClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    MemberList { endpoints: Vec<String> },
    MemberAdd { endpoints: Vec<String>, name: String, peer_url: String },
    MemberRemove { endpoints: Vec<String>, id: u64 },
    EndpointHealth { endpoints: Vec<String> },
}

impl ClientCall {
    pub fn endpoints(&self) -> &[String] {
        match self {
            ClientCall::MemberList { endpoints }
            | ClientCall::MemberAdd { endpoints, .. }
            | ClientCall::MemberRemove { endpoints, .. }
            | ClientCall::EndpointHealth { endpoints } => endpoints,
        }
    }
}

/// In-memory consensus store
///
/// Endpoints are unhealthy unless registered with `with_healthy_endpoint`
/// or `healthy_after`. Operations named in `failing` return a command
/// failure, as a dial or command timeout would.
pub struct MockMembershipClient {
    members: RefCell<Vec<MemberRecord>>,
    add_response: RefCell<Option<AddMemberResponse>>,
    failing: RefCell<HashSet<String>>,
    /// endpoint -> number of failed checks before it turns healthy
    healthy: RefCell<HashMap<String, u32>>,
    health_checks: RefCell<HashMap<String, u32>>,
    calls: RefCell<Vec<ClientCall>>,
    next_id: Cell<u64>,
}

impl MockMembershipClient {
    pub fn new() -> Self {
        MockMembershipClient {
            members: RefCell::new(Vec::new()),
            add_response: RefCell::new(None),
            failing: RefCell::new(HashSet::new()),
            healthy: RefCell::new(HashMap::new()),
            health_checks: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
            next_id: Cell::new(0x1000),
        }
    }

    /// Register started members for the given nodes
    pub fn with_members(self, nodes: &[Node]) -> Self {
        for node in nodes {
            let id = self.allocate_id();
            self.members.borrow_mut().push(MemberRecord {
                id,
                name: node.name.clone(),
                peer_urls: vec![node.peer_url()],
                client_urls: vec![node.client_url()],
            });
        }
        self
    }

    pub fn with_member(self, record: MemberRecord) -> Self {
        self.members.borrow_mut().push(record);
        self
    }

    /// Serve this response from member-add instead of deriving one
    pub fn with_add_response(self, response: AddMemberResponse) -> Self {
        *self.add_response.borrow_mut() = Some(response);
        self
    }

    pub fn with_healthy_endpoint(self, endpoint: &str) -> Self {
        self.healthy_after(endpoint, 0)
    }

    /// `endpoint` fails `failures` health checks, then reports healthy
    pub fn healthy_after(self, endpoint: &str, failures: u32) -> Self {
        self.healthy.borrow_mut().insert(endpoint.to_string(), failures);
        self
    }

    /// Make an operation (`member_list`, `member_add`, `member_remove`) fail
    pub fn failing(self, operation: &str) -> Self {
        self.failing.borrow_mut().insert(operation.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.borrow().clone()
    }

    pub fn members(&self) -> Vec<MemberRecord> {
        self.members.borrow().clone()
    }

    /// IDs passed to member-remove, in order
    pub fn removed_ids(&self) -> Vec<u64> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                ClientCall::MemberRemove { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// `(name, peer_url)` pairs passed to member-add, in order
    pub fn added(&self) -> Vec<(String, String)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                ClientCall::MemberAdd { name, peer_url, .. } => {
                    Some((name.clone(), peer_url.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn health_checks(&self, endpoint: &str) -> u32 {
        self.health_checks.borrow().get(endpoint).copied().unwrap_or(0)
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn check_failing(&self, operation: &str) -> RpcResult<()> {
        if self.failing.borrow().contains(operation) {
            return Err(RpcError::CommandFailed {
                operation: operation.replace('_', " "),
                stderr: "context deadline exceeded".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MockMembershipClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipClient for MockMembershipClient {
    fn member_list(&self, endpoints: &[String]) -> RpcResult<Vec<MemberRecord>> {
        self.calls.borrow_mut().push(ClientCall::MemberList {
            endpoints: endpoints.to_vec(),
        });
        self.check_failing("member_list")?;
        Ok(self.members.borrow().clone())
    }

    fn member_add(
        &self,
        endpoints: &[String],
        name: &str,
        peer_url: &str,
    ) -> RpcResult<AddMemberResponse> {
        self.calls.borrow_mut().push(ClientCall::MemberAdd {
            endpoints: endpoints.to_vec(),
            name: name.to_string(),
            peer_url: peer_url.to_string(),
        });
        self.check_failing("member_add")?;

        if let Some(response) = self.add_response.borrow().clone() {
            return Ok(response);
        }

        // Same shape etcd answers with: every member (in list order) plus the new one
        let mut members = self.members.borrow_mut();
        let mut cluster: Vec<String> = members
            .iter()
            .filter(|member| !member.name.is_empty())
            .filter_map(|member| {
                member
                    .peer_urls
                    .first()
                    .map(|url| format!("{}={}", member.name, url))
            })
            .collect();
        cluster.push(format!("{}={}", name, peer_url));
        members.push(MemberRecord {
            id: self.allocate_id(),
            name: String::new(),
            peer_urls: vec![peer_url.to_string()],
            client_urls: Vec::new(),
        });

        Ok(AddMemberResponse {
            initial_advertise_peer_urls: peer_url.to_string(),
            initial_cluster: cluster.join(","),
            initial_cluster_state: "existing".to_string(),
        })
    }

    fn member_remove(&self, endpoints: &[String], id: u64) -> RpcResult<()> {
        self.calls.borrow_mut().push(ClientCall::MemberRemove {
            endpoints: endpoints.to_vec(),
            id,
        });
        self.check_failing("member_remove")?;
        let mut members = self.members.borrow_mut();
        let before = members.len();
        members.retain(|member| member.id != id);
        if members.len() == before {
            return Err(RpcError::CommandFailed {
                operation: "member remove".to_string(),
                stderr: format!("etcdserver: member not found ({:x})", id),
            });
        }
        Ok(())
    }

    fn endpoint_health(&self, endpoints: &[String]) -> RpcResult<()> {
        self.calls.borrow_mut().push(ClientCall::EndpointHealth {
            endpoints: endpoints.to_vec(),
        });
        for endpoint in endpoints {
            let checks = {
                let mut counts = self.health_checks.borrow_mut();
                let count = counts.entry(endpoint.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let healthy = matches!(
                self.healthy.borrow().get(endpoint),
                Some(failures) if checks > *failures
            );
            if !healthy {
                return Err(RpcError::CommandFailed {
                    operation: "endpoint health".to_string(),
                    stderr: format!("{} is unhealthy: failed to connect", endpoint),
                });
            }
        }
        Ok(())
    }
}

/// A call made against [`MockServiceManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCall {
    Restart,
    Stop,
    Disable,
}

/// Service manager tracking a single daemon's running state
pub struct MockServiceManager {
    active: Cell<bool>,
    refuse_stop: Cell<bool>,
    calls: RefCell<Vec<ServiceCall>>,
}

impl MockServiceManager {
    /// A stopped daemon
    pub fn new() -> Self {
        MockServiceManager {
            active: Cell::new(false),
            refuse_stop: Cell::new(false),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// A running daemon
    pub fn running() -> Self {
        let service = Self::new();
        service.active.set(true);
        service
    }

    /// Stop requests succeed but the daemon keeps running
    pub fn refusing_stop(self) -> Self {
        self.refuse_stop.set(true);
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.borrow().clone()
    }

    pub fn restarts(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| **call == ServiceCall::Restart)
            .count()
    }
}

impl Default for MockServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for MockServiceManager {
    fn is_active(&self) -> MemberResult<bool> {
        Ok(self.active.get())
    }

    fn restart(&self) -> MemberResult<()> {
        self.calls.borrow_mut().push(ServiceCall::Restart);
        self.active.set(true);
        Ok(())
    }

    fn stop(&self) -> MemberResult<()> {
        self.calls.borrow_mut().push(ServiceCall::Stop);
        if !self.refuse_stop.get() {
            self.active.set(false);
        }
        Ok(())
    }

    fn disable(&self) -> MemberResult<()> {
        self.calls.borrow_mut().push(ServiceCall::Disable);
        Ok(())
    }
}

/// Command runner that records command lines and replays canned results
pub struct MockRunner {
    responses: RefCell<Vec<Result<String, RunFailure>>>,
    commands: RefCell<Vec<String>>,
}

impl MockRunner {
    /// Responses are served in the given order; afterwards every command succeeds with no output
    pub fn with_responses(responses: Vec<Result<String, RunFailure>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Every command run so far, as `program arg1 arg2 ...`
    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, RunFailure> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.commands.borrow_mut().push(line);
        self.responses.borrow_mut().pop().unwrap_or(Ok(String::new()))
    }
}
