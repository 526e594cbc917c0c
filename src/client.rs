//! Consensus store membership client
//!
//! [`MembershipClient`] is the capability the reconciler needs from the
//! store: list, add and remove members, and check endpoint health. Every
//! call is blocking and carries the configured dial and command timeouts.
//! [`EtcdctlClient`] implements it on top of the `etcdctl` binary.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{RpcError, RpcResult};
use crate::runner::{CommandRunner, RunFailure};
use crate::types::{AddMemberResponse, MemberRecord};

/// Membership operations consumed from the consensus store
pub trait MembershipClient {
    /// Current member list, as seen by any of `endpoints`
    fn member_list(&self, endpoints: &[String]) -> RpcResult<Vec<MemberRecord>>;

    /// Register a new member and return the startup parameters it must use
    fn member_add(
        &self,
        endpoints: &[String],
        name: &str,
        peer_url: &str,
    ) -> RpcResult<AddMemberResponse>;

    /// Remove the member with the given ID
    fn member_remove(&self, endpoints: &[String], id: u64) -> RpcResult<()>;

    /// Succeeds only if every endpoint reports healthy
    fn endpoint_health(&self, endpoints: &[String]) -> RpcResult<()>;
}

/// [`MembershipClient`] backed by the `etcdctl` command-line client
pub struct EtcdctlClient<R: CommandRunner> {
    runner: R,
    program: String,
    dial_timeout: Duration,
    command_timeout: Duration,
}

impl<R: CommandRunner> EtcdctlClient<R> {
    pub fn new(runner: R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            dial_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeouts(mut self, dial_timeout: Duration, command_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self.command_timeout = command_timeout;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn execute(&self, operation: &str, endpoints: &[String], args: &[&str]) -> RpcResult<String> {
        let mut argv = vec![
            format!("--endpoints={}", endpoints.join(",")),
            format!("--dial-timeout={}s", self.dial_timeout.as_secs().max(1)),
            format!("--command-timeout={}s", self.command_timeout.as_secs().max(1)),
        ];
        argv.extend(args.iter().map(|arg| arg.to_string()));

        self.runner.run(&self.program, &argv).map_err(|failure| match failure {
            RunFailure::Launch(reason) => RpcError::Launch {
                program: self.program.clone(),
                reason,
            },
            RunFailure::Exit(stderr) => RpcError::CommandFailed {
                operation: operation.to_string(),
                stderr,
            },
        })
    }
}

impl<R: CommandRunner> MembershipClient for EtcdctlClient<R> {
    fn member_list(&self, endpoints: &[String]) -> RpcResult<Vec<MemberRecord>> {
        let out = self.execute("member list", endpoints, &["member", "list", "-w", "json"])?;
        parse_member_list(&out)
    }

    fn member_add(
        &self,
        endpoints: &[String],
        name: &str,
        peer_url: &str,
    ) -> RpcResult<AddMemberResponse> {
        let peer_urls = format!("--peer-urls={}", peer_url);
        let out = self.execute("member add", endpoints, &["member", "add", name, &peer_urls])?;
        parse_member_add(&out)
    }

    fn member_remove(&self, endpoints: &[String], id: u64) -> RpcResult<()> {
        let hex = format!("{:x}", id);
        self.execute("member remove", endpoints, &["member", "remove", &hex])?;
        Ok(())
    }

    fn endpoint_health(&self, endpoints: &[String]) -> RpcResult<()> {
        let args = ["endpoint", "health", "-w", "json"];
        let out = self.execute("endpoint health", endpoints, &args)?;
        parse_endpoint_health(&out)
    }
}

#[derive(Debug, Deserialize)]
struct MemberListJson {
    #[serde(default)]
    members: Vec<MemberJson>,
}

#[derive(Debug, Deserialize)]
struct MemberJson {
    #[serde(rename = "ID")]
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(rename = "peerURLs", default)]
    peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    client_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointHealthJson {
    endpoint: String,
    health: bool,
    #[serde(default)]
    error: Option<String>,
}

fn malformed(operation: &str, reason: impl ToString) -> RpcError {
    RpcError::MalformedResponse {
        operation: operation.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `etcdctl member list -w json`
pub fn parse_member_list(out: &str) -> RpcResult<Vec<MemberRecord>> {
    let list: MemberListJson =
        serde_json::from_str(out).map_err(|e| malformed("member list", e))?;
    Ok(list
        .members
        .into_iter()
        .map(|m| MemberRecord {
            id: m.id,
            name: m.name,
            peer_urls: m.peer_urls,
            client_urls: m.client_urls,
        })
        .collect())
}

/// Parse the `ETCD_*` assignments printed by `etcdctl member add`
pub fn parse_member_add(out: &str) -> RpcResult<AddMemberResponse> {
    let mut initial_cluster = None;
    let mut peer_urls = None;
    let mut cluster_state = None;

    for line in out.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "ETCD_INITIAL_CLUSTER" => initial_cluster = Some(value),
            "ETCD_INITIAL_ADVERTISE_PEER_URLS" => peer_urls = Some(value),
            "ETCD_INITIAL_CLUSTER_STATE" => cluster_state = Some(value),
            _ => {}
        }
    }

    match (peer_urls, initial_cluster, cluster_state) {
        (Some(initial_advertise_peer_urls), Some(initial_cluster), Some(initial_cluster_state)) => {
            Ok(AddMemberResponse {
                initial_advertise_peer_urls,
                initial_cluster,
                initial_cluster_state,
            })
        }
        _ => Err(malformed("member add", "missing ETCD_INITIAL_* assignments")),
    }
}

/// Parse `etcdctl endpoint health -w json`
pub fn parse_endpoint_health(out: &str) -> RpcResult<()> {
    let reports: Vec<EndpointHealthJson> =
        serde_json::from_str(out).map_err(|e| malformed("endpoint health", e))?;
    if reports.is_empty() {
        return Err(malformed("endpoint health", "no endpoints reported"));
    }
    match reports.into_iter().find(|report| !report.health) {
        None => Ok(()),
        Some(report) => Err(RpcError::CommandFailed {
            operation: "endpoint health".to_string(),
            stderr: format!(
                "{} is unhealthy: {}",
                report.endpoint,
                report.error.unwrap_or_else(|| "no reason given".to_string())
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;

    const MEMBER_LIST: &str = concat!(
        r#"{"header":{"cluster_id":14841639068965178418,"member_id":10276657743932975437,"#,
        r#""raft_term":2},"members":[{"ID":10276657743932975437,"name":"cp-1-a7f3","#,
        r#""peerURLs":["http://10.0.1.2:2380"],"clientURLs":["http://10.0.1.2:2379"]},"#,
        r#"{"ID":2,"peerURLs":["http://10.0.1.5:2380"]}]}"#
    );

    const MEMBER_ADD: &str = "Member ced000fda4d05edf added to cluster 8c4281cc65c7b112\n\n\
        ETCD_NAME=\"cp-4-b2c1\"\n\
        ETCD_INITIAL_CLUSTER=\"cp-1-a7f3=http://10.0.1.2:2380,cp-4-b2c1=http://10.0.1.5:2380\"\n\
        ETCD_INITIAL_ADVERTISE_PEER_URLS=\"http://10.0.1.5:2380\"\n\
        ETCD_INITIAL_CLUSTER_STATE=\"existing\"\n";

    fn endpoints() -> Vec<String> {
        vec!["http://10.0.1.2:2379".to_string(), "http://10.0.1.3:2379".to_string()]
    }

    #[test]
    fn test_parse_member_list() {
        let members = parse_member_list(MEMBER_LIST).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, 10276657743932975437);
        assert_eq!(members[0].name, "cp-1-a7f3");
        // a member that was added but never started has no name
        assert_eq!(members[1].name, "");
        assert!(members[1].client_urls.is_empty());
    }

    #[test]
    fn test_parse_member_add() {
        let response = parse_member_add(MEMBER_ADD).unwrap();
        assert_eq!(response.initial_advertise_peer_urls, "http://10.0.1.5:2380");
        assert_eq!(
            response.initial_cluster,
            "cp-1-a7f3=http://10.0.1.2:2380,cp-4-b2c1=http://10.0.1.5:2380"
        );
        assert_eq!(response.initial_cluster_state, "existing");
    }

    #[test]
    fn test_parse_member_add_incomplete() {
        let err = parse_member_add("Member ced000fda4d05edf added to cluster\n").unwrap_err();
        assert!(matches!(err, RpcError::MalformedResponse { .. }));
    }

    #[test]
    fn test_parse_endpoint_health() {
        assert!(parse_endpoint_health(
            r#"[{"endpoint":"http://127.0.0.1:2379","health":true,"took":"1.8ms"}]"#
        )
        .is_ok());

        let err = parse_endpoint_health(
            concat!(
                r#"[{"endpoint":"http://127.0.0.1:2379","health":false,"took":"5s","#,
                r#""error":"context deadline exceeded"}]"#
            ),
        )
        .unwrap_err();
        assert!(err.to_string().contains("context deadline exceeded"));

        assert!(parse_endpoint_health("[]").is_err());
    }

    #[test]
    fn test_member_list_invocation() {
        let runner = MockRunner::with_responses(vec![Ok(MEMBER_LIST.into())]);
        let client = EtcdctlClient::new(runner, "etcdctl")
            .with_timeouts(Duration::from_secs(3), Duration::from_secs(7));
        let members = client.member_list(&endpoints()).unwrap();
        assert_eq!(members.len(), 2);

        let commands = client.runner().executed_commands();
        assert_eq!(
            commands,
            vec![concat!(
                "etcdctl --endpoints=http://10.0.1.2:2379,http://10.0.1.3:2379 ",
                "--dial-timeout=3s --command-timeout=7s member list -w json"
            )]
        );
    }

    #[test]
    fn test_member_add_invocation() {
        let runner = MockRunner::with_responses(vec![Ok(MEMBER_ADD.into())]);
        let client = EtcdctlClient::new(runner, "etcdctl");
        let response = client
            .member_add(&endpoints(), "cp-4-b2c1", "http://10.0.1.5:2380")
            .unwrap();
        assert_eq!(response.initial_cluster_state, "existing");
        let commands = client.runner().executed_commands();
        assert!(commands[0].ends_with("member add cp-4-b2c1 --peer-urls=http://10.0.1.5:2380"));
    }

    #[test]
    fn test_member_remove_uses_hex_id() {
        let client = EtcdctlClient::new(MockRunner::new(), "etcdctl");
        client.member_remove(&endpoints(), 0xced000fda4d05edf).unwrap();
        let commands = client.runner().executed_commands();
        assert!(commands[0].ends_with("member remove ced000fda4d05edf"));
    }

    #[test]
    fn test_non_zero_exit_is_command_failure() {
        let client = EtcdctlClient::new(
            MockRunner::with_responses(vec![Err(RunFailure::Exit(
                "context deadline exceeded".into(),
            ))]),
            "etcdctl",
        );
        let err = client.member_list(&endpoints()).unwrap_err();
        assert_eq!(
            err,
            RpcError::CommandFailed {
                operation: "member list".into(),
                stderr: "context deadline exceeded".into(),
            }
        );
    }

    #[test]
    fn test_launch_failure_names_program() {
        let client = EtcdctlClient::new(
            MockRunner::with_responses(vec![Err(RunFailure::Launch("not found".into()))]),
            "/opt/etcd/etcdctl",
        );
        let err = client.endpoint_health(&endpoints()).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Launch { ref program, .. } if program == "/opt/etcd/etcdctl"
        ));
    }
}
