//! Error types for etcd-member
//!
//! Every failure a reconciliation run can end with maps onto one variant of
//! [`MemberError`], and every variant maps onto a process exit code.

use thiserror::Error;

/// Main error type for membership operations
#[derive(Error, Debug)]
pub enum MemberError {
    /// Missing or invalid input, or a required binary is unavailable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The registry does not resolve to a coherent peer set
    #[error("Topology error: {0}")]
    Topology(String),

    /// The consensus store client failed or answered with garbage
    #[error("RPC error: {0}")]
    Rpc(RpcError),

    /// The daemon never reported healthy within the retry budget
    #[error("Health check timed out after {attempts} attempts: {last_error}")]
    HealthTimeout { attempts: u32, last_error: String },

    /// Local data exists but the cluster denies the membership and repair failed
    #[error("Corrupt local state: {0}")]
    CorruptState(String),

    /// The service manager refused a start, stop or disable request
    #[error("Service error: {0}")]
    Service(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Registry snapshot could not be parsed
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Daemon configuration could not be rendered
    #[error("Render error: {0}")]
    Render(#[from] serde_yaml::Error),
}

impl MemberError {
    /// Process exit code reported to the orchestrator
    pub fn exit_code(&self) -> i32 {
        match self {
            MemberError::Configuration(_) | MemberError::Toml(_) | MemberError::Json(_) => 2,
            MemberError::Topology(_) => 3,
            MemberError::Rpc(_) => 4,
            MemberError::HealthTimeout { .. } => 5,
            MemberError::CorruptState(_)
            | MemberError::Service(_)
            | MemberError::Io(_)
            | MemberError::Render(_) => 1,
        }
    }
}

impl From<RpcError> for MemberError {
    fn from(err: RpcError) -> Self {
        match err {
            // A client binary that cannot even be launched is a setup problem
            RpcError::Launch { .. } => MemberError::Configuration(err.to_string()),
            other => MemberError::Rpc(other),
        }
    }
}

/// Consensus store client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The client binary could not be launched
    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    /// The client exited non-zero (dial or command timeout, rejected request)
    #[error("{operation} failed: {stderr}")]
    CommandFailed { operation: String, stderr: String },

    /// The client succeeded but its output could not be understood
    #[error("unexpected {operation} response: {reason}")]
    MalformedResponse { operation: String, reason: String },
}

/// Result type for membership operations
pub type MemberResult<T> = Result<T, MemberError>;

/// Result type for raw client calls
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let configuration = MemberError::Configuration("no node name".into());
        let topology = MemberError::Topology("no active nodes".into());
        let rpc = MemberError::Rpc(RpcError::CommandFailed {
            operation: "member list".into(),
            stderr: "context deadline exceeded".into(),
        });
        let health = MemberError::HealthTimeout { attempts: 20, last_error: "unhealthy".into() };

        assert_eq!(configuration.exit_code(), 2);
        assert_eq!(topology.exit_code(), 3);
        assert_eq!(rpc.exit_code(), 4);
        assert_eq!(health.exit_code(), 5);
        assert_eq!(MemberError::CorruptState("wipe failed".into()).exit_code(), 1);
    }

    #[test]
    fn test_rpc_error_display() {
        let err = MemberError::from(RpcError::CommandFailed {
            operation: "member add".into(),
            stderr: "etcdserver: unhealthy cluster".into(),
        });
        assert_eq!(err.to_string(), "RPC error: member add failed: etcdserver: unhealthy cluster");
    }

    #[test]
    fn test_missing_binary_is_a_configuration_error() {
        let err = MemberError::from(RpcError::Launch {
            program: "etcdctl".into(),
            reason: "No such file or directory".into(),
        });
        assert!(matches!(err, MemberError::Configuration(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_toml_errors_are_configuration_failures() {
        let err: MemberError = toml::from_str::<toml::Value>("name = ").unwrap_err().into();
        assert_eq!(err.exit_code(), 2);
    }
}
