//! Run configuration
//!
//! Everything a reconciliation run needs is carried in [`Config`], loaded
//! from a TOML file and then overridden from the command line. Nothing is
//! read ad hoc from the environment.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MemberError, MemberResult};
use crate::health::HealthPolicy;
use crate::types::{DEFAULT_CLIENT_PORT, DEFAULT_PEER_PORT};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/etcd-member/config.toml";

/// Reconciliation run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of the local node in the registry
    pub node_name: Option<String>,
    /// Registry snapshot written by the provisioning layer
    pub registry_path: Option<PathBuf>,
    /// Daemon data directory
    pub data_dir: PathBuf,
    /// Where the rendered daemon configuration is written
    pub daemon_config_path: PathBuf,
    /// Service unit managed through systemctl
    pub service_unit: String,
    /// Consensus store client binary
    pub etcdctl: String,
    /// Service manager binary
    pub systemctl: String,
    /// Peer port for registry entries that omit one
    pub peer_port: u16,
    /// Client port for registry entries that omit one
    pub client_port: u16,
    /// Client dial timeout in seconds
    pub dial_timeout_secs: u64,
    /// Client command timeout in seconds
    pub command_timeout_secs: u64,
    /// Health polling attempts
    pub health_attempts: u32,
    /// Seconds between health polls
    pub health_interval_secs: u64,
    /// Node whose removal has been requested
    pub decommission: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_name: None,
            registry_path: None,
            data_dir: PathBuf::from("/var/lib/etcd"),
            daemon_config_path: PathBuf::from("/etc/etcd/etcd.conf.yml"),
            service_unit: "etcd".to_string(),
            etcdctl: "etcdctl".to_string(),
            systemctl: "systemctl".to_string(),
            peer_port: DEFAULT_PEER_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            dial_timeout_secs: 5,
            command_timeout_secs: 10,
            health_attempts: 20,
            health_interval_secs: 2,
            decommission: None,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> MemberResult<Self> {
        let config: Config = toml::from_str(text)?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> MemberResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            MemberError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Load the file if it exists, otherwise start from defaults
    pub fn load_or_default(path: &Path) -> MemberResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check that the configuration is usable for a run
    pub fn validate(&self) -> MemberResult<()> {
        self.node_name()?;
        self.registry_path()?;
        if self.peer_port == self.client_port {
            return Err(MemberError::Configuration(format!(
                "peer and client port are both {}",
                self.peer_port
            )));
        }
        if self.health_attempts == 0 {
            return Err(MemberError::Configuration(
                "health_attempts must be at least 1".to_string(),
            ));
        }
        if self.etcdctl.is_empty() || self.systemctl.is_empty() {
            return Err(MemberError::Configuration(
                "client and service manager binaries must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Identity of the local node
    pub fn node_name(&self) -> MemberResult<&str> {
        match self.node_name.as_deref() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(MemberError::Configuration("node_name is not set".to_string())),
        }
    }

    /// Path of the registry snapshot
    pub fn registry_path(&self) -> MemberResult<&Path> {
        self.registry_path
            .as_deref()
            .ok_or_else(|| MemberError::Configuration("registry_path is not set".to_string()))
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Retry budget for the health verifier
    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            max_attempts: self.health_attempts,
            interval: Duration::from_secs(self.health_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.peer_port, 2380);
        assert_eq!(config.client_port, 2379);
        assert_eq!(config.health_attempts, 20);
        assert_eq!(config.health_policy().interval, Duration::from_secs(2));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/etcd"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            node_name = "controlplane-1-k3j9"
            registry_path = "/etc/etcd-member/registry.toml"
            health_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.node_name().unwrap(), "controlplane-1-k3j9");
        assert_eq!(config.health_attempts, 5);
        assert_eq!(config.service_unit, "etcd");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_node_name_is_configuration_error() {
        let config = Config {
            registry_path: Some(PathBuf::from("/tmp/registry.toml")),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, MemberError::Configuration(_)));
    }

    #[test]
    fn test_colliding_ports_rejected() {
        let config = Config {
            node_name: Some("a".into()),
            registry_path: Some(PathBuf::from("/tmp/registry.toml")),
            peer_port: 2379,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "node_name = \"cp-1\"").unwrap();
        writeln!(file, "data_dir = \"/srv/etcd\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/etcd"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_types_fail_to_parse() {
        let err = Config::from_toml("health_attempts = \"many\"").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
