//! Daemon process supervision
//!
//! The supervisor renders the daemon's full configuration from the chosen
//! startup mode and the local node, writes it to a fixed location and asks
//! the service manager to (re)start the daemon. Rendering is deterministic:
//! the same inputs always produce the same bytes, and a run whose rendered
//! configuration matches what is already on disk for a running daemon does
//! nothing at all.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{MemberError, MemberResult};
use crate::runner::{CommandRunner, RunFailure};
use crate::types::{AddMemberResponse, Node};

const CONFIG_HEADER: &str = "# Managed by etcd-member. Local changes are overwritten.\n";

/// Controls the managed daemon's lifecycle
pub trait ServiceManager {
    /// Whether the daemon is currently running
    fn is_active(&self) -> MemberResult<bool>;

    /// Enable autostart and (re)start the daemon
    fn restart(&self) -> MemberResult<()>;

    /// Stop the daemon
    fn stop(&self) -> MemberResult<()>;

    /// Disable autostart
    fn disable(&self) -> MemberResult<()>;
}

/// [`ServiceManager`] backed by `systemctl`
pub struct SystemdService<R: CommandRunner> {
    runner: R,
    systemctl: String,
    unit: String,
}

impl<R: CommandRunner> SystemdService<R> {
    pub fn new(runner: R, systemctl: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            runner,
            systemctl: systemctl.into(),
            unit: unit.into(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn systemctl(&self, verb: &str) -> MemberResult<()> {
        let args = [verb.to_string(), self.unit.clone()];
        self.runner
            .run(&self.systemctl, &args)
            .map(|_| ())
            .map_err(|failure| self.failure(verb, failure))
    }

    fn failure(&self, verb: &str, failure: RunFailure) -> MemberError {
        match failure {
            RunFailure::Launch(reason) => MemberError::Configuration(format!(
                "cannot launch {}: {}",
                self.systemctl, reason
            )),
            RunFailure::Exit(stderr) => {
                MemberError::Service(format!("{} {} failed: {}", verb, self.unit, stderr))
            }
        }
    }
}

impl<R: CommandRunner> ServiceManager for SystemdService<R> {
    fn is_active(&self) -> MemberResult<bool> {
        let args = ["is-active".to_string(), "--quiet".to_string(), self.unit.clone()];
        match self.runner.run(&self.systemctl, &args) {
            Ok(_) => Ok(true),
            Err(RunFailure::Exit(_)) => Ok(false),
            Err(failure) => Err(self.failure("is-active", failure)),
        }
    }

    fn restart(&self) -> MemberResult<()> {
        self.systemctl("enable")?;
        self.systemctl("restart")
    }

    fn stop(&self) -> MemberResult<()> {
        self.systemctl("stop")
    }

    fn disable(&self) -> MemberResult<()> {
        self.systemctl("disable")
    }
}

/// How the daemon is told to (not) form cluster membership on start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupMode {
    /// Existing member: base flags only
    Resume,
    /// Founding member of a new cluster
    Bootstrap { initial_cluster: String },
    /// New member of an existing cluster, with the values member-add returned
    Join(AddMemberResponse),
}

/// The daemon's configuration file, in the daemon's own key names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonConfig {
    pub name: String,
    pub data_dir: String,
    pub listen_peer_urls: String,
    pub listen_client_urls: String,
    pub advertise_client_urls: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_advertise_peer_urls: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_cluster_state: Option<String>,
}

impl DaemonConfig {
    /// Render the configuration for `node` in the given startup mode
    pub fn render(node: &Node, data_dir: &Path, mode: &StartupMode) -> Self {
        let mut config = DaemonConfig {
            name: node.name.clone(),
            data_dir: data_dir.display().to_string(),
            listen_peer_urls: node.peer_url(),
            // loopback lets local clients (and the health verifier) connect
            listen_client_urls: format!(
                "{},http://127.0.0.1:{}",
                node.client_url(),
                node.client_port
            ),
            advertise_client_urls: node.client_url(),
            initial_advertise_peer_urls: None,
            initial_cluster: None,
            initial_cluster_state: None,
        };

        match mode {
            StartupMode::Resume => {}
            StartupMode::Bootstrap { initial_cluster } => {
                config.initial_advertise_peer_urls = Some(node.peer_url());
                config.initial_cluster = Some(initial_cluster.clone());
                config.initial_cluster_state = Some("new".to_string());
            }
            StartupMode::Join(response) => {
                config.initial_advertise_peer_urls =
                    Some(response.initial_advertise_peer_urls.clone());
                config.initial_cluster = Some(response.initial_cluster.clone());
                config.initial_cluster_state = Some(response.initial_cluster_state.clone());
            }
        }
        config
    }

    /// File contents written for the daemon
    pub fn to_yaml(&self) -> MemberResult<String> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("{}{}", CONFIG_HEADER, body))
    }

    /// Equivalent command-line flags, in the same order as the file
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--name={}", self.name),
            format!("--data-dir={}", self.data_dir),
            format!("--listen-peer-urls={}", self.listen_peer_urls),
            format!("--listen-client-urls={}", self.listen_client_urls),
            format!("--advertise-client-urls={}", self.advertise_client_urls),
        ];
        if let Some(urls) = &self.initial_advertise_peer_urls {
            args.push(format!("--initial-advertise-peer-urls={}", urls));
        }
        if let Some(cluster) = &self.initial_cluster {
            args.push(format!("--initial-cluster={}", cluster));
        }
        if let Some(state) = &self.initial_cluster_state {
            args.push(format!("--initial-cluster-state={}", state));
        }
        args
    }
}

/// Result of applying a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Same configuration, daemon already running; nothing done
    Unchanged,
    /// Same configuration, daemon was down and has been started
    Started,
    /// New configuration written and daemon restarted
    Restarted,
}

/// Writes daemon configuration and drives the service manager
pub struct Supervisor<'a, S: ServiceManager> {
    service: &'a S,
    config_path: PathBuf,
}

impl<'a, S: ServiceManager> Supervisor<'a, S> {
    pub fn new(service: &'a S, config_path: impl Into<PathBuf>) -> Self {
        Self {
            service,
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write `config` and make sure the daemon runs with it
    pub fn apply(&self, config: &DaemonConfig) -> MemberResult<ApplyOutcome> {
        let rendered = config.to_yaml()?;
        let unchanged = fs::read_to_string(&self.config_path)
            .map(|existing| existing == rendered)
            .unwrap_or(false);

        if unchanged {
            if self.service.is_active()? {
                info!(
                    path = %self.config_path.display(),
                    "configuration unchanged, daemon running"
                );
                return Ok(ApplyOutcome::Unchanged);
            }
            info!("configuration unchanged, starting daemon");
            self.service.restart()?;
            return Ok(ApplyOutcome::Started);
        }

        write_atomically(&self.config_path, &rendered)?;
        info!(path = %self.config_path.display(), "configuration written, restarting daemon");
        self.service.restart()?;
        Ok(ApplyOutcome::Restarted)
    }

    /// Stop the daemon and confirm it is no longer running
    pub fn stop_confirmed(&self) -> MemberResult<()> {
        self.service.stop()?;
        if self.service.is_active()? {
            return Err(MemberError::CorruptState(
                "daemon is still running after stop; refusing to touch its data".to_string(),
            ));
        }
        Ok(())
    }

    /// Stop the daemon and disable its autostart
    pub fn decommission(&self) -> MemberResult<()> {
        warn!("stopping daemon and disabling autostart");
        self.service.stop()?;
        self.service.disable()
    }
}

fn write_atomically(path: &Path, contents: &str) -> MemberResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
