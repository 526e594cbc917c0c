use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{Config, DEFAULT_CONFIG_PATH};

/// etcd-member - per-node etcd membership lifecycle
#[derive(Parser)]
#[command(name = "etcd-member")]
#[command(version)]
#[command(about = "Bootstrap, join, resume, repair or remove this host's etcd membership")]
#[command(long_about = "
etcd-member runs one reconciliation pass for the local control-plane node:
- Bootstrap a new cluster when no data exists and no peer is reachable
- Join the existing cluster when peers are reachable
- Resume as a known member
- Repair stale local data the cluster no longer recognises
- Remove a decommissioned node from the cluster

Usage examples:
  etcd-member reconcile                       # one full run using /etc/etcd-member/config.toml
  etcd-member plan --node cp-2-b71c           # show what a run would do
  etcd-member reconcile --decommission cp-3-0e4a
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Local node identity (overrides the configuration file)
    #[arg(long, global = true)]
    pub node: Option<String>,

    /// Node registry snapshot (overrides the configuration file)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Daemon data directory (overrides the configuration file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one full reconciliation: inspect, decide, apply, verify
    Reconcile {
        /// Remove this node from the cluster instead of starting it
        #[arg(long, value_name = "NODE")]
        decommission: Option<String>,
    },

    /// Inspect and decide without changing anything
    Plan {
        /// Plan the removal of this node
        #[arg(long, value_name = "NODE")]
        decommission: Option<String>,
    },

    /// Print the daemon configuration for a startup mode
    Render {
        /// Startup mode to render
        #[arg(short, long, value_enum, default_value = "resume")]
        mode: RenderMode,

        /// Print command-line flags instead of the configuration file
        #[arg(long)]
        args: bool,
    },

    /// Print the resolved topology
    Topology,

    /// Poll the local daemon until it reports healthy
    Health {
        /// Maximum number of checks
        #[arg(long)]
        attempts: Option<u32>,

        /// Seconds between checks
        #[arg(long)]
        interval: Option<u64>,
    },
}

/// Startup modes that can be rendered without contacting the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RenderMode {
    Bootstrap,
    Resume,
}

impl Cli {
    /// Load the configuration file and apply command-line overrides
    pub fn load_config(&self) -> crate::error::MemberResult<Config> {
        let mut config = Config::load_or_default(&self.config)?;
        if let Some(node) = &self.node {
            config.node_name = Some(node.clone());
        }
        if let Some(registry) = &self.registry {
            config.registry_path = Some(registry.clone());
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        match &self.command {
            Commands::Reconcile { decommission: Some(node) }
            | Commands::Plan { decommission: Some(node) } => {
                config.decommission = Some(node.clone());
            }
            Commands::Health { attempts, interval } => {
                if let Some(attempts) = attempts {
                    config.health_attempts = *attempts;
                }
                if let Some(interval) = interval {
                    config.health_interval_secs = *interval;
                }
            }
            _ => {}
        }
        Ok(config)
    }
}
