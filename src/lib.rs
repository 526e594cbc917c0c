//! # etcd-member: per-node membership lifecycle for an etcd control plane
//!
//! Each control-plane host runs one reconciliation pass that decides, from
//! what it has on disk and what the cluster reports, whether to bootstrap a
//! new cluster, join an existing one, resume as a known member, repair stale
//! local data, or leave the cluster. The consensus store itself is external;
//! this crate only drives its membership API and the local daemon.
//!
//! The decision ([`reconciler::decide`]) is a pure function. Side effects
//! live behind two traits, [`client::MembershipClient`] and
//! [`supervisor::ServiceManager`], so the whole lifecycle can be exercised
//! against the doubles in [`mock`].

#![warn(clippy::all)]

pub mod error;
pub mod types;
pub mod config;
pub mod registry;
pub mod topology;
pub mod runner;
pub mod client;
pub mod inspector;
pub mod reconciler;
pub mod supervisor;
pub mod health;
pub mod executor;
pub mod mock;
/// Command-line interface and argument parsing
pub mod cli;
/// Command execution
pub mod commands;

// Re-export main types
pub use client::{EtcdctlClient, MembershipClient};
pub use config::Config;
pub use error::{MemberError, MemberResult, RpcError};
pub use executor::{Executor, Plan, RunOutcome, RunReport};
pub use reconciler::{decide, Action};
pub use registry::NodeRegistry;
pub use supervisor::{DaemonConfig, ServiceManager, StartupMode, Supervisor, SystemdService};
pub use topology::{ClusterTopology, TopologyState};
pub use types::{
    AddMemberResponse, Confirmation, DecommissionSignal, LocalState, MemberRecord, Node,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
