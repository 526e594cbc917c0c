use colored::*;

use crate::cli::{Cli, Commands, RenderMode};
use crate::client::EtcdctlClient;
use crate::config::Config;
use crate::error::MemberResult;
use crate::executor::{Executor, RunOutcome, RunReport};
use crate::health::HealthVerifier;
use crate::registry::{NodeRegistry, PortDefaults};
use crate::runner::ProcessRunner;
use crate::supervisor::{ApplyOutcome, DaemonConfig, StartupMode, SystemdService};
use crate::topology::{ClusterTopology, TopologyState};

pub fn execute_command(cli: &Cli) -> MemberResult<()> {
    let config = cli.load_config()?;
    match &cli.command {
        Commands::Reconcile { .. } => execute_reconcile(&config, cli.verbose),
        Commands::Plan { .. } => execute_plan(&config),
        Commands::Render { mode, args } => execute_render(&config, *mode, *args),
        Commands::Topology => execute_topology(&config),
        Commands::Health { .. } => execute_health(&config),
    }
}

fn load_registry(config: &Config) -> MemberResult<NodeRegistry> {
    let ports = PortDefaults {
        peer: config.peer_port,
        client: config.client_port,
    };
    NodeRegistry::load(config.registry_path()?, ports)
}

fn etcdctl(config: &Config) -> EtcdctlClient<ProcessRunner> {
    EtcdctlClient::new(ProcessRunner, config.etcdctl.clone())
        .with_timeouts(config.dial_timeout(), config.command_timeout())
}

fn systemd(config: &Config) -> SystemdService<ProcessRunner> {
    SystemdService::new(ProcessRunner, config.systemctl.clone(), config.service_unit.clone())
}

fn execute_reconcile(config: &Config, verbose: bool) -> MemberResult<()> {
    config.validate()?;
    let registry = load_registry(config)?;
    let client = etcdctl(config);
    let service = systemd(config);

    let report = Executor::new(config, &client, &service).run(&registry)?;
    print_report(&report, verbose);
    Ok(())
}

fn print_report(report: &RunReport, verbose: bool) {
    if report.repaired {
        println!("{} stale local data was wiped", "Repaired:".bright_yellow().bold());
    }
    match &report.outcome {
        RunOutcome::Applied { outcome, health_attempts } => {
            let what = match outcome {
                ApplyOutcome::Unchanged => "configuration unchanged, daemon running",
                ApplyOutcome::Started => "daemon started",
                ApplyOutcome::Restarted => "configuration updated, daemon restarted",
            };
            println!("{} {} ({})", "Done:".bright_green().bold(), report.action, what);
            if verbose {
                println!("  healthy after {} check(s)", health_attempts);
            }
        }
        RunOutcome::Removed { member_id } => {
            println!("{} member {:x} removed", "Done:".bright_green().bold(), member_id);
        }
        RunOutcome::AlreadyRemoved => {
            println!("{} no matching member, nothing to remove", "Done:".bright_green().bold());
        }
    }
    if verbose {
        println!("  node: {}", report.node);
        println!("  initial state: {}", report.initial_state);
    }
}

fn execute_plan(config: &Config) -> MemberResult<()> {
    config.validate()?;
    let registry = load_registry(config)?;
    let client = etcdctl(config);
    let service = systemd(config);

    let plan = Executor::new(config, &client, &service).plan(&registry)?;
    println!("{} {}", "Node:".bright_cyan(), plan.local.name);
    println!("{} {}", "State:".bright_cyan(), plan.local_state);
    if let Some(topology) = &plan.topology {
        let reachable: Vec<&str> = topology
            .reachable_peers
            .iter()
            .map(|node| node.name.as_str())
            .collect();
        println!("{} {}", "Reachable peers:".bright_cyan(), reachable.join(", "));
    }
    println!("{} {}", "Action:".bright_green().bold(), plan.action);
    Ok(())
}

fn execute_render(config: &Config, mode: RenderMode, args: bool) -> MemberResult<()> {
    let registry = load_registry(config)?;
    let local = registry.local(config.node_name()?)?;
    let topology = TopologyState::new(ClusterTopology::resolve(&registry)?, local)?;

    let mode = match mode {
        RenderMode::Bootstrap => StartupMode::Bootstrap {
            initial_cluster: topology.topology.initial_cluster(),
        },
        RenderMode::Resume => StartupMode::Resume,
    };
    let rendered = DaemonConfig::render(&topology.local, &config.data_dir, &mode);
    if args {
        println!("{}", rendered.to_args().join(" "));
    } else {
        print!("{}", rendered.to_yaml()?);
    }
    Ok(())
}

fn execute_topology(config: &Config) -> MemberResult<()> {
    let registry = load_registry(config)?;
    let topology = ClusterTopology::resolve(&registry)?;

    println!("{}", "Members:".bright_cyan());
    for node in topology.members() {
        println!("  {} {} {}", node.name.bold(), node.peer_url(), node.client_url());
    }
    println!("{} {}", "Initial cluster:".bright_cyan(), topology.initial_cluster());
    println!("{} {}", "Endpoints:".bright_cyan(), topology.client_endpoints().join(","));
    Ok(())
}

fn execute_health(config: &Config) -> MemberResult<()> {
    let registry = load_registry(config)?;
    let local = registry.local(config.node_name()?)?;
    let client = etcdctl(config);

    let attempts =
        HealthVerifier::new(&client, config.health_policy()).verify(&local.client_url())?;
    println!(
        "{} {} healthy after {} check(s)",
        "Healthy:".bright_green().bold(),
        local.client_url(),
        attempts
    );
    Ok(())
}
