use clap::Parser;
use colored::*;
use etcd_member::cli::Cli;
use etcd_member::commands::execute_command;
use std::process;
use tracing_subscriber::EnvFilter;

/// Log filter from `RUST_LOG`, falling back to the verbosity flags
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_tracing(cli.debug);

    if let Err(e) = execute_command(&cli) {
        eprintln!("{} {}", "Error:".bright_red().bold(), e);
        process::exit(e.exit_code());
    }
}
