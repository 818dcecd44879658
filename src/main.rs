//! virtualbird - throwaway BIRD test networks
//!
//! Builds bridges, network namespaces and veth pairs from a topology file,
//! runs one BIRD per namespace, and tears everything down again on
//! SIGINT or SIGTERM.

mod cli;
mod daemon;
mod environment;
mod error;
mod exec;
mod host;
mod manifest;
mod network;
mod process;
#[cfg(test)]
mod testing;

use cli::Cli;
use environment::Environment;
use error::Result;
use exec::NetnsExec;
use host::Host;
use network::IpRoute2;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    let mut topology = manifest::load(&cli.config)?;
    cli.apply_overrides(&mut topology.settings);
    debug!(?topology, "Loaded topology");

    let net = IpRoute2::new();
    let exec = NetnsExec::new();
    let host = Host::new(&net, &exec, topology.settings.clone());
    let mut env = Environment::from_topology(host, &topology.environment)?;

    if cli.check {
        env.print_plan();
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;

    // Registered before bring-up so an interrupt during setup is held
    // until teardown instead of killing the process
    let (mut interrupt, mut terminate) = {
        let _guard = rt.enter();
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    let outcome = env.up();
    match &outcome {
        Ok(()) => {
            info!("Topology is up, press Ctrl+C to tear it down");
            rt.block_on(async {
                tokio::select! {
                    _ = interrupt.recv() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
            });
        }
        Err(e) => error!(error = %e, "Bring-up failed, tearing down"),
    }

    let teardown = env.down();
    if let Err(e) = &teardown {
        error!(error = %e, "Teardown incomplete");
    }

    outcome.and(teardown)
}
