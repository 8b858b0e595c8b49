//! `nodesim` entry point.
//!
//! ## Commands
//!
//! - **build**: provision every node and start its agent, then wait for
//!   Ctrl-C and tear down (or exit right away with `--detach`)
//! - **clean**: stop agents, clients first, and release resources
//! - **clean-resources**: release resources without touching processes
//! - **status**: show each node and what the host holds for it

mod config;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::{SimConfig, DEFAULT_CONFIG_FILE};
use nodesim_core::{snapshot_path, BatchReport, NodeStatus, Orchestrator, Registry, Topology};
use nodesim_host::LinuxHost;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "nodesim",
    about = "Simulate a multi-node scheduler cluster on a single host",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the simulation and start every agent.
    ///
    /// Servers start before clients. Without --detach the command stays in
    /// the foreground and cleans up on Ctrl-C.
    Build {
        /// Exit once every agent is started
        #[arg(short, long)]
        detach: bool,
    },
    /// Stop all agents and release their resources
    Clean,
    /// Release links, addresses and data directories only
    CleanResources,
    /// Show nodes and their host state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, status output to stdout
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("nodesim=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = SimConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    tracing::debug!(?config, "Configuration loaded");
    let topology = config.topology()?;

    let host = Arc::new(LinuxHost::new());
    let orchestrator = Orchestrator::new(host, config.settings());

    match cli.command {
        Commands::Build { detach } => build(&orchestrator, &topology, detach).await,
        Commands::Clean => {
            let mut registry = load_registry(&topology).await?;
            let report = orchestrator
                .clean(&mut registry, topology.persist_resources)
                .await;
            finish("clean", &report)
        }
        Commands::CleanResources => {
            let registry = load_registry(&topology).await?;
            let report = orchestrator.clean_resources_only(&registry).await;
            finish("clean-resources", &report)
        }
        Commands::Status => {
            let registry = load_registry(&topology).await?;
            let statuses = orchestrator.status(&registry).await;
            for (node, status) in registry.nodes().iter().zip(&statuses) {
                println!("{}  {}", node, describe(status));
            }
            Ok(())
        }
    }
}

async fn build(orchestrator: &Orchestrator, topology: &Topology, detach: bool) -> anyhow::Result<()> {
    let (mut registry, mut report) = orchestrator.build(topology).await?;
    if detach {
        return finish("build", &report);
    }

    info!(nodes = registry.len(), "Simulation running, press Ctrl-C to stop");
    signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");

    report.extend(
        orchestrator
            .clean(&mut registry, topology.persist_resources)
            .await,
    );
    finish("build", &report)
}

/// Registry for teardown and inspection: the snapshot if one exists,
/// otherwise derived from the configuration.
async fn load_registry(topology: &Topology) -> anyhow::Result<Registry> {
    let snapshot = snapshot_path(&topology.directory);
    let exists = tokio::fs::try_exists(&snapshot)
        .await
        .with_context(|| format!("checking for registry snapshot {}", snapshot.display()))?;
    let registry = if topology.import || exists {
        Registry::import(&topology.directory).await?
    } else {
        warn!(path = %snapshot.display(), "No registry snapshot, deriving nodes from configuration");
        Registry::build(topology)?
    };
    Ok(registry)
}

fn describe(status: &NodeStatus) -> String {
    let address = match status.address_present {
        Some(true) => "address up",
        Some(false) => "address missing",
        None => "address unknown",
    };
    let process = match status.process_alive {
        Some(true) => "agent running",
        Some(false) => "agent exited",
        None => "agent untracked",
    };
    format!("{}, {}", address, process)
}

fn finish(operation: &str, report: &BatchReport) -> anyhow::Result<()> {
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{} finished with {} failed step(s)", operation, failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodesim_core::{NodeOutcome, Phase, Role, SimError};
    use std::net::Ipv4Addr;
    use std::path::Path;

    fn topology(directory: &Path) -> Topology {
        Topology::builder()
            .servers(1)
            .clients(2)
            .directory(directory)
            .addresses((1..=3).map(|i| Ipv4Addr::new(10, 0, 0, i)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_registry_derives_without_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let topology = topology(tmp.path());

        let registry = load_registry(&topology).await.unwrap();
        assert_eq!(registry, Registry::build(&topology).unwrap());
    }

    #[tokio::test]
    async fn test_load_registry_prefers_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut snapshot = Registry::build(&topology(tmp.path())).unwrap();
        snapshot.nodes_mut()[0].name = "renamed".into();
        snapshot.export(tmp.path()).await.unwrap();

        let registry = load_registry(&topology(tmp.path())).await.unwrap();
        assert_eq!(registry.nodes()[0].name, "renamed");
    }

    #[tokio::test]
    async fn test_load_registry_import_mode_without_pool() {
        let tmp = tempfile::tempdir().unwrap();
        Registry::build(&topology(tmp.path()))
            .unwrap()
            .export(tmp.path())
            .await
            .unwrap();

        let config = config::SimConfig {
            import: true,
            directory: tmp.path().to_path_buf(),
            clients: 2,
            ..Default::default()
        };
        let topology = config.topology().unwrap();
        let registry = load_registry(&topology).await.unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_load_registry_import_mode_requires_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut topology = topology(tmp.path());
        topology.import = true;

        let err = load_registry(&topology).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SimError>(),
            Some(SimError::PersistenceRead { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_registry_reports_unreadable_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // a regular file where the base directory should be
        let topology = topology(file.path());

        let err = load_registry(&topology).await.unwrap_err();
        assert!(err.to_string().contains("checking for registry snapshot"));
    }

    #[test]
    fn test_finish_fails_on_any_failed_step() {
        let mut report = BatchReport::new();
        report.record(NodeOutcome::new("sim-server0", Phase::Stop, Ok(())));
        assert!(finish("clean", &report).is_ok());

        report.record(NodeOutcome::new(
            "sim-client0",
            Phase::Release,
            Err(SimError::InvalidTopology("boom".into())),
        ));
        let err = finish("clean", &report).unwrap_err();
        assert_eq!(err.to_string(), "clean finished with 1 failed step(s)");
    }

    #[test]
    fn test_describe() {
        let mut status = NodeStatus {
            name: "sim-server0".into(),
            role: Role::Server,
            ip: Ipv4Addr::new(10, 0, 0, 1),
            device: "simeth0".into(),
            address_present: Some(true),
            process_alive: None,
        };
        assert_eq!(describe(&status), "address up, agent untracked");

        status.address_present = Some(false);
        status.process_alive = Some(true);
        assert_eq!(describe(&status), "address missing, agent running");

        status.address_present = None;
        status.process_alive = Some(false);
        assert_eq!(describe(&status), "address unknown, agent exited");
    }
}
