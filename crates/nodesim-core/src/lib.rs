//! # nodesim-core
//!
//! Node lifecycle and resource orchestration for simulating a multi-node
//! scheduler cluster on a single host.
//!
//! Each simulated node gets a dummy network interface with its own address
//! and a scratch directory, and runs one scheduler agent configured to join
//! its peers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      nodesim-core                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  Topology ──▶ Registry::build / Registry::import         │
//! │                     │                                    │
//! │                     ▼                                    │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  Orchestrator   │────▶│  Provisioner             │   │
//! │  │  - build()      │     │  - ensure() / release()  │   │
//! │  │  - clean()      │     └──────────────────────────┘   │
//! │  │  - clean_       │     ┌──────────────────────────┐   │
//! │  │    resources_   │────▶│  Supervisor              │   │
//! │  │    only()       │     │  - start() / stop()      │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                   │                      │
//! └───────────────────────────────────┼──────────────────────┘
//!                                     ▼
//!                       nodesim-host: dyn Host
//!              (LinuxHost in production, MemoryHost in tests)
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use nodesim_core::{Orchestrator, OrchestratorSettings, Topology};
//! use nodesim_host::LinuxHost;
//! use std::sync::Arc;
//!
//! # async fn example() -> nodesim_core::Result<()> {
//! let topology = Topology::builder()
//!     .servers(3)
//!     .clients(2)
//!     .prefix("sim-")
//!     .binary("/usr/local/bin/nomad")
//!     .directory("/tmp/sim")
//!     .addresses((1..=5).map(|i| std::net::Ipv4Addr::new(10, 0, 0, i)))
//!     .build()?;
//!
//! let orchestrator = Orchestrator::new(Arc::new(LinuxHost::new()), OrchestratorSettings::default());
//! let (mut registry, report) = orchestrator.build(&topology).await?;
//! assert!(report.is_success());
//!
//! // ... run scenarios against the cluster ...
//!
//! orchestrator.clean(&mut registry, topology.persist_resources).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Ordering guarantees
//!
//! - Servers occupy the first registry positions, so they are provisioned
//!   and started before any client
//! - Every server start is followed by a readiness barrier
//! - Teardown stops all clients before any server

mod error;
mod node;
mod orchestrator;
mod provisioner;
mod registry;
mod report;
mod supervisor;
mod topology;

pub use error::{Result, SimError};
pub use node::{Node, Role};
pub use orchestrator::{
    Execution, NodeStatus, Orchestrator, OrchestratorSettings, DEFAULT_RELEASE_SETTLE,
};
pub use provisioner::Provisioner;
pub use registry::{snapshot_path, Registry, REGISTRY_FILE};
pub use report::{BatchReport, NodeOutcome, Phase};
pub use supervisor::{
    agent_command, Peers, ServerReadiness, Supervisor, SupervisorSettings,
    DEFAULT_CONTROL_PLANE_PORT, DEFAULT_SERVER_SETTLE, DEFAULT_STOP_POLL,
};
pub use topology::{
    Topology, TopologyBuilder, DEFAULT_DATACENTER, DEFAULT_PREFIX, DEFAULT_REGION,
    MAX_DEVICE_NAME_LEN,
};
