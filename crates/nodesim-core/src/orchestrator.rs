//! Orchestrator: sequences registry construction, provisioning and agent
//! start-up, and the reverse for teardown.

use crate::error::Result;
use crate::node::{Node, Role};
use crate::provisioner::Provisioner;
use crate::registry::Registry;
use crate::report::{BatchReport, NodeOutcome, Phase};
use crate::supervisor::{Peers, Supervisor, SupervisorSettings};
use crate::topology::Topology;
use futures::future::join_all;
use nodesim_host::Host;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pause between removing a node's link and removing its data directory.
pub const DEFAULT_RELEASE_SETTLE: Duration = Duration::from_secs(3);

/// How nodes within one pass are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// One node at a time, in registry order.
    #[default]
    Sequential,
    /// All nodes of a role concurrently; servers finish before any client
    /// starts, and clients finish stopping before any server is stopped.
    RoleStaged,
}

/// Tuning for [`Orchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Agent start/stop behaviour.
    pub supervisor: SupervisorSettings,
    /// Pause inside resource release.
    pub release_settle: Duration,
    /// Scheduling of nodes within a pass.
    pub execution: Execution,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            supervisor: SupervisorSettings::default(),
            release_settle: DEFAULT_RELEASE_SETTLE,
            execution: Execution::default(),
        }
    }
}

/// Observed host state for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Node name.
    pub name: String,
    /// Node role.
    pub role: Role,
    /// Assigned address.
    pub ip: Ipv4Addr,
    /// Virtual interface.
    pub device: String,
    /// Whether the address is on the host (`None` if the probe failed).
    pub address_present: Option<bool>,
    /// Whether the recorded process is alive (`None` if no pid is known).
    pub process_alive: Option<bool>,
}

/// Drives a whole simulation through build and teardown.
///
/// One bad node never aborts a batch: every node is attempted and each
/// phase's result lands in the returned [`BatchReport`].
pub struct Orchestrator {
    host: Arc<dyn Host>,
    provisioner: Provisioner,
    supervisor: Supervisor,
    execution: Execution,
}

fn nodes_with_role(registry: &mut Registry, server: bool) -> Vec<&mut Node> {
    registry
        .nodes_mut()
        .iter_mut()
        .filter(|n| n.server == server)
        .collect()
}

impl Orchestrator {
    /// Create an orchestrator operating on `host`.
    pub fn new(host: Arc<dyn Host>, settings: OrchestratorSettings) -> Self {
        info!(execution = ?settings.execution, "Creating orchestrator");
        Self {
            provisioner: Provisioner::new(host.clone(), settings.release_settle),
            supervisor: Supervisor::new(host.clone(), settings.supervisor),
            host,
            execution: settings.execution,
        }
    }

    /// The resource provisioner.
    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// The process supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Derive the registry from `topology`, or import it from the base
    /// directory when `topology.import` is set.
    pub async fn registry(&self, topology: &Topology) -> Result<Registry> {
        if topology.import {
            Registry::import(&topology.directory).await
        } else {
            Registry::build(topology)
        }
    }

    /// Build the simulation: registry, then per node provisioning followed
    /// by agent start, then the optional export.
    ///
    /// Only registry construction errors are returned as `Err`; per-node
    /// failures are in the report.
    pub async fn build(&self, topology: &Topology) -> Result<(Registry, BatchReport)> {
        let mut registry = self.registry(topology).await?;
        let mut report = self
            .bring_up(&mut registry, topology.persist_resources)
            .await;

        if topology.export && !topology.import {
            let result = registry.export(&topology.directory).await;
            let target = crate::registry::snapshot_path(&topology.directory)
                .display()
                .to_string();
            report.record(NodeOutcome::new(target, Phase::Export, result.map(|_| ())));
        }

        report.log_summary("build");
        Ok((registry, report))
    }

    /// Provision and start every node of an existing registry.
    pub async fn bring_up(&self, registry: &mut Registry, persist: bool) -> BatchReport {
        info!(nodes = registry.len(), "Building nodes");
        let peers = Peers::of(registry);
        let mut report = BatchReport::new();

        match self.execution {
            Execution::Sequential => {
                for node in registry.nodes_mut() {
                    for outcome in self.bring_up_node(node, &peers, persist).await {
                        report.record(outcome);
                    }
                }
            }
            Execution::RoleStaged => {
                for server in [true, false] {
                    let nodes = nodes_with_role(registry, server);
                    let outcomes = join_all(
                        nodes
                            .into_iter()
                            .map(|node| self.bring_up_node(node, &peers, persist)),
                    )
                    .await;
                    for outcome in outcomes.into_iter().flatten() {
                        report.record(outcome);
                    }
                }
            }
        }
        report
    }

    async fn bring_up_node(&self, node: &mut Node, peers: &Peers, persist: bool) -> Vec<NodeOutcome> {
        info!(node = %node.name, "Starting node");
        let provisioned = self.provisioner.ensure(node, persist).await;
        if provisioned.is_err() {
            return vec![NodeOutcome::new(&node.name, Phase::Provision, provisioned)];
        }

        let started = self.supervisor.start(node, peers).await.map(|_| ());
        vec![
            NodeOutcome::new(&node.name, Phase::Provision, Ok(())),
            NodeOutcome::new(&node.name, Phase::Start, started),
        ]
    }

    /// Stop every client, then every server, releasing each node's
    /// resources right after its agent stops unless `persist_resources` is
    /// set.
    pub async fn clean(&self, registry: &mut Registry, persist_resources: bool) -> BatchReport {
        info!(nodes = registry.len(), persist_resources, "Cleaning nodes");
        let mut report = BatchReport::new();

        // clients depend on servers, so they go first
        for server in [false, true] {
            let nodes = nodes_with_role(registry, server);
            let outcomes = self
                .run_pass(nodes, |node| self.teardown_node(node, persist_resources))
                .await;
            for outcome in outcomes {
                report.record(outcome);
            }
        }

        report.log_summary("clean");
        report
    }

    async fn teardown_node(&self, node: &mut Node, persist_resources: bool) -> Vec<NodeOutcome> {
        info!(node = %node.name, "Removing node");
        let stopped = self.supervisor.stop(node).await;
        let mut outcomes = vec![NodeOutcome::new(&node.name, Phase::Stop, stopped)];
        if !persist_resources {
            let released = self.provisioner.release(node).await;
            outcomes.push(NodeOutcome::new(&node.name, Phase::Release, released));
        }
        outcomes
    }

    async fn run_pass<'a, F, Fut>(&self, nodes: Vec<&'a mut Node>, f: F) -> Vec<NodeOutcome>
    where
        F: Fn(&'a mut Node) -> Fut,
        Fut: Future<Output = Vec<NodeOutcome>>,
    {
        match self.execution {
            Execution::Sequential => {
                let mut outcomes = Vec::new();
                for node in nodes {
                    outcomes.extend(f(node).await);
                }
                outcomes
            }
            Execution::RoleStaged => join_all(nodes.into_iter().map(f))
                .await
                .into_iter()
                .flatten()
                .collect(),
        }
    }

    /// Release every node's resources regardless of process state.
    pub async fn clean_resources_only(&self, registry: &Registry) -> BatchReport {
        info!(nodes = registry.len(), "Cleaning node resources");
        let mut report = BatchReport::new();
        match self.execution {
            Execution::Sequential => {
                for node in registry.nodes() {
                    report.record(self.release_node(node).await);
                }
            }
            Execution::RoleStaged => {
                let outcomes =
                    join_all(registry.nodes().iter().map(|node| self.release_node(node))).await;
                for outcome in outcomes {
                    report.record(outcome);
                }
            }
        }

        report.log_summary("clean-resources");
        report
    }

    async fn release_node(&self, node: &Node) -> NodeOutcome {
        info!(node = %node.name, "Removing node resources");
        NodeOutcome::new(&node.name, Phase::Release, self.provisioner.release(node).await)
    }

    /// Inspect what the host currently holds for each node.
    pub async fn status(&self, registry: &Registry) -> Vec<NodeStatus> {
        let mut statuses = Vec::with_capacity(registry.len());
        for node in registry.nodes() {
            let address_present = match self.host.address_present(node.ip).await {
                Ok(present) => Some(present),
                Err(e) => {
                    warn!(node = %node.name, error = %e, "Address probe failed");
                    None
                }
            };
            let process_alive = match node.pid {
                Some(pid) => Some(self.host.is_alive(pid).await),
                None => None,
            };
            statuses.push(NodeStatus {
                name: node.name.clone(),
                role: node.role(),
                ip: node.ip,
                device: node.device.clone(),
                address_present,
                process_alive,
            });
        }
        statuses
    }
}
