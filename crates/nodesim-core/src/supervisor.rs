//! Process supervisor: builds role-specific agent command lines, launches
//! agents and shuts them down.

use crate::error::{Result, SimError};
use crate::node::Node;
use crate::registry::Registry;
use nodesim_host::{Host, HostCommand};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Port clients use to reach the servers' control plane.
pub const DEFAULT_CONTROL_PLANE_PORT: u16 = 4647;

/// Pause after starting a server when no readiness probe is configured.
pub const DEFAULT_SERVER_SETTLE: Duration = Duration::from_secs(3);

/// Interval between liveness checks while stopping an agent.
pub const DEFAULT_STOP_POLL: Duration = Duration::from_secs(3);

/// What to wait for after a server agent has been launched, before the
/// next node is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReadiness {
    /// Sleep for a fixed duration.
    Settle(Duration),
    /// Poll `<server ip>:<port>` until it accepts connections, giving up
    /// after `timeout`.
    Probe {
        /// Port to connect to.
        port: u16,
        /// Delay between attempts.
        interval: Duration,
        /// Upper bound on the wait.
        timeout: Duration,
    },
}

impl Default for ServerReadiness {
    fn default() -> Self {
        Self::Settle(DEFAULT_SERVER_SETTLE)
    }
}

/// Tuning for [`Supervisor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Port appended to `-servers=` flags.
    pub control_plane_port: u16,
    /// Barrier applied after each server start.
    pub readiness: ServerReadiness,
    /// Interval between liveness checks when stopping.
    pub stop_poll_interval: Duration,
    /// Give up waiting for a stopped agent after this long (default: never).
    pub stop_timeout: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            control_plane_port: DEFAULT_CONTROL_PLANE_PORT,
            readiness: ServerReadiness::default(),
            stop_poll_interval: DEFAULT_STOP_POLL,
            stop_timeout: None,
        }
    }
}

/// The server addresses every agent is pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Peers {
    servers: Vec<Ipv4Addr>,
}

impl Peers {
    /// Collect the server addresses of a registry.
    pub fn of(registry: &Registry) -> Self {
        Self {
            servers: registry.server_addresses(),
        }
    }

    /// Server addresses, in registry order.
    pub fn servers(&self) -> &[Ipv4Addr] {
        &self.servers
    }

    /// Number of servers the control plane should wait for.
    pub fn bootstrap_expect(&self) -> usize {
        self.servers.len()
    }
}

/// Build the agent command line for `node`.
///
/// Servers join every server in the registry, themselves included; clients
/// are given every server's control-plane endpoint.
pub fn agent_command(node: &Node, peers: &Peers, control_plane_port: u16) -> HostCommand {
    let mut cmd = HostCommand::new(&node.binary)
        .arg("agent")
        .arg(format!("-node={}", node.name))
        .arg(format!("-bind={}", node.ip));

    if node.server {
        cmd = cmd
            .arg(format!("-bootstrap-expect={}", peers.bootstrap_expect()))
            .arg(format!("-data-dir={}", node.dir.display()))
            .arg(format!("-dc={}", node.dc))
            .args(peers.servers().iter().map(|ip| format!("-join={}", ip)))
            .arg(format!("-network-interface={}", node.device))
            .arg(format!("-region={}", node.region))
            .arg("-server");
    } else {
        cmd = cmd
            .arg("-client")
            .arg(format!("-data-dir={}", node.dir.display()))
            .arg(format!("-dc={}", node.dc))
            .args(
                peers
                    .servers()
                    .iter()
                    .map(|ip| format!("-servers={}:{}", ip, control_plane_port)),
            )
            .arg(format!("-network-interface={}", node.device))
            .arg(format!("-region={}", node.region));
    }
    cmd
}

/// Starts and stops agent processes.
pub struct Supervisor {
    host: Arc<dyn Host>,
    settings: SupervisorSettings,
}

impl Supervisor {
    /// Create a supervisor.
    pub fn new(host: Arc<dyn Host>, settings: SupervisorSettings) -> Self {
        Self { host, settings }
    }

    /// Get the supervisor settings.
    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Launch the agent for `node` and record its pid on the node.
    ///
    /// For servers this returns only after the readiness barrier. A node
    /// whose recorded process is still alive is left alone.
    pub async fn start(&self, node: &mut Node, peers: &Peers) -> Result<u32> {
        if let Some(pid) = node.pid {
            if self.host.is_alive(pid).await {
                warn!(node = %node.name, pid, "Agent already running, not starting another");
                return Ok(pid);
            }
        }

        let command = agent_command(node, peers, self.settings.control_plane_port);
        debug!(node = %node.name, cmd = %command, "Launching agent");
        let pid = self
            .host
            .spawn(&command, &node.log_path())
            .await
            .map_err(|cause| SimError::ProcessStart {
                node: node.name.clone(),
                cause,
            })?;
        node.pid = Some(pid);
        info!(node = %node.name, role = %node.role(), pid, "Agent started");

        if node.server {
            self.await_readiness(node).await;
        }
        Ok(pid)
    }

    async fn await_readiness(&self, node: &Node) {
        match &self.settings.readiness {
            ServerReadiness::Settle(pause) => {
                debug!(node = %node.name, ?pause, "Letting server settle");
                tokio::time::sleep(*pause).await;
            }
            ServerReadiness::Probe {
                port,
                interval,
                timeout,
            } => {
                let addr = SocketAddr::from((node.ip, *port));
                let started = Instant::now();
                loop {
                    if self.host.is_listening(addr).await {
                        info!(node = %node.name, %addr, "Server is accepting connections");
                        return;
                    }
                    if started.elapsed() >= *timeout {
                        warn!(node = %node.name, %addr, ?timeout, "Server not reachable yet, continuing");
                        return;
                    }
                    tokio::time::sleep(*interval).await;
                }
            }
        }
    }

    /// Interrupt the agent for `node` and wait until it has exited.
    ///
    /// Without a stop timeout this waits as long as the agent takes. A node
    /// with no recorded process is skipped.
    pub async fn stop(&self, node: &mut Node) -> Result<()> {
        let Some(pid) = node.pid else {
            warn!(node = %node.name, "No process recorded for node, nothing to stop");
            return Ok(());
        };

        debug!(node = %node.name, pid, "Interrupting agent");
        self.host
            .interrupt(pid)
            .await
            .map_err(|cause| SimError::ProcessStop {
                node: node.name.clone(),
                cause,
            })?;

        let started = Instant::now();
        while self.host.is_alive(pid).await {
            if let Some(limit) = self.settings.stop_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(SimError::ProcessStopTimeout {
                        node: node.name.clone(),
                        pid,
                        waited,
                    });
                }
            }
            tokio::time::sleep(self.settings.stop_poll_interval).await;
        }

        node.pid = None;
        info!(node = %node.name, pid, "Agent stopped");
        Ok(())
    }
}
