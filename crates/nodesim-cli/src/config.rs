//! Configuration for the `nodesim` binary.
//!
//! Values come from a TOML file, then `NODESIM_*` environment variables
//! override individual fields. A missing file means defaults.

use nodesim_core::{
    Execution, OrchestratorSettings, ServerReadiness, SupervisorSettings, Topology,
    DEFAULT_CONTROL_PLANE_PORT,
};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "nodesim.toml";

/// Interval between readiness probes when `readiness_probe` is enabled.
const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    Topology(#[from] nodesim_core::SimError),
}

/// Simulation configuration as read from `nodesim.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Number of server nodes.
    pub servers: i64,
    /// Number of client nodes.
    pub clients: i64,
    /// Prefix for node and device names.
    pub prefix: String,
    /// Role prefix for servers.
    pub server_prefix: String,
    /// Role prefix for clients.
    pub client_prefix: String,
    /// Agent executable.
    pub binary: PathBuf,
    /// Base working directory.
    pub directory: PathBuf,
    /// Address pool, assigned in order.
    pub ips: Vec<Ipv4Addr>,
    /// Read the registry from `nodes.json` instead of deriving it.
    pub import: bool,
    /// Write `nodes.json` after building.
    pub export: bool,
    /// Keep links, addresses and data directories across runs.
    pub persist: bool,

    /// Port clients use to reach servers.
    pub control_plane_port: u16,
    /// Pause after each server start.
    pub server_settle_secs: u64,
    /// Pause between link and directory removal.
    pub release_settle_secs: u64,
    /// Liveness polling interval while stopping agents.
    pub stop_poll_secs: u64,
    /// Give up waiting for an agent to exit after this long.
    pub stop_timeout_secs: Option<u64>,
    /// Poll the server's control-plane port instead of a fixed settle.
    pub readiness_probe: bool,
    /// Upper bound for the readiness probe.
    pub readiness_timeout_secs: u64,
    /// Run each role's nodes concurrently.
    pub parallel_roles: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        let topology = Topology::default();
        Self {
            servers: 1,
            clients: 0,
            prefix: topology.prefix,
            server_prefix: topology.server_prefix,
            client_prefix: topology.client_prefix,
            binary: topology.binary,
            directory: topology.directory,
            ips: Vec::new(),
            import: false,
            export: false,
            persist: false,
            control_plane_port: DEFAULT_CONTROL_PLANE_PORT,
            server_settle_secs: 3,
            release_settle_secs: 3,
            stop_poll_secs: 3,
            stop_timeout_secs: None,
            readiness_probe: false,
            readiness_timeout_secs: 30,
            parallel_roles: false,
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

fn flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { var, value }),
    }
}

fn address_list(var: &'static str, value: String) -> Result<Vec<Ipv4Addr>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

impl SimConfig {
    /// Load `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parse `path`, falling back to defaults if it does not exist.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `NODESIM_SERVERS` | `servers` |
    /// | `NODESIM_CLIENTS` | `clients` |
    /// | `NODESIM_PREFIX` | `prefix` |
    /// | `NODESIM_BINARY` | `binary` |
    /// | `NODESIM_DIRECTORY` | `directory` |
    /// | `NODESIM_IPS` | `ips` (comma separated) |
    /// | `NODESIM_IMPORT` | `import` |
    /// | `NODESIM_EXPORT` | `export` |
    /// | `NODESIM_PERSIST` | `persist` |
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("NODESIM_SERVERS") {
            self.servers = parsed("NODESIM_SERVERS", v)?;
        }
        if let Some(v) = lookup("NODESIM_CLIENTS") {
            self.clients = parsed("NODESIM_CLIENTS", v)?;
        }
        if let Some(v) = lookup("NODESIM_PREFIX") {
            self.prefix = v;
        }
        if let Some(v) = lookup("NODESIM_BINARY") {
            self.binary = PathBuf::from(v);
        }
        if let Some(v) = lookup("NODESIM_DIRECTORY") {
            self.directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("NODESIM_IPS") {
            self.ips = address_list("NODESIM_IPS", v)?;
        }
        if let Some(v) = lookup("NODESIM_IMPORT") {
            self.import = flag("NODESIM_IMPORT", v)?;
        }
        if let Some(v) = lookup("NODESIM_EXPORT") {
            self.export = flag("NODESIM_EXPORT", v)?;
        }
        if let Some(v) = lookup("NODESIM_PERSIST") {
            self.persist = flag("NODESIM_PERSIST", v)?;
        }
        Ok(())
    }

    /// Topology request. The pool and names are only validated when the
    /// registry is derived rather than imported.
    pub fn topology(&self) -> Result<Topology, ConfigError> {
        let topology = Topology::builder()
            .servers(self.servers)
            .clients(self.clients)
            .prefix(&self.prefix)
            .server_prefix(&self.server_prefix)
            .client_prefix(&self.client_prefix)
            .binary(&self.binary)
            .directory(&self.directory)
            .addresses(self.ips.iter().copied())
            .import(self.import)
            .export(self.export)
            .persist_resources(self.persist)
            .build()?;
        Ok(topology)
    }

    /// Orchestrator tuning.
    pub fn settings(&self) -> OrchestratorSettings {
        let readiness = if self.readiness_probe {
            ServerReadiness::Probe {
                port: self.control_plane_port,
                interval: PROBE_INTERVAL,
                timeout: Duration::from_secs(self.readiness_timeout_secs),
            }
        } else {
            ServerReadiness::Settle(Duration::from_secs(self.server_settle_secs))
        };

        OrchestratorSettings {
            supervisor: SupervisorSettings {
                control_plane_port: self.control_plane_port,
                readiness,
                stop_poll_interval: Duration::from_secs(self.stop_poll_secs),
                stop_timeout: self.stop_timeout_secs.map(Duration::from_secs),
            },
            release_settle: Duration::from_secs(self.release_settle_secs),
            execution: if self.parallel_roles {
                Execution::RoleStaged
            } else {
                Execution::Sequential
            },
        }
    }
}
