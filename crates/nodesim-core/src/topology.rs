//! Topology request: how many nodes of each role and how to name and place
//! them.

use crate::error::{Result, SimError};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Region label applied to every node.
pub const DEFAULT_REGION: &str = "global";

/// Datacenter label applied to every node.
pub const DEFAULT_DATACENTER: &str = "dc1";

/// Longest interface name Linux accepts (IFNAMSIZ - 1).
pub const MAX_DEVICE_NAME_LEN: usize = 15;

/// Name prefix used when none is given.
pub const DEFAULT_PREFIX: &str = "sim-";

/// A validated topology request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Number of server (control-plane) nodes.
    pub servers: usize,
    /// Number of client (worker) nodes.
    pub clients: usize,
    /// Prefix shared by every node name and device name.
    pub prefix: String,
    /// Role prefix for server names (default: `server`).
    pub server_prefix: String,
    /// Role prefix for client names (default: `client`).
    pub client_prefix: String,
    /// Agent executable.
    pub binary: PathBuf,
    /// Base working directory; node data dirs and `nodes.json` live here.
    pub directory: PathBuf,
    /// Address pool, consumed in build order.
    pub addresses: Vec<Ipv4Addr>,
    /// Region label.
    pub region: String,
    /// Datacenter label.
    pub datacenter: String,
    /// Read the registry from `nodes.json` instead of deriving it.
    pub import: bool,
    /// Write `nodes.json` after building.
    pub export: bool,
    /// Keep network resources and data dirs across runs.
    pub persist_resources: bool,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            servers: 0,
            clients: 0,
            prefix: DEFAULT_PREFIX.to_string(),
            server_prefix: "server".to_string(),
            client_prefix: "client".to_string(),
            binary: PathBuf::from("/usr/local/bin/nomad"),
            directory: PathBuf::from("/tmp/nodesim"),
            addresses: Vec::new(),
            region: DEFAULT_REGION.to_string(),
            datacenter: DEFAULT_DATACENTER.to_string(),
            import: false,
            export: false,
            persist_resources: false,
        }
    }
}

impl Topology {
    /// Create a new builder.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Total node count.
    pub fn node_count(&self) -> usize {
        self.servers + self.clients
    }

    /// Prefix for device names: the alphanumeric part of [`Self::prefix`]
    /// followed by `eth`, so `sim-` yields `simeth`.
    pub fn device_prefix(&self) -> String {
        let mut device: String = self
            .prefix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        device.push_str("eth");
        device
    }

    /// Name of the device at global position `index`.
    pub fn device_name(&self, index: usize) -> String {
        format!("{}{}", self.device_prefix(), index)
    }

    /// Name of the node with `ordinal` within its role.
    pub fn node_name(&self, server: bool, ordinal: usize) -> String {
        let role_prefix = if server {
            &self.server_prefix
        } else {
            &self.client_prefix
        };
        format!("{}{}{}", self.prefix, role_prefix, ordinal)
    }

    /// Every node name in build order: servers first, then clients.
    pub fn node_names(&self) -> impl Iterator<Item = (bool, String)> + '_ {
        let servers = (0..self.servers).map(|i| (true, self.node_name(true, i)));
        let clients = (0..self.clients).map(|i| (false, self.node_name(false, i)));
        servers.chain(clients)
    }

    /// Check that a registry can be derived from this request.
    ///
    /// Imported registries never consult the pool or the naming fields, so
    /// [`TopologyBuilder::build`] skips this when `import` is set;
    /// [`Registry::build`](crate::Registry::build) always runs it.
    pub fn validate(&self) -> Result<()> {
        let needed = self.node_count();
        if self.addresses.len() < needed {
            return Err(SimError::InsufficientAddressPool {
                needed,
                available: self.addresses.len(),
            });
        }

        let mut names = HashSet::with_capacity(needed);
        for (_, name) in self.node_names() {
            if !names.insert(name.clone()) {
                return Err(SimError::InvalidTopology(format!(
                    "node name {:?} would be used twice; adjust the role prefixes",
                    name
                )));
            }
        }

        let mut seen = HashSet::with_capacity(needed);
        for ip in &self.addresses[..needed] {
            if !seen.insert(*ip) {
                return Err(SimError::InvalidTopology(format!(
                    "address {} appears more than once in the pool",
                    ip
                )));
            }
        }

        if needed > 0 {
            if self.device_prefix() == "eth" {
                return Err(SimError::InvalidTopology(format!(
                    "prefix {:?} yields device names like eth0 that may belong to the host",
                    self.prefix
                )));
            }
            let longest = self.device_name(needed - 1);
            if longest.len() > MAX_DEVICE_NAME_LEN {
                return Err(SimError::InvalidTopology(format!(
                    "device name {:?} exceeds {} bytes; shorten the prefix",
                    longest, MAX_DEVICE_NAME_LEN
                )));
            }
        }

        Ok(())
    }
}

/// Builder for [`Topology`].
///
/// Counts are taken as signed integers so that negative values coming from
/// configuration are reported as [`SimError::InvalidTopology`].
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: Topology,
    servers: i64,
    clients: i64,
}

impl TopologyBuilder {
    /// Set the server count.
    pub fn servers(mut self, count: i64) -> Self {
        self.servers = count;
        self
    }

    /// Set the client count.
    pub fn clients(mut self, count: i64) -> Self {
        self.clients = count;
        self
    }

    /// Set the global name prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topology.prefix = prefix.into();
        self
    }

    /// Set the server role prefix.
    pub fn server_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topology.server_prefix = prefix.into();
        self
    }

    /// Set the client role prefix.
    pub fn client_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topology.client_prefix = prefix.into();
        self
    }

    /// Set the agent executable.
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.topology.binary = path.into();
        self
    }

    /// Set the base working directory.
    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.topology.directory = path.into();
        self
    }

    /// Set the address pool.
    pub fn addresses(mut self, pool: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        self.topology.addresses = pool.into_iter().collect();
        self
    }

    /// Import the registry instead of deriving it.
    pub fn import(mut self, import: bool) -> Self {
        self.topology.import = import;
        self
    }

    /// Export the registry after building.
    pub fn export(mut self, export: bool) -> Self {
        self.topology.export = export;
        self
    }

    /// Keep resources across runs.
    pub fn persist_resources(mut self, persist: bool) -> Self {
        self.topology.persist_resources = persist;
        self
    }

    /// Build the topology, validating counts and, unless importing, the
    /// address pool and names.
    pub fn build(mut self) -> Result<Topology> {
        self.topology.servers = count("server", self.servers)?;
        self.topology.clients = count("client", self.clients)?;
        if !self.topology.import {
            self.topology.validate()?;
        }
        Ok(self.topology)
    }
}

fn count(role: &str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| SimError::InvalidTopology(format!("{} count must be >= 0, got {}", role, value)))
}
