//! Node registry: the fixed-size set of nodes for one simulation run, and
//! its `nodes.json` snapshot.

use crate::error::{Result, SimError};
use crate::node::Node;
use crate::topology::Topology;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Snapshot file name inside the base directory.
pub const REGISTRY_FILE: &str = "nodes.json";

/// The set of nodes in one simulation.
///
/// Node count is fixed at creation; nodes are only mutated in place as
/// processes start and stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    nodes: Vec<Node>,
}

/// Path of the snapshot for a base directory.
pub fn snapshot_path(directory: &Path) -> PathBuf {
    directory.join(REGISTRY_FILE)
}

impl Registry {
    /// Derive a registry from a topology request.
    ///
    /// Servers take positions `0..servers`, clients the positions after
    /// them. Addresses and device indices come from one shared counter, so
    /// they are unique across roles.
    pub fn build(topology: &Topology) -> Result<Self> {
        topology.validate()?;

        let nodes = topology
            .node_names()
            .enumerate()
            .map(|(position, (server, name))| Node {
                server,
                binary: topology.binary.clone(),
                dir: topology.directory.join(&name),
                name,
                region: topology.region.clone(),
                dc: topology.datacenter.clone(),
                ip: topology.addresses[position],
                device: topology.device_name(position),
                pid: None,
            })
            .collect();

        let registry = Self { nodes };
        registry.log_nodes("Mapped nodes");
        Ok(registry)
    }

    /// Wrap an existing node list.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Read `<directory>/nodes.json`.
    pub async fn import(directory: &Path) -> Result<Self> {
        let path = snapshot_path(directory);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SimError::PersistenceRead {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        let nodes: Vec<Node> =
            serde_json::from_slice(&bytes).map_err(|e| SimError::PersistenceRead {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let registry = Self { nodes };
        registry.log_nodes("Imported nodes");
        Ok(registry)
    }

    /// Write `<directory>/nodes.json`, creating the directory if needed.
    ///
    /// Process ids are not written.
    pub async fn export(&self, directory: &Path) -> Result<PathBuf> {
        let path = snapshot_path(directory);
        let write_err = |reason: String| SimError::PersistenceWrite {
            path: path.clone(),
            reason,
        };

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.nodes
            .serialize(&mut serializer)
            .map_err(|e| write_err(e.to_string()))?;

        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        tokio::fs::write(&path, &buf)
            .await
            .map_err(|e| write_err(e.to_string()))?;

        info!(path = %path.display(), nodes = self.nodes.len(), "Exported registry");
        Ok(path)
    }

    /// All nodes, in build order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Mutable access to the nodes. The count cannot change.
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Look up a node by name.
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Server nodes, in registry order.
    pub fn servers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.server)
    }

    /// Client nodes, in registry order.
    pub fn clients(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.server)
    }

    /// Addresses of all server nodes, in registry order.
    pub fn server_addresses(&self) -> Vec<Ipv4Addr> {
        self.servers().map(|n| n.ip).collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy of this registry with every process id cleared.
    pub fn without_pids(&self) -> Self {
        let mut copy = self.clone();
        for node in &mut copy.nodes {
            node.pid = None;
        }
        copy
    }

    fn log_nodes(&self, message: &str) {
        info!(
            servers = self.servers().count(),
            clients = self.clients().count(),
            "{}",
            message
        );
        for node in &self.nodes {
            info!(role = %node.role(), "{}", node);
        }
    }
}
