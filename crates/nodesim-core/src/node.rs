//! Node record: one simulated cluster member.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Control-plane member.
    Server,
    /// Worker.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// One simulated node.
///
/// Serialized with the key names used by `nodes.json`. The process id is
/// runtime-only and never written; a decoded node always has `pid == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Whether this node is a server.
    #[serde(rename = "Server")]
    pub server: bool,
    /// Agent executable.
    #[serde(rename = "Binary")]
    pub binary: PathBuf,
    /// Unique node name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Region label.
    #[serde(rename = "Region")]
    pub region: String,
    /// Datacenter label.
    #[serde(rename = "Dc")]
    pub dc: String,
    /// Assigned address, unique within the registry.
    #[serde(rename = "Ip")]
    pub ip: Ipv4Addr,
    /// Virtual interface name, unique within the registry.
    #[serde(rename = "Device")]
    pub device: String,
    /// Agent data directory.
    #[serde(rename = "Dir")]
    pub dir: PathBuf,
    /// Running agent process, if any.
    #[serde(skip)]
    pub pid: Option<u32>,
}

impl Node {
    /// The node's role.
    pub fn role(&self) -> Role {
        if self.server {
            Role::Server
        } else {
            Role::Client
        }
    }

    /// Whether a process is currently associated with this node.
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    /// Where the agent's stdout and stderr are appended.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join("agent.log")
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{} [ {} : {} : {} ]",
            self.region,
            self.dc,
            self.name,
            self.ip,
            self.device,
            self.dir.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node {
            server: true,
            binary: PathBuf::from("/usr/local/bin/nomad"),
            name: "sim-server0".into(),
            region: "global".into(),
            dc: "dc1".into(),
            ip: Ipv4Addr::new(10, 0, 0, 1),
            device: "simeth0".into(),
            dir: PathBuf::from("/tmp/sim/sim-server0"),
            pid: Some(4711),
        }
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(
            node().to_string(),
            "global.dc1.sim-server0 [ 10.0.0.1 : simeth0 : /tmp/sim/sim-server0 ]"
        );
    }

    #[test]
    fn test_json_keys_and_pid_skipped() {
        let value = serde_json::to_value(node()).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["Binary", "Dc", "Device", "Dir", "Ip", "Name", "Region", "Server"]
        );
        assert_eq!(obj["Ip"], "10.0.0.1");
    }

    #[test]
    fn test_decoded_node_has_no_pid() {
        let json = serde_json::to_string(&node()).unwrap();
        let decoded: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.pid, None);
        assert!(!decoded.is_running());
        assert_eq!(decoded.role(), Role::Server);
    }

    #[test]
    fn test_log_path() {
        assert_eq!(
            node().log_path(),
            PathBuf::from("/tmp/sim/sim-server0/agent.log")
        );
    }
}
