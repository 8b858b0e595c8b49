//! The host resource view.

use crate::command::HostCommand;
use crate::error::Result;
use crate::mac::MacAddress;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

/// Label under which a node's address is bound to its link.
///
/// Distinct labels let many aliased addresses coexist on one host.
pub fn address_label(device: &str) -> String {
    format!("{}:0", device)
}

/// Everything the simulation needs from the machine it runs on.
///
/// Network and filesystem state behind this trait is global to the host and
/// uncoordinated; callers are expected to operate on one node's resources
/// at a time.
#[async_trait]
pub trait Host: Send + Sync {
    /// Whether `ip` is currently assigned to any interface.
    async fn address_present(&self, ip: Ipv4Addr) -> Result<bool>;

    /// Create a dummy-type link named `device`.
    async fn add_dummy_link(&self, device: &str) -> Result<()>;

    /// Set the hardware address of `device`.
    async fn set_link_mac(&self, device: &str, mac: &MacAddress) -> Result<()>;

    /// Bind `ip/24` to `device` under [`address_label`].
    async fn add_address(&self, device: &str, ip: Ipv4Addr) -> Result<()>;

    /// Bring `device` administratively up.
    async fn set_link_up(&self, device: &str) -> Result<()>;

    /// Remove the `ip/24` binding from `device`.
    async fn delete_address(&self, device: &str, ip: Ipv4Addr) -> Result<()>;

    /// Delete the dummy link `device`.
    async fn delete_dummy_link(&self, device: &str) -> Result<()>;

    /// Create `path` and all missing parents. Succeeds if it already exists.
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Recursively remove `path`. Succeeds if it is already gone.
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Launch `command` in the background and return its process id.
    async fn spawn(&self, command: &HostCommand, log_path: &Path) -> Result<u32>;

    /// Ask process `pid` to shut down gracefully (SIGINT).
    ///
    /// Succeeds if the process no longer exists.
    async fn interrupt(&self, pid: u32) -> Result<()>;

    /// Whether `pid` still denotes a live process.
    async fn is_alive(&self, pid: u32) -> bool;

    /// Whether something accepts TCP connections on `addr`.
    async fn is_listening(&self, addr: SocketAddr) -> bool;
}
