//! In-memory [`Host`] for tests.
//!
//! Mirrors the failure behaviour of the real tools closely enough for the
//! engine's idempotency and ordering logic to be exercised: adding a link
//! or address twice fails, deleting something absent fails, and every call
//! is appended to an event log.

use crate::command::HostCommand;
use crate::error::{HostError, Result};
use crate::host::{address_label, Host};
use crate::mac::MacAddress;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// First pid handed out by [`MemoryHost::spawn`].
const FIRST_PID: u32 = 1000;

/// A dummy link as recorded by [`MemoryHost`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeLink {
    /// Hardware address, once set.
    pub mac: Option<MacAddress>,
    /// Bound addresses with their labels.
    pub addresses: Vec<(Ipv4Addr, String)>,
    /// Administrative state.
    pub up: bool,
}

/// A process as recorded by [`MemoryHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeProcess {
    /// The launched command.
    pub command: HostCommand,
    /// Where output would have gone.
    pub log_path: PathBuf,
    /// Whether the process is still running.
    pub alive: bool,
    /// Number of SIGINTs delivered.
    pub interrupts: u32,
}

#[derive(Debug, Default)]
struct State {
    links: BTreeMap<String, FakeLink>,
    dirs: BTreeSet<PathBuf>,
    processes: BTreeMap<u32, FakeProcess>,
    next_pid: u32,
    stubborn: HashSet<u32>,
    listening: HashSet<SocketAddr>,
    failures: HashSet<(String, String)>,
    events: Vec<String>,
}

/// In-memory host that records everything instead of touching the machine.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<State>,
}

fn refused(op: &str, target: &str, reason: &str) -> HostError {
    HostError::Command {
        command: format!("{} {}", op, target),
        status: "exit code 2".into(),
        stderr: reason.into(),
    }
}

impl MemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn enter(&self, op: &str, target: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.events.push(format!("{} {}", op, target));
        if state.failures.contains(&(op.to_string(), target.to_string())) {
            return Err(refused(op, target, "injected failure"));
        }
        Ok(state)
    }

    /// Make operation `op` fail whenever it targets `target`.
    ///
    /// `op` is the event name, e.g. `add-link`, `spawn`, `interrupt`;
    /// `target` is the device, address, path, node name or pid it logs.
    pub fn fail_on(&self, op: &str, target: &str) {
        self.lock()
            .failures
            .insert((op.to_string(), target.to_string()));
    }

    /// Simulate a leftover link from an earlier run holding `ip`.
    pub fn seed_link(&self, device: &str, ip: Ipv4Addr) {
        let mut state = self.lock();
        let link = state.links.entry(device.to_string()).or_default();
        link.addresses.push((ip, address_label(device)));
        link.up = true;
    }

    /// Simulate a leftover directory.
    pub fn seed_dir(&self, path: impl Into<PathBuf>) {
        self.lock().dirs.insert(path.into());
    }

    /// Keep `pid` alive after it is interrupted.
    pub fn ignore_interrupts(&self, pid: u32) {
        self.lock().stubborn.insert(pid);
    }

    /// Mark a process as exited.
    pub fn exit(&self, pid: u32) {
        if let Some(p) = self.lock().processes.get_mut(&pid) {
            p.alive = false;
        }
    }

    /// Make `addr` accept connections.
    pub fn listen(&self, addr: SocketAddr) {
        self.lock().listening.insert(addr);
    }

    /// Snapshot of all links.
    pub fn links(&self) -> BTreeMap<String, FakeLink> {
        self.lock().links.clone()
    }

    /// A single link, if present.
    pub fn link(&self, device: &str) -> Option<FakeLink> {
        self.lock().links.get(device).cloned()
    }

    /// Names of links holding `ip`.
    pub fn links_with(&self, ip: Ipv4Addr) -> Vec<String> {
        self.lock()
            .links
            .iter()
            .filter(|(_, l)| l.addresses.iter().any(|(a, _)| *a == ip))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether a directory exists.
    pub fn dir_exists(&self, path: &Path) -> bool {
        self.lock().dirs.contains(path)
    }

    /// A single process, if ever spawned.
    pub fn process(&self, pid: u32) -> Option<FakeProcess> {
        self.lock().processes.get(&pid).cloned()
    }

    /// All processes ever spawned, by pid.
    pub fn processes(&self) -> BTreeMap<u32, FakeProcess> {
        self.lock().processes.clone()
    }

    /// Every recorded call, in order, as `"<op> <target>"`.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Recorded calls for a single operation, in order, as targets.
    pub fn events_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{} ", op);
        self.lock()
            .events
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

/// The `-node=` flag of an agent command line, or the program name.
fn spawn_target(command: &HostCommand) -> String {
    command
        .args
        .iter()
        .find_map(|a| a.strip_prefix("-node="))
        .map(str::to_string)
        .unwrap_or_else(|| command.program.display().to_string())
}

#[async_trait]
impl Host for MemoryHost {
    async fn address_present(&self, ip: Ipv4Addr) -> Result<bool> {
        let state = self.enter("probe-address", &ip.to_string())?;
        Ok(state
            .links
            .values()
            .any(|l| l.addresses.iter().any(|(a, _)| *a == ip)))
    }

    async fn add_dummy_link(&self, device: &str) -> Result<()> {
        let mut state = self.enter("add-link", device)?;
        if state.links.contains_key(device) {
            return Err(refused("add-link", device, "RTNETLINK answers: File exists"));
        }
        state.links.insert(device.to_string(), FakeLink::default());
        Ok(())
    }

    async fn set_link_mac(&self, device: &str, mac: &MacAddress) -> Result<()> {
        let mut state = self.enter("set-mac", device)?;
        let link = state
            .links
            .get_mut(device)
            .ok_or_else(|| refused("set-mac", device, "Cannot find device"))?;
        link.mac = Some(*mac);
        Ok(())
    }

    async fn add_address(&self, device: &str, ip: Ipv4Addr) -> Result<()> {
        let mut state = self.enter("add-address", &ip.to_string())?;
        let link = state
            .links
            .get_mut(device)
            .ok_or_else(|| refused("add-address", device, "Cannot find device"))?;
        if link.addresses.iter().any(|(a, _)| *a == ip) {
            return Err(refused("add-address", device, "RTNETLINK answers: File exists"));
        }
        link.addresses.push((ip, address_label(device)));
        Ok(())
    }

    async fn set_link_up(&self, device: &str) -> Result<()> {
        let mut state = self.enter("link-up", device)?;
        let link = state
            .links
            .get_mut(device)
            .ok_or_else(|| refused("link-up", device, "Cannot find device"))?;
        link.up = true;
        Ok(())
    }

    async fn delete_address(&self, device: &str, ip: Ipv4Addr) -> Result<()> {
        let mut state = self.enter("del-address", &ip.to_string())?;
        let link = state
            .links
            .get_mut(device)
            .ok_or_else(|| refused("del-address", device, "Cannot find device"))?;
        let before = link.addresses.len();
        link.addresses.retain(|(a, _)| *a != ip);
        if link.addresses.len() == before {
            return Err(refused(
                "del-address",
                device,
                "RTNETLINK answers: Cannot assign requested address",
            ));
        }
        Ok(())
    }

    async fn delete_dummy_link(&self, device: &str) -> Result<()> {
        let mut state = self.enter("del-link", device)?;
        state
            .links
            .remove(device)
            .map(|_| ())
            .ok_or_else(|| refused("del-link", device, "Cannot find device"))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.enter("create-dir", &path.display().to_string())?;
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.enter("remove-dir", &path.display().to_string())?;
        state.dirs.retain(|d| !d.starts_with(path));
        Ok(())
    }

    async fn spawn(&self, command: &HostCommand, log_path: &Path) -> Result<u32> {
        let mut state = self.enter("spawn", &spawn_target(command))?;
        if state.next_pid == 0 {
            state.next_pid = FIRST_PID;
        }
        let pid = state.next_pid;
        state.next_pid += 1;
        state.processes.insert(
            pid,
            FakeProcess {
                command: command.clone(),
                log_path: log_path.to_path_buf(),
                alive: true,
                interrupts: 0,
            },
        );
        Ok(pid)
    }

    async fn interrupt(&self, pid: u32) -> Result<()> {
        let mut state = self.enter("interrupt", &pid.to_string())?;
        if pid == 0 {
            return Err(refused("interrupt", "0", "refusing to signal process group"));
        }
        let stubborn = state.stubborn.contains(&pid);
        if let Some(p) = state.processes.get_mut(&pid) {
            p.interrupts += 1;
            if !stubborn {
                p.alive = false;
            }
        }
        Ok(())
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.lock()
            .processes
            .get(&pid)
            .map(|p| p.alive)
            .unwrap_or(false)
    }

    async fn is_listening(&self, addr: SocketAddr) -> bool {
        self.lock().listening.contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_link_refused() {
        let host = MemoryHost::new();
        host.add_dummy_link("simeth0").await.unwrap();
        assert!(host.add_dummy_link("simeth0").await.is_err());
        assert_eq!(host.links().len(), 1);
    }

    #[tokio::test]
    async fn test_address_lifecycle() {
        let host = MemoryHost::new();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        host.add_dummy_link("simeth0").await.unwrap();
        host.add_address("simeth0", ip).await.unwrap();
        assert!(host.address_present(ip).await.unwrap());
        assert_eq!(
            host.link("simeth0").unwrap().addresses,
            vec![(ip, "simeth0:0".to_string())]
        );

        host.delete_address("simeth0", ip).await.unwrap();
        assert!(!host.address_present(ip).await.unwrap());
        assert!(host.delete_address("simeth0", ip).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure_is_logged() {
        let host = MemoryHost::new();
        host.fail_on("add-link", "simeth3");
        assert!(host.add_dummy_link("simeth3").await.is_err());
        assert_eq!(host.events(), vec!["add-link simeth3"]);
        assert!(host.links().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_and_interrupt() {
        let host = MemoryHost::new();
        let cmd = HostCommand::new("/usr/bin/nomad").args(["agent", "-node=sim-server0"]);
        let pid = host.spawn(&cmd, Path::new("/tmp/agent.log")).await.unwrap();
        assert_eq!(pid, FIRST_PID);
        assert!(host.is_alive(pid).await);
        assert_eq!(host.events_for("spawn"), vec!["sim-server0"]);

        host.interrupt(pid).await.unwrap();
        assert!(!host.is_alive(pid).await);
        assert_eq!(host.process(pid).unwrap().interrupts, 1);
    }

    #[tokio::test]
    async fn test_stubborn_process_survives_interrupt() {
        let host = MemoryHost::new();
        let pid = host
            .spawn(&HostCommand::new("nomad"), Path::new("/tmp/agent.log"))
            .await
            .unwrap();
        host.ignore_interrupts(pid);
        host.interrupt(pid).await.unwrap();
        assert!(host.is_alive(pid).await);
        host.exit(pid);
        assert!(!host.is_alive(pid).await);
    }
}
