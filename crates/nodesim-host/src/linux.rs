//! Linux host: dummy links and address aliases via `ip`, processes via
//! [`CommandRunner`] and POSIX signals.

use crate::command::{CommandRunner, HostCommand, SystemRunner};
use crate::error::{HostError, Result};
use crate::host::{address_label, Host};
use crate::mac::MacAddress;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Prefix length used for every node address.
const PREFIX_LEN: u8 = 24;

/// How long a single readiness connect attempt may take.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// [`Host`] implementation for a Linux machine with iproute2 installed.
///
/// Network operations need `CAP_NET_ADMIN`.
#[derive(Debug, Default)]
pub struct LinuxHost<R = SystemRunner> {
    runner: R,
}

impl LinuxHost<SystemRunner> {
    /// Create a host backed by the system process runner.
    pub fn new() -> Self {
        Self {
            runner: SystemRunner::new(),
        }
    }
}

impl<R: CommandRunner> LinuxHost<R> {
    /// Create a host backed by a custom runner.
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    /// The underlying command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    async fn ip<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = HostCommand::new("ip").args(args);
        self.runner.output(&command).await?.check(&command)?;
        Ok(())
    }
}

/// Whether `ip -o -4 addr show` output lists `ip` as an assigned address.
///
/// Matches whole addresses, so `10.0.0.1` does not match `10.0.0.10`.
pub(crate) fn listing_contains(listing: &str, ip: Ipv4Addr) -> bool {
    let wanted = ip.to_string();
    listing.lines().any(|line| {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "inet" {
                if let Some(cidr) = tokens.next() {
                    if cidr.split('/').next() == Some(wanted.as_str()) {
                        return true;
                    }
                }
            }
        }
        false
    })
}

fn cidr(ip: Ipv4Addr) -> String {
    format!("{}/{}", ip, PREFIX_LEN)
}

fn nix_pid(pid: u32) -> Result<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(HostError::Signal {
            pid,
            source: Errno::EINVAL,
        }),
    }
}

#[async_trait]
impl<R: CommandRunner> Host for LinuxHost<R> {
    async fn address_present(&self, ip: Ipv4Addr) -> Result<bool> {
        let command = HostCommand::new("ip").args(["-o", "-4", "addr", "show"]);
        let output = self.runner.output(&command).await?.check(&command)?;
        Ok(listing_contains(&output.stdout, ip))
    }

    async fn add_dummy_link(&self, device: &str) -> Result<()> {
        self.ip(["link", "add", device, "type", "dummy"]).await
    }

    async fn set_link_mac(&self, device: &str, mac: &MacAddress) -> Result<()> {
        self.ip(["link", "set", "dev", device, "address", &mac.to_string()])
            .await
    }

    async fn add_address(&self, device: &str, ip: Ipv4Addr) -> Result<()> {
        let label = address_label(device);
        self.ip(["addr", "add", &cidr(ip), "brd", "+", "dev", device, "label", &label])
            .await
    }

    async fn set_link_up(&self, device: &str) -> Result<()> {
        self.ip(["link", "set", "dev", device, "up"]).await
    }

    async fn delete_address(&self, device: &str, ip: Ipv4Addr) -> Result<()> {
        let label = address_label(device);
        self.ip(["addr", "del", &cidr(ip), "brd", "+", "dev", device, "label", &label])
            .await
    }

    async fn delete_dummy_link(&self, device: &str) -> Result<()> {
        self.ip(["link", "delete", device, "type", "dummy"]).await
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "directory already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn spawn(&self, command: &HostCommand, log_path: &Path) -> Result<u32> {
        self.runner.spawn(command, log_path).await
    }

    async fn interrupt(&self, pid: u32) -> Result<()> {
        match kill(nix_pid(pid)?, Signal::SIGINT) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!(pid, "process already gone");
                Ok(())
            }
            Err(source) => Err(HostError::Signal { pid, source }),
        }
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.runner.is_alive(pid).await
    }

    async fn is_listening(&self, addr: SocketAddr) -> bool {
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use std::sync::Mutex;

    /// Runner that records commands and answers with canned stdout.
    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
        stdout: String,
        fail: bool,
    }

    impl RecordingRunner {
        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn output(&self, command: &HostCommand) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                success: !self.fail,
                code: Some(if self.fail { 2 } else { 0 }),
                stdout: self.stdout.clone(),
                stderr: if self.fail {
                    "RTNETLINK answers: Operation not permitted".into()
                } else {
                    String::new()
                },
            })
        }

        async fn spawn(&self, command: &HostCommand, _log_path: &Path) -> Result<u32> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(4242)
        }

        async fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    const LISTING: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
7: simeth1    inet 10.0.0.10/24 brd 10.0.0.255 scope global simeth1:0\\       valid_lft forever preferred_lft forever
";

    #[test]
    fn test_listing_matches_whole_address() {
        assert!(listing_contains(LISTING, Ipv4Addr::new(10, 0, 0, 10)));
        assert!(listing_contains(LISTING, Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!listing_contains(LISTING, Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_address_present_uses_listing() {
        let host = LinuxHost::with_runner(RecordingRunner {
            stdout: LISTING.into(),
            ..Default::default()
        });
        assert!(host.address_present(Ipv4Addr::new(10, 0, 0, 10)).await.unwrap());
        assert!(!host.address_present(Ipv4Addr::new(10, 0, 0, 2)).await.unwrap());
        assert_eq!(host.runner().commands()[0], "ip -o -4 addr show");
    }

    #[tokio::test]
    async fn test_provisioning_command_lines() {
        let host = LinuxHost::with_runner(RecordingRunner::default());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let mac: MacAddress = "02:aa:bb:cc:dd:ee".parse().unwrap();

        host.add_dummy_link("simeth0").await.unwrap();
        host.set_link_mac("simeth0", &mac).await.unwrap();
        host.add_address("simeth0", ip).await.unwrap();
        host.set_link_up("simeth0").await.unwrap();
        host.delete_address("simeth0", ip).await.unwrap();
        host.delete_dummy_link("simeth0").await.unwrap();

        assert_eq!(
            host.runner().commands(),
            vec![
                "ip link add simeth0 type dummy",
                "ip link set dev simeth0 address 02:aa:bb:cc:dd:ee",
                "ip addr add 10.0.0.1/24 brd + dev simeth0 label simeth0:0",
                "ip link set dev simeth0 up",
                "ip addr del 10.0.0.1/24 brd + dev simeth0 label simeth0:0",
                "ip link delete simeth0 type dummy",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_ip_command_is_error() {
        let host = LinuxHost::with_runner(RecordingRunner {
            fail: true,
            ..Default::default()
        });
        let err = host.add_dummy_link("simeth0").await.unwrap_err();
        assert!(matches!(err, HostError::Command { .. }));
        assert!(err.to_string().contains("Operation not permitted"));
    }

    #[tokio::test]
    async fn test_interrupt_rejects_pid_zero() {
        let host = LinuxHost::with_runner(RecordingRunner::default());
        assert!(matches!(
            host.interrupt(0).await,
            Err(HostError::Signal { pid: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_directories_are_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sim-server0").join("data");
        let host = LinuxHost::new();

        host.create_dir_all(&dir).await.unwrap();
        host.create_dir_all(&dir).await.unwrap();
        assert!(dir.is_dir());

        host.remove_dir_all(&dir).await.unwrap();
        host.remove_dir_all(&dir).await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_is_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let host = LinuxHost::new();
        assert!(host.is_listening(addr).await);
        drop(listener);
    }

    #[tokio::test]
    #[ignore = "requires CAP_NET_ADMIN and iproute2"]
    async fn test_real_dummy_link_lifecycle() {
        let host = LinuxHost::new();
        let ip = Ipv4Addr::new(10, 254, 254, 1);
        host.add_dummy_link("nstesteth0").await.unwrap();
        host.set_link_mac("nstesteth0", &MacAddress::generate())
            .await
            .unwrap();
        host.add_address("nstesteth0", ip).await.unwrap();
        host.set_link_up("nstesteth0").await.unwrap();
        assert!(host.address_present(ip).await.unwrap());

        host.delete_address("nstesteth0", ip).await.unwrap();
        host.delete_dummy_link("nstesteth0").await.unwrap();
        assert!(!host.address_present(ip).await.unwrap());
    }
}
