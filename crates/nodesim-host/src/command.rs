//! Command execution primitive.
//!
//! [`CommandRunner`] is the only place nodesim launches OS processes. It
//! covers three capabilities: run a short-lived command to completion,
//! spawn a long-lived command in the background, and report whether a
//! spawned process is still alive.

use crate::error::{HostError, Result};
use async_trait::async_trait;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::fs::OpenOptions;
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

/// A program plus its argument vector. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    /// Program to execute (resolved through `PATH` if relative).
    pub program: PathBuf,
    /// Arguments, one element per argv entry.
    pub args: Vec<String>,
}

impl HostCommand {
    /// Create a command with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Count how many arguments start with `prefix`.
    pub fn count_flag(&self, prefix: &str) -> usize {
        self.args.iter().filter(|a| a.starts_with(prefix)).count()
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Whether the command exited with status 0.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Check whether standard output contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.stdout.contains(needle)
    }

    /// Turn an unsuccessful exit into a [`HostError::Command`].
    pub fn check(self, command: &HostCommand) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(HostError::Command {
            command: command.to_string(),
            status: self
                .code
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "signal".to_string()),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Process-execution primitive consumed by the host implementations.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is not an error here; callers decide via
    /// [`CommandOutput::check`].
    async fn output(&self, command: &HostCommand) -> Result<CommandOutput>;

    /// Launch a command in the background, appending its stdout and stderr
    /// to `log_path`, and return its process id.
    ///
    /// The process leads its own process group, so signals aimed at the
    /// caller's group (such as a terminal interrupt) do not reach it.
    async fn spawn(&self, command: &HostCommand, log_path: &Path) -> Result<u32>;

    /// Check whether `pid` still denotes a live process.
    async fn is_alive(&self, pid: u32) -> bool;
}

/// [`CommandRunner`] backed by `tokio::process`.
///
/// Children spawned through this runner are kept so that exited children
/// are reaped instead of lingering as zombies that still answer signal 0.
#[derive(Debug, Default)]
pub struct SystemRunner {
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemRunner {
    /// Create a runner with no tracked children.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, command: &HostCommand) -> Result<CommandOutput> {
        debug!(cmd = %command, "running host command");
        let out = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| HostError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let output = CommandOutput {
            success: out.status.success(),
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        };
        trace!(stdout = %output.stdout, stderr = %output.stderr, "command output");
        Ok(output)
    }

    async fn spawn(&self, command: &HostCommand, log_path: &Path) -> Result<u32> {
        debug!(cmd = %command, log = %log_path.display(), "spawning background process");
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await?;
        let log_err = log.try_clone().await?;
        let stdout = Stdio::from(log.into_std().await);
        let stderr = Stdio::from(log_err.into_std().await);

        // Own process group: a terminal Ctrl-C reaches nodesim only, and
        // agents are stopped one by one in teardown order.
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|source| HostError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| HostError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other("process exited before its id was read"),
        })?;

        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pid, child);
        Ok(pid)
    }

    async fn is_alive(&self, pid: u32) -> bool {
        {
            let mut children = self
                .children
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(child) = children.get_mut(&pid) {
                return match child.try_wait() {
                    Ok(None) => true,
                    Ok(Some(status)) => {
                        debug!(pid, %status, "child exited");
                        children.remove(&pid);
                        false
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "failed to poll child");
                        children.remove(&pid);
                        false
                    }
                };
            }
        }

        // Not ours (e.g. started by an earlier invocation): probe with signal 0.
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => kill(Pid::from_raw(raw), None).is_ok(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = HostCommand::new("ip").args(["link", "add", "simeth0", "type", "dummy"]);
        assert_eq!(cmd.to_string(), "ip link add simeth0 type dummy");
    }

    #[test]
    fn test_count_flag() {
        let cmd = HostCommand::new("nomad")
            .arg("agent")
            .arg("-join=10.0.0.1")
            .arg("-join=10.0.0.2")
            .arg("-server");
        assert_eq!(cmd.count_flag("-join="), 2);
        assert_eq!(cmd.count_flag("-servers="), 0);
    }

    #[test]
    fn test_check_failure() {
        let cmd = HostCommand::new("ip").arg("link");
        let output = CommandOutput {
            success: false,
            code: Some(2),
            stdout: String::new(),
            stderr: "RTNETLINK answers: File exists\n".into(),
        };
        let err = output.check(&cmd).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit code 2"));
        assert!(msg.ends_with("File exists"));
    }

    #[tokio::test]
    async fn test_output_captures_stdout() {
        let runner = SystemRunner::new();
        let out = runner
            .output(&HostCommand::new("echo").arg("10.0.0.1"))
            .await
            .expect("echo should run");
        assert!(out.success);
        assert!(out.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_output_missing_program() {
        let runner = SystemRunner::new();
        let result = runner
            .output(&HostCommand::new("/nonexistent/nodesim-test-binary"))
            .await;
        assert!(matches!(result, Err(HostError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_spawn_and_reap() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("agent.log");
        let runner = SystemRunner::new();

        let pid = runner
            .spawn(&HostCommand::new("sh").args(["-c", "echo started"]), &log)
            .await
            .expect("spawn should succeed");
        assert!(pid > 0);

        let mut alive = true;
        for _ in 0..100 {
            if !runner.is_alive(pid).await {
                alive = false;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!alive, "short-lived child should be reaped");

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("started"));
    }

    #[tokio::test]
    async fn test_spawned_agent_leads_own_process_group() {
        use nix::sys::signal::Signal;
        use nix::unistd::getpgid;

        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner::new();
        let pid = runner
            .spawn(&HostCommand::new("sleep").arg("5"), &dir.path().join("agent.log"))
            .await
            .expect("spawn should succeed");
        let child = Pid::from_raw(pid as i32);

        let own_group = getpgid(None).unwrap();
        let agent_group = getpgid(Some(child)).unwrap();
        assert_eq!(agent_group, child);
        assert_ne!(agent_group, own_group);

        kill(child, Signal::SIGKILL).unwrap();
        for _ in 0..100 {
            if !runner.is_alive(pid).await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("killed child was not reaped");
    }

    #[tokio::test]
    async fn test_spawn_into_missing_log_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner::new();
        let result = runner
            .spawn(
                &HostCommand::new("true"),
                &dir.path().join("missing").join("agent.log"),
            )
            .await;
        assert!(matches!(result, Err(HostError::Io(_))));
    }
}
