//! Error types for nodesim-host.

use thiserror::Error;

/// Result type alias for nodesim-host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur while operating on the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// A command ran but exited unsuccessfully
    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        /// The command line that was run
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// A command could not be launched at all
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        /// The command line that was launched
        command: String,
        /// Underlying launch error
        #[source]
        source: std::io::Error,
    },

    /// Delivering a signal to a process failed
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Target process
        pid: u32,
        /// Underlying errno
        #[source]
        source: nix::errno::Errno,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
