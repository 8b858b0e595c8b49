//! Error types for nodesim-core.

use nodesim_host::HostError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for nodesim-core operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors that can occur while building or tearing down a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// Topology request is malformed
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Not enough addresses for the requested node count
    #[error("address pool too small: need {needed} addresses, have {available}")]
    InsufficientAddressPool {
        /// Nodes requested
        needed: usize,
        /// Addresses supplied
        available: usize,
    },

    /// Registry snapshot could not be read or decoded
    #[error("cannot import registry from {}: {reason}", path.display())]
    PersistenceRead {
        /// Snapshot file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Registry snapshot could not be encoded or written
    #[error("cannot export registry to {}: {reason}", path.display())]
    PersistenceWrite {
        /// Snapshot file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A provisioning step failed for a node
    #[error("provisioning {node} failed at {step}: {cause}")]
    ResourceProvision {
        /// Step name, e.g. `add-link`
        step: &'static str,
        /// Node name
        node: String,
        /// Host failure
        #[source]
        cause: HostError,
    },

    /// A release step failed for a node (other steps were still attempted)
    #[error("releasing {node} failed at {step}: {cause}")]
    ResourceRelease {
        /// Step name, e.g. `del-link`
        step: &'static str,
        /// Node name
        node: String,
        /// Host failure
        #[source]
        cause: HostError,
    },

    /// The agent process could not be launched
    #[error("starting agent for {node} failed: {cause}")]
    ProcessStart {
        /// Node name
        node: String,
        /// Host failure
        #[source]
        cause: HostError,
    },

    /// The agent process could not be signalled
    #[error("stopping agent for {node} failed: {cause}")]
    ProcessStop {
        /// Node name
        node: String,
        /// Host failure
        #[source]
        cause: HostError,
    },

    /// The agent did not exit within the configured stop timeout
    #[error("agent for {node} (pid {pid}) still running after {waited:?}")]
    ProcessStopTimeout {
        /// Node name
        node: String,
        /// Process id that was interrupted
        pid: u32,
        /// Time spent waiting
        waited: Duration,
    },
}
