//! # nodesim-host
//!
//! Host capability layer for nodesim.
//! Everything that touches the machine the simulation runs on goes through
//! the [`Host`] trait: virtual links and addresses, per-node scratch
//! directories, and the agent processes themselves.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nodesim_host::{Host, LinuxHost, MacAddress};
//! use std::net::Ipv4Addr;
//!
//! # async fn example() -> nodesim_host::Result<()> {
//! let host = LinuxHost::new();
//! let ip = Ipv4Addr::new(10, 0, 0, 1);
//!
//! if !host.address_present(ip).await? {
//!     host.add_dummy_link("simeth0").await?;
//!     host.set_link_mac("simeth0", &MacAddress::generate()).await?;
//!     host.add_address("simeth0", ip).await?;
//!     host.set_link_up("simeth0").await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Command Execution**: [`CommandRunner`] runs short-lived commands and
//!   spawns long-lived ones, tracking the children it owns
//! - **Virtual Links**: dummy interfaces with labelled `/24` aliases via `ip`
//! - **Process Control**: SIGINT delivery and liveness checks via `nix`
//! - **Fake Host**: [`MemoryHost`] (feature `fake`) records every operation
//!   in memory for tests

mod command;
mod error;
mod host;
mod linux;
mod mac;

#[cfg(any(test, feature = "fake"))]
mod fake;

pub use command::{CommandOutput, CommandRunner, HostCommand, SystemRunner};
pub use error::{HostError, Result};
pub use host::{address_label, Host};
pub use linux::LinuxHost;
pub use mac::{MacAddress, ParseMacError};

#[cfg(any(test, feature = "fake"))]
pub use fake::{FakeLink, FakeProcess, MemoryHost};
