//! Common infrastructure for the nsmgr namespace network manager.
//!
//! This crate provides the pieces every manager in `nsmgrd` builds on:
//!
//! - [`shell`]: Control-interface adapter, safe quoting and command execution
//! - [`NetworkState`]: Handle to the live kernel networking state
//! - [`error`]: Error taxonomy shared by all manager operations
//! - [`Outcome`]: What a successful operation did
//!
//! # Architecture
//!
//! Managers never talk to the kernel directly. They build `ip` command
//! lines with [`shell::ip_cmd`] and hand them to a [`NetworkState`]:
//!
//! 1. Read-only probes go through [`NetworkState::query`]
//! 2. Mutations go through [`NetworkState::apply`]
//! 3. Exit status 0 is success, anything else becomes an operation error
//!
//! # Example
//!
//! ```ignore
//! use nsmgr_common::{shell::{ip_cmd, shellquote}, NetworkState, CfgMgrResult};
//!
//! async fn set_mtu(net: &dyn NetworkState, ns: &str, dev: &str) -> CfgMgrResult<()> {
//!     let cmd = format!("{} link set dev {} mtu 9000", ip_cmd(ns), shellquote(dev));
//!     net.apply_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod net_state;
pub mod outcome;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{CfgMgrError, CfgMgrResult, Entity, ErrorKind, Field};
pub use net_state::{query_json, DryRunNetworkState, NetworkState, ShellNetworkState};
pub use outcome::Outcome;
