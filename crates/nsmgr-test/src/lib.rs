//! Test infrastructure for the nsmgr namespace network manager
//!
//! Provides:
//! - An in-memory kernel that answers the `ip` commands nsmgrd issues
//! - Topology fixtures rendered as YAML documents
//! - Command verification helpers

mod fake_kernel;
pub mod fixtures;
mod verification;

pub use fake_kernel::{FakeKernel, FakeRoute, FakeRule};
pub use fixtures::*;
pub use verification::*;
