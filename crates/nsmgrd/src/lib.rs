//! nsmgrd - namespace network topology manager
//!
//! Reconciles a declared topology (namespaces, veth pairs, bridges,
//! addresses, interface parameters, routes and policy rules) against the
//! live kernel state by driving `ip` through a [`nsmgr_common::NetworkState`]
//! handle. Every operation probes before it mutates, so re-running a pass
//! converges instead of failing.

mod addr_mgr;
mod bridge_mgr;
mod commands;
mod config;
mod link_mgr;
mod link_params;
mod netns_mgr;
mod orchestrator;
mod report;
mod route_mgr;
mod rule_mgr;
mod tables;
mod types;
mod veth_mgr;

pub use addr_mgr::AddrMgr;
pub use bridge_mgr::BridgeMgr;
pub use commands::*;
pub use config::*;
pub use link_mgr::{attrs, qualified, LinkMgr};
pub use link_params::{parse_link_options, LinkOption};
pub use netns_mgr::NetnsMgr;
pub use orchestrator::Orchestrator;
pub use report::*;
pub use route_mgr::{route_matches, RouteMgr};
pub use rule_mgr::{rule_matches, RuleMgr};
pub use tables::*;
pub use types::*;
pub use veth_mgr::VethMgr;
