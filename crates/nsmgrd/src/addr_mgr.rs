//! AddrMgr - interface address bindings

use std::sync::Arc;

use tracing::{info, instrument};

use nsmgr_common::{CfgMgrError, CfgMgrResult, Field, NetworkState, Outcome};

use crate::commands::build_address_cmd;
use crate::link_mgr::qualified;

/// Address manager
///
/// No presence check is made before adding or removing; whatever the
/// control interface reports is returned.
#[derive(Clone)]
pub struct AddrMgr {
    net: Arc<dyn NetworkState>,
}

impl AddrMgr {
    /// Create a new AddrMgr on top of a network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self { net }
    }

    /// Add `address/prefix_len` to an interface
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        iface: &str,
        address: &str,
        prefix_len: &str,
        namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        self.run("add", "address add", iface, address, prefix_len, namespace)
            .await
    }

    /// Remove `address/prefix_len` from an interface
    #[instrument(skip(self))]
    pub async fn remove(
        &self,
        iface: &str,
        address: &str,
        prefix_len: &str,
        namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        self.run("del", "address remove", iface, address, prefix_len, namespace)
            .await
    }

    async fn run(
        &self,
        verb: &str,
        op: &'static str,
        iface: &str,
        address: &str,
        prefix_len: &str,
        namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require(op, Field::Interface, iface)?;
        CfgMgrError::require(op, Field::Address, address)?;
        CfgMgrError::require(op, Field::PrefixLen, prefix_len)?;

        let cidr = format!("{}/{}", address, prefix_len);
        self.net
            .apply_or_throw(&build_address_cmd(verb, iface, &cidr, namespace))
            .await?;
        info!("{} {} on {}", op, cidr, qualified(iface, namespace));
        Ok(Outcome::Applied)
    }
}
