//! NetnsMgr - network namespace lifecycle

use std::sync::Arc;

use tracing::{debug, info, instrument};

use nsmgr_common::{
    query_json, CfgMgrError, CfgMgrResult, Entity, Field, NetworkState, Outcome,
};

use crate::commands::{
    build_add_netns_cmd, build_del_netns_cmd, build_list_links_cmd, build_list_netns_cmd,
};
use crate::types::{LinkEntry, NetnsEntry, LOOPBACK};

/// Namespace manager
///
/// Creation is idempotent; deletion refuses while any non-loopback
/// interface is still assigned to the namespace.
#[derive(Clone)]
pub struct NetnsMgr {
    net: Arc<dyn NetworkState>,
}

impl NetnsMgr {
    /// Create a new NetnsMgr on top of a network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self { net }
    }

    /// List namespace names known to the kernel
    pub async fn list(&self) -> CfgMgrResult<Vec<String>> {
        let entries: Vec<NetnsEntry> =
            query_json(self.net.as_ref(), &build_list_netns_cmd()).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    /// Check whether a namespace exists
    #[instrument(skip(self))]
    pub async fn exists(&self, name: &str) -> CfgMgrResult<bool> {
        CfgMgrError::require("netns exists", Field::Name, name)?;
        Ok(self.list().await?.iter().any(|n| n == name))
    }

    /// Fail with a precondition error unless `name` is empty or exists
    ///
    /// The empty name is the root namespace and always exists.
    pub async fn require(&self, name: &str, entity: Entity) -> CfgMgrResult<()> {
        if name.is_empty() || self.exists(name).await? {
            Ok(())
        } else {
            Err(CfgMgrError::precondition(entity, name))
        }
    }

    /// Interfaces assigned to a namespace, loopback excluded
    pub async fn interfaces(&self, name: &str) -> CfgMgrResult<Vec<String>> {
        let links: Vec<LinkEntry> =
            query_json(self.net.as_ref(), &build_list_links_cmd(name)).await?;
        Ok(links
            .into_iter()
            .map(|l| l.ifname)
            .filter(|n| n != LOOPBACK)
            .collect())
    }

    /// Create a namespace
    #[instrument(skip(self))]
    pub async fn add(&self, name: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("netns add", Field::Name, name)?;

        if self.exists(name).await? {
            debug!("Namespace {} already exists", name);
            return Ok(Outcome::Skipped);
        }

        self.net.apply_or_throw(&build_add_netns_cmd(name)).await?;
        info!("Created namespace {}", name);
        Ok(Outcome::Applied)
    }

    /// Delete a namespace
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("netns delete", Field::Name, name)?;

        if !self.exists(name).await? {
            return Err(CfgMgrError::not_found(Entity::Namespace, name));
        }

        let assigned = self.interfaces(name).await?;
        if !assigned.is_empty() {
            return Err(CfgMgrError::NamespaceBusy {
                namespace: name.to_string(),
                interfaces: assigned,
            });
        }

        self.net.apply_or_throw(&build_del_netns_cmd(name)).await?;
        info!("Deleted namespace {}", name);
        Ok(Outcome::Applied)
    }
}
