//! BridgeMgr - bridge lifecycle and membership

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use nsmgr_common::{
    query_json, CfgMgrError, CfgMgrResult, Entity, Field, NetworkState, Outcome,
};

use crate::commands::{
    build_add_bridge_cmd, build_del_link_cmd, build_list_members_cmd, build_set_master_cmd,
    build_set_nomaster_cmd, build_show_link_details_cmd,
};
use crate::link_mgr::{qualified, LinkMgr};
use crate::types::LinkEntry;

/// Bridge manager
///
/// Lifecycle per bridge: absent -> created -> has members -> absent.
/// Deleting a bridge detaches every member first.
#[derive(Clone)]
pub struct BridgeMgr {
    net: Arc<dyn NetworkState>,
    links: LinkMgr,
}

impl BridgeMgr {
    /// Create a new BridgeMgr on top of a network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self {
            links: LinkMgr::new(net.clone()),
            net,
        }
    }

    /// Create a bridge
    ///
    /// Skipped when the bridge already exists in the namespace; any other
    /// device holding the name is an error.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str, namespace: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("bridge add", Field::Name, name)?;

        if self.links.exists(name, namespace).await? {
            let kind = self.kind(name, namespace).await?;
            if kind.as_deref() != Some("bridge") {
                let kind = kind.unwrap_or_else(|| "physical".to_string());
                warn!("{} is a {} device, not a bridge", qualified(name, namespace), kind);
                return Err(CfgMgrError::NameTaken {
                    name: qualified(name, namespace),
                    kind,
                });
            }
            debug!("Bridge {} already exists", qualified(name, namespace));
            return Ok(Outcome::Skipped);
        }

        self.net
            .apply_or_throw(&build_add_bridge_cmd(name, namespace))
            .await?;
        info!("Created bridge {}", qualified(name, namespace));
        Ok(Outcome::Applied)
    }

    async fn kind(&self, name: &str, namespace: &str) -> CfgMgrResult<Option<String>> {
        let links: Vec<LinkEntry> = query_json(
            self.net.as_ref(),
            &build_show_link_details_cmd(name, namespace),
        )
        .await?;
        Ok(links.into_iter().next().and_then(|l| l.kind().map(str::to_string)))
    }

    /// Current members of a bridge
    pub async fn members(&self, bridge: &str, namespace: &str) -> CfgMgrResult<Vec<String>> {
        let links: Vec<LinkEntry> = query_json(
            self.net.as_ref(),
            &build_list_members_cmd(bridge, namespace),
        )
        .await?;
        Ok(links.into_iter().map(|l| l.ifname).collect())
    }

    /// Attach an interface to a bridge in the same namespace
    ///
    /// Skipped when the interface is already a member.
    #[instrument(skip(self))]
    pub async fn add_interface(
        &self,
        iface: &str,
        bridge: &str,
        namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("bridge add interface", Field::Interface, iface)?;
        CfgMgrError::require("bridge add interface", Field::Bridge, bridge)?;
        self.links.require(bridge, namespace, Entity::Bridge).await?;
        self.links.require(iface, namespace, Entity::Interface).await?;

        if self
            .members(bridge, namespace)
            .await?
            .iter()
            .any(|m| m == iface)
        {
            debug!("{} already attached to {}", iface, bridge);
            return Ok(Outcome::Skipped);
        }

        self.net
            .apply_or_throw(&build_set_master_cmd(iface, bridge, namespace))
            .await?;
        info!("Attached {} to bridge {}", iface, qualified(bridge, namespace));
        Ok(Outcome::Applied)
    }

    /// Detach every member of a bridge
    ///
    /// Every member is attempted; failures are collected and reported once.
    #[instrument(skip(self))]
    pub async fn remove_all_interfaces(
        &self,
        bridge: &str,
        namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("bridge remove interfaces", Field::Bridge, bridge)?;
        self.links.require(bridge, namespace, Entity::Bridge).await?;

        let members = self.members(bridge, namespace).await?;
        if members.is_empty() {
            return Ok(Outcome::Skipped);
        }

        let mut failed = Vec::new();
        for member in &members {
            let cmd = build_set_nomaster_cmd(member, namespace);
            match self.net.apply_or_throw(&cmd).await {
                Ok(_) => info!("Detached {} from bridge {}", member, bridge),
                Err(e) => {
                    warn!("Failed to detach {} from bridge {}: {}", member, bridge, e);
                    failed.push(member.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(Outcome::Applied)
        } else {
            Err(CfgMgrError::MembersDetachFailed {
                bridge: qualified(bridge, namespace),
                failed,
            })
        }
    }

    /// Delete a bridge after detaching its members
    #[instrument(skip(self))]
    pub async fn delete(&self, bridge: &str, namespace: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("bridge delete", Field::Bridge, bridge)?;
        self.links.require(bridge, namespace, Entity::Bridge).await?;

        self.remove_all_interfaces(bridge, namespace)
            .await
            .map_err(|e| CfgMgrError::BridgeMembers {
                bridge: qualified(bridge, namespace),
                source: Box::new(e),
            })?;

        self.net
            .apply_or_throw(&build_del_link_cmd(bridge, namespace))
            .await?;
        info!("Deleted bridge {}", qualified(bridge, namespace));
        Ok(Outcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmgr_common::ErrorKind;
    use nsmgr_test::FakeKernel;

    fn mgr() -> (Arc<FakeKernel>, BridgeMgr) {
        let kernel = Arc::new(FakeKernel::new());
        (kernel.clone(), BridgeMgr::new(kernel))
    }

    #[tokio::test]
    async fn test_create_and_attach() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_physical("eth1", "ns1");

        assert_eq!(mgr.create("br0", "ns1").await.unwrap(), Outcome::Applied);
        assert_eq!(mgr.create("br0", "ns1").await.unwrap(), Outcome::Skipped);
        assert_eq!(
            mgr.add_interface("eth1", "br0", "ns1").await.unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            mgr.add_interface("eth1", "br0", "ns1").await.unwrap(),
            Outcome::Skipped
        );
        assert_eq!(kernel.master_of("eth1", "ns1").as_deref(), Some("br0"));
    }

    #[tokio::test]
    async fn test_create_rejects_name_held_by_other_device() {
        let (kernel, mgr) = mgr();
        kernel.add_physical("br0", "");
        kernel.add_namespace("ns1");
        kernel
            .apply("/sbin/ip -n \"ns1\" link add \"br1\" type veth peer name \"br1p\"")
            .await
            .unwrap();
        kernel.clear_commands();

        let err = mgr.create("br0", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.code(), "name_taken");
        assert!(err.to_string().contains("physical"), "{}", err);

        let err = mgr.create("br1", "ns1").await.unwrap_err();
        assert!(err.to_string().contains("veth"), "{}", err);
        assert!(kernel.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_attach_preconditions_distinct() {
        let (kernel, mgr) = mgr();
        kernel.add_physical("eth1", "");

        let err = mgr.add_interface("eth1", "br0", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.code(), "bridge_missing");

        mgr.create("br0", "").await.unwrap();
        let err = mgr.add_interface("eth9", "br0", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.code(), "interface_missing");
    }

    #[tokio::test]
    async fn test_attach_requires_same_namespace() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_physical("eth1", "");
        mgr.create("br0", "ns1").await.unwrap();

        let err = mgr.add_interface("eth1", "br0", "ns1").await.unwrap_err();
        assert_eq!(err.code(), "interface_missing");
    }

    #[tokio::test]
    async fn test_delete_detaches_members() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_physical("eth1", "ns1");
        kernel.add_physical("eth2", "ns1");
        mgr.create("br0", "ns1").await.unwrap();
        mgr.add_interface("eth1", "br0", "ns1").await.unwrap();
        mgr.add_interface("eth2", "br0", "ns1").await.unwrap();

        assert_eq!(mgr.delete("br0", "ns1").await.unwrap(), Outcome::Applied);

        assert!(!kernel.link_exists("br0", "ns1"));
        assert!(kernel.link_exists("eth1", "ns1"));
        assert!(kernel.link_exists("eth2", "ns1"));
        assert_eq!(kernel.master_of("eth1", "ns1"), None);
        assert_eq!(kernel.master_of("eth2", "ns1"), None);
    }

    #[tokio::test]
    async fn test_detach_is_not_fail_fast() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_physical("eth1", "ns1");
        kernel.add_physical("eth2", "ns1");
        mgr.create("br0", "ns1").await.unwrap();
        mgr.add_interface("eth1", "br0", "ns1").await.unwrap();
        mgr.add_interface("eth2", "br0", "ns1").await.unwrap();
        kernel.fail_when("dev \"eth1\" nomaster");

        let err = mgr.delete("br0", "ns1").await.unwrap_err();
        assert_eq!(err.code(), "bridge_members_remain");
        assert_eq!(err.kind(), ErrorKind::Operation);

        assert_eq!(kernel.master_of("eth1", "ns1").as_deref(), Some("br0"));
        assert_eq!(kernel.master_of("eth2", "ns1"), None);
        assert!(kernel.link_exists("br0", "ns1"));
        assert!(kernel.mutations_matching("link del").is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_reports_aggregate() {
        let (kernel, mgr) = mgr();
        kernel.add_physical("eth1", "");
        kernel.add_physical("eth2", "");
        mgr.create("br0", "").await.unwrap();
        mgr.add_interface("eth1", "br0", "").await.unwrap();
        mgr.add_interface("eth2", "br0", "").await.unwrap();
        kernel.fail_when("nomaster");

        match mgr.remove_all_interfaces("br0", "").await {
            Err(CfgMgrError::MembersDetachFailed { failed, .. }) => {
                assert_eq!(failed, vec!["eth1".to_string(), "eth2".to_string()]);
            }
            other => panic!("Expected MembersDetachFailed, got {:?}", other),
        }
        assert_eq!(kernel.mutations_matching("nomaster").len(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_bridge() {
        let (_kernel, mgr) = mgr();
        let err = mgr.delete("br9", "").await.unwrap_err();
        assert_eq!(err.code(), "bridge_missing");
        let err = mgr.remove_all_interfaces("br9", "").await.unwrap_err();
        assert_eq!(err.code(), "bridge_missing");
    }

    #[tokio::test]
    async fn test_validation() {
        let (kernel, mgr) = mgr();
        assert_eq!(mgr.create("", "").await.unwrap_err().code(), "missing_name");
        assert_eq!(
            mgr.add_interface("", "br0", "").await.unwrap_err().code(),
            "missing_interface"
        );
        assert_eq!(
            mgr.add_interface("eth0", "", "").await.unwrap_err().code(),
            "missing_bridge"
        );
        assert_eq!(mgr.delete("", "").await.unwrap_err().code(), "missing_bridge");
        assert!(kernel.commands().is_empty());
    }
}
