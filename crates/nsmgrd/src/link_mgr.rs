//! LinkMgr - interface state, parameters and namespace placement

use std::sync::Arc;

use tracing::{debug, info, instrument};

use nsmgr_common::{CfgMgrError, CfgMgrResult, Entity, Field, NetworkState, Outcome};

use crate::commands::{
    build_del_link_cmd, build_move_link_cmd, build_move_link_to_root_cmd,
    build_set_link_attr_cmd, build_set_link_options_cmd, build_set_link_state_cmd,
    build_show_link_cmd,
};
use crate::link_params::parse_link_options;
use crate::netns_mgr::NetnsMgr;

/// `ip link set` attribute names
pub mod attrs {
    /// MTU attribute
    pub const MTU: &str = "mtu";
    /// Transmit queue length attribute
    pub const TX_QUEUE_LEN: &str = "txqueuelen";
    /// Receive queue length attribute
    pub const RX_QUEUE_LEN: &str = "rxqueuelen";
}

/// Interface controller
///
/// Interfaces are identified by (name, namespace); the empty namespace is
/// the root namespace.
#[derive(Clone)]
pub struct LinkMgr {
    net: Arc<dyn NetworkState>,
    netns: NetnsMgr,
}

impl LinkMgr {
    /// Create a new LinkMgr on top of a network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self {
            netns: NetnsMgr::new(net.clone()),
            net,
        }
    }

    /// Check whether `iface` exists in `namespace`
    ///
    /// Not-found is a normal `false`, never an error.
    #[instrument(skip(self))]
    pub async fn exists(&self, iface: &str, namespace: &str) -> CfgMgrResult<bool> {
        CfgMgrError::require("link exists", Field::Interface, iface)?;
        let result = self
            .net
            .query(&build_show_link_cmd(iface, namespace))
            .await?;
        Ok(result.success())
    }

    /// Fail with a precondition error unless `iface` exists in `namespace`
    pub async fn require(&self, iface: &str, namespace: &str, entity: Entity) -> CfgMgrResult<()> {
        if self.exists(iface, namespace).await? {
            Ok(())
        } else {
            Err(CfgMgrError::precondition(entity, qualified(iface, namespace)))
        }
    }

    /// Bring an interface up
    #[instrument(skip(self))]
    pub async fn bring_up(&self, iface: &str, namespace: &str) -> CfgMgrResult<Outcome> {
        self.set_state(iface, namespace, true).await
    }

    /// Bring an interface down
    #[instrument(skip(self))]
    pub async fn bring_down(&self, iface: &str, namespace: &str) -> CfgMgrResult<Outcome> {
        self.set_state(iface, namespace, false).await
    }

    async fn set_state(&self, iface: &str, namespace: &str, up: bool) -> CfgMgrResult<Outcome> {
        let op = if up { "link up" } else { "link down" };
        CfgMgrError::require(op, Field::Interface, iface)?;

        let cmd = build_set_link_state_cmd(iface, namespace, up);
        self.net.apply_or_throw(&cmd).await?;
        info!("Set {} {}", qualified(iface, namespace), if up { "up" } else { "down" });
        Ok(Outcome::Applied)
    }

    /// Set interface MTU
    #[instrument(skip(self))]
    pub async fn set_mtu(&self, iface: &str, namespace: &str, mtu: &str) -> CfgMgrResult<Outcome> {
        self.set_attr("link set mtu", iface, namespace, attrs::MTU, mtu)
            .await
    }

    /// Set transmit queue length
    #[instrument(skip(self))]
    pub async fn set_tx_queue_len(
        &self,
        iface: &str,
        namespace: &str,
        len: &str,
    ) -> CfgMgrResult<Outcome> {
        self.set_attr("link set txqueuelen", iface, namespace, attrs::TX_QUEUE_LEN, len)
            .await
    }

    /// Set receive queue length
    #[instrument(skip(self))]
    pub async fn set_rx_queue_len(
        &self,
        iface: &str,
        namespace: &str,
        len: &str,
    ) -> CfgMgrResult<Outcome> {
        self.set_attr("link set rxqueuelen", iface, namespace, attrs::RX_QUEUE_LEN, len)
            .await
    }

    async fn set_attr(
        &self,
        op: &'static str,
        iface: &str,
        namespace: &str,
        attr: &str,
        value: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require(op, Field::Interface, iface)?;
        CfgMgrError::require(op, Field::Value, value)?;

        let cmd = build_set_link_attr_cmd(iface, namespace, attr, value);
        self.net.apply_or_throw(&cmd).await?;
        info!("Set {} {} {}", qualified(iface, namespace), attr, value);
        Ok(Outcome::Applied)
    }

    /// Apply a free-form option string (`"promisc on arp off"`)
    #[instrument(skip(self))]
    pub async fn set_other_params(
        &self,
        iface: &str,
        namespace: &str,
        params: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("link set", Field::Interface, iface)?;
        if params.trim().is_empty() {
            return Err(CfgMgrError::missing("link set", Field::Value));
        }

        let options = parse_link_options(params)?;
        let cmd = build_set_link_options_cmd(iface, namespace, &options);
        self.net.apply_or_throw(&cmd).await?;
        info!("Set {} {}", qualified(iface, namespace), params.trim());
        Ok(Outcome::Applied)
    }

    /// Move an interface from the root namespace into `target`
    ///
    /// Skipped when the interface is already in `target` and gone from root.
    #[instrument(skip(self))]
    pub async fn move_to_namespace(&self, iface: &str, target: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("link move", Field::Interface, iface)?;
        CfgMgrError::require("link move", Field::Namespace, target)?;
        self.netns.require(target, Entity::Namespace).await?;

        if !self.exists(iface, "").await? && self.exists(iface, target).await? {
            debug!("{} already in namespace {}", iface, target);
            return Ok(Outcome::Skipped);
        }

        self.net
            .apply_or_throw(&build_move_link_cmd(iface, "", target))
            .await?;
        info!("Moved {} into namespace {}", iface, target);
        Ok(Outcome::Applied)
    }

    /// Move an interface from `current` back to the root namespace
    #[instrument(skip(self))]
    pub async fn move_to_root(&self, iface: &str, current: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("link move to root", Field::Interface, iface)?;
        CfgMgrError::require("link move to root", Field::Namespace, current)?;
        self.netns.require(current, Entity::Namespace).await?;

        self.net
            .apply_or_throw(&build_move_link_to_root_cmd(iface, current))
            .await?;
        info!("Moved {} from namespace {} to root", iface, current);
        Ok(Outcome::Applied)
    }

    /// Move an interface between namespaces, either of which may be root
    pub async fn relocate(&self, iface: &str, from: &str, to: &str) -> CfgMgrResult<Outcome> {
        if to.is_empty() {
            self.net
                .apply_or_throw(&build_move_link_to_root_cmd(iface, from))
                .await?;
        } else {
            self.net
                .apply_or_throw(&build_move_link_cmd(iface, from, to))
                .await?;
        }
        info!("Moved {} to {}", qualified(iface, from), display_ns(to));
        Ok(Outcome::Applied)
    }

    /// Delete an interface
    #[instrument(skip(self))]
    pub async fn delete(&self, iface: &str, namespace: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("link delete", Field::Interface, iface)?;
        if !self.exists(iface, namespace).await? {
            return Err(CfgMgrError::not_found(
                Entity::Interface,
                qualified(iface, namespace),
            ));
        }

        self.net
            .apply_or_throw(&build_del_link_cmd(iface, namespace))
            .await?;
        info!("Deleted {}", qualified(iface, namespace));
        Ok(Outcome::Applied)
    }
}

/// `name@namespace`, or just `name` in the root namespace
pub fn qualified(name: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}@{}", name, namespace)
    }
}

fn display_ns(namespace: &str) -> &str {
    if namespace.is_empty() {
        "root"
    } else {
        namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmgr_common::ErrorKind;
    use nsmgr_test::FakeKernel;

    fn mgr() -> (Arc<FakeKernel>, LinkMgr) {
        let kernel = Arc::new(FakeKernel::new());
        (kernel.clone(), LinkMgr::new(kernel))
    }

    #[tokio::test]
    async fn test_exists_is_namespace_scoped() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_physical("eth1", "ns1");

        assert!(mgr.exists("eth1", "ns1").await.unwrap());
        assert!(!mgr.exists("eth1", "").await.unwrap());
        assert!(!mgr.exists("eth9", "ns1").await.unwrap());
    }

    #[tokio::test]
    async fn test_up_down() {
        let (kernel, mgr) = mgr();
        kernel.add_physical("eth0", "");

        mgr.bring_up("eth0", "").await.unwrap();
        assert!(kernel.is_up("eth0", ""));
        mgr.bring_down("eth0", "").await.unwrap();
        assert!(!kernel.is_up("eth0", ""));
    }

    #[tokio::test]
    async fn test_parameter_setters() {
        let (kernel, mgr) = mgr();
        kernel.add_physical("eth0", "");

        mgr.set_mtu("eth0", "", "9000").await.unwrap();
        mgr.set_tx_queue_len("eth0", "", "2000").await.unwrap();
        mgr.set_other_params("eth0", "", "promisc on").await.unwrap();

        assert_eq!(kernel.mtu("eth0", ""), Some(9000));
        assert_eq!(kernel.mutations_matching("txqueuelen \"2000\"").len(), 1);
        assert_eq!(kernel.mutations_matching("promisc on").len(), 1);
    }

    #[tokio::test]
    async fn test_empty_arguments_rejected_without_calls() {
        let (kernel, mgr) = mgr();

        let errs = [
            mgr.bring_up("", "").await.unwrap_err(),
            mgr.bring_down("", "").await.unwrap_err(),
            mgr.set_mtu("eth0", "", "").await.unwrap_err(),
            mgr.set_rx_queue_len("", "", "100").await.unwrap_err(),
            mgr.set_other_params("eth0", "", " ").await.unwrap_err(),
            mgr.move_to_namespace("eth0", "").await.unwrap_err(),
            mgr.move_to_root("", "ns1").await.unwrap_err(),
        ];
        for err in &errs {
            assert_eq!(err.kind(), ErrorKind::Validation, "{}", err);
        }
        assert_eq!(errs[2].code(), "missing_value");
        assert_eq!(errs[5].code(), "missing_namespace");
        assert!(kernel.commands().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_params_are_validation_errors() {
        let (kernel, mgr) = mgr();
        kernel.add_physical("eth0", "");

        let err = mgr.set_other_params("eth0", "", "promisc yes").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "invalid_argument");
        assert!(kernel.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_move_requires_namespace() {
        let (kernel, mgr) = mgr();
        kernel.add_physical("eth1", "");

        let err = mgr.move_to_namespace("eth1", "ns1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.code(), "namespace_missing");
        assert!(kernel.link_exists("eth1", ""));
    }

    #[tokio::test]
    async fn test_move_roundtrip_and_skip() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_physical("eth1", "");

        assert_eq!(mgr.move_to_namespace("eth1", "ns1").await.unwrap(), Outcome::Applied);
        assert!(kernel.link_exists("eth1", "ns1"));
        assert_eq!(mgr.move_to_namespace("eth1", "ns1").await.unwrap(), Outcome::Skipped);

        mgr.move_to_root("eth1", "ns1").await.unwrap();
        assert!(kernel.link_exists("eth1", ""));
        assert!(!kernel.link_exists("eth1", "ns1"));
    }

    #[tokio::test]
    async fn test_move_failure_is_operation_error() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");

        let err = mgr.move_to_namespace("eth7", "ns1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operation);
    }

    #[test]
    fn test_qualified() {
        assert_eq!(qualified("eth0", ""), "eth0");
        assert_eq!(qualified("veth1", "ns2"), "veth1@ns2");
    }
}
