//! VethMgr - virtual Ethernet pair creation and placement

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use nsmgr_common::{CfgMgrError, CfgMgrResult, Entity, Field, NetworkState, Outcome};

use crate::commands::build_add_veth_cmd;
use crate::link_mgr::{qualified, LinkMgr};
use crate::netns_mgr::NetnsMgr;

/// Veth factory
///
/// A pair is created in the host end's namespace in one call, then the
/// peer end is relocated when its namespace differs. A failed relocation
/// leaves both ends in the host namespace; nothing is rolled back.
#[derive(Clone)]
pub struct VethMgr {
    net: Arc<dyn NetworkState>,
    netns: NetnsMgr,
    links: LinkMgr,
}

impl VethMgr {
    /// Create a new VethMgr on top of a network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self {
            netns: NetnsMgr::new(net.clone()),
            links: LinkMgr::new(net.clone()),
            net,
        }
    }

    /// Create a veth pair and place its ends
    ///
    /// Skipped when both ends already exist where they are declared. A
    /// peer left beside its host end is moved without re-creating the pair.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        host: &str,
        peer: &str,
        host_namespace: &str,
        peer_namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("veth add", Field::Name, host)?;
        CfgMgrError::require("veth add", Field::Peer, peer)?;
        self.netns.require(host_namespace, Entity::HostNamespace).await?;
        self.netns.require(peer_namespace, Entity::PeerNamespace).await?;

        let host_present = self.links.exists(host, host_namespace).await?;
        if host_present && self.links.exists(peer, peer_namespace).await? {
            debug!(
                "veth {} <-> {} already in place",
                qualified(host, host_namespace),
                qualified(peer, host_namespace)
            );
            return Ok(Outcome::Skipped);
        }

        // A pair left behind by a failed relocation only needs the move
        let stranded = host_present
            && host_namespace != peer_namespace
            && self.links.exists(peer, host_namespace).await?;
        if stranded {
            info!(
                "veth peer {} still with its host end, moving it",
                qualified(peer, host_namespace)
            );
        } else {
            self.net
                .apply_or_throw(&build_add_veth_cmd(host, peer, host_namespace))
                .await?;
            info!(
                "Created veth {} <-> {}",
                qualified(host, host_namespace),
                qualified(peer, host_namespace)
            );
        }

        if host_namespace != peer_namespace {
            if let Err(e) = self.links.relocate(peer, host_namespace, peer_namespace).await {
                warn!(
                    "veth peer {} left in place: {}",
                    qualified(peer, host_namespace),
                    e
                );
                return Err(e);
            }
        }

        Ok(Outcome::Applied)
    }

    /// Delete a veth pair through its host end
    ///
    /// The kernel removes the peer end wherever it lives.
    #[instrument(skip(self))]
    pub async fn delete(&self, host: &str, namespace: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("veth delete", Field::Name, host)?;
        self.links.delete(host, namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmgr_common::ErrorKind;
    use nsmgr_test::FakeKernel;

    fn mgr() -> (Arc<FakeKernel>, VethMgr) {
        let kernel = Arc::new(FakeKernel::new());
        (kernel.clone(), VethMgr::new(kernel))
    }

    #[tokio::test]
    async fn test_create_across_namespaces() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_namespace("ns2");

        let outcome = mgr.create("veth0", "veth1", "ns1", "ns2").await.unwrap();
        assert_eq!(outcome, Outcome::Applied);

        assert!(kernel.link_exists("veth0", "ns1"));
        assert!(kernel.link_exists("veth1", "ns2"));
        assert!(!kernel.link_exists("veth1", "ns1"));
    }

    #[tokio::test]
    async fn test_create_peer_to_root() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");

        mgr.create("veth0", "veth1", "ns1", "").await.unwrap();
        assert!(kernel.link_exists("veth0", "ns1"));
        assert!(kernel.link_exists("veth1", ""));
        assert_eq!(kernel.mutations_matching("netns 1").len(), 1);
    }

    #[tokio::test]
    async fn test_same_namespace_no_move() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");

        mgr.create("veth0", "veth1", "ns1", "ns1").await.unwrap();
        assert!(kernel.link_exists("veth1", "ns1"));
        assert!(kernel.mutations_matching("netns").is_empty());
    }

    #[tokio::test]
    async fn test_second_create_skipped() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");

        mgr.create("veth0", "veth1", "", "ns1").await.unwrap();
        let outcome = mgr.create("veth0", "veth1", "", "ns1").await.unwrap();
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(kernel.mutations_matching("type veth").len(), 1);
    }

    #[tokio::test]
    async fn test_validation_order() {
        let (kernel, mgr) = mgr();

        let err = mgr.create("", "", "", "").await.unwrap_err();
        assert_eq!(err.code(), "missing_name");
        let err = mgr.create("veth0", "", "", "").await.unwrap_err();
        assert_eq!(err.code(), "missing_peer");
        assert!(kernel.commands().is_empty());
    }

    #[tokio::test]
    async fn test_missing_namespaces_distinguished() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");

        let err = mgr.create("veth0", "veth1", "nsX", "ns1").await.unwrap_err();
        assert_eq!(err.code(), "host_namespace_missing");
        let err = mgr.create("veth0", "veth1", "ns1", "nsY").await.unwrap_err();
        assert_eq!(err.code(), "peer_namespace_missing");
        assert!(kernel.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_leaves_nothing() {
        let (kernel, mgr) = mgr();
        kernel.fail_when("type veth");

        let err = mgr.create("veth0", "veth1", "", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert!(!kernel.link_exists("veth0", ""));
        assert!(!kernel.link_exists("veth1", ""));
    }

    #[tokio::test]
    async fn test_relocation_failure_leaves_peer_with_host() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns2");
        kernel.fail_when("netns \"ns2\"");

        let err = mgr.create("veth0", "veth1", "", "ns2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert!(kernel.link_exists("veth0", ""));
        assert!(kernel.link_exists("veth1", ""));
        assert!(!kernel.link_exists("veth1", "ns2"));
    }

    #[tokio::test]
    async fn test_rerun_after_failed_relocation_moves_peer() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        kernel.add_namespace("ns2");
        kernel.fail_when("netns \"ns2\"");
        assert!(mgr.create("veth0", "veth1", "ns1", "ns2").await.is_err());

        kernel.clear_failures();
        let outcome = mgr.create("veth0", "veth1", "ns1", "ns2").await.unwrap();

        assert_eq!(outcome, Outcome::Applied);
        assert!(kernel.link_exists("veth0", "ns1"));
        assert!(kernel.link_exists("veth1", "ns2"));
        assert!(!kernel.link_exists("veth1", "ns1"));
        assert_eq!(kernel.mutations_matching("type veth").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_both_ends() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");
        mgr.create("veth0", "veth1", "", "ns1").await.unwrap();

        mgr.delete("veth0", "").await.unwrap();
        assert!(!kernel.link_exists("veth0", ""));
        assert!(!kernel.link_exists("veth1", "ns1"));

        let err = mgr.delete("veth0", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
