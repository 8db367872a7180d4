//! Orchestrator - drives every manager through the fixed phase order
//!
//! Phases run strictly one after another and entries within a phase in
//! document order. A failing entry is recorded and logged; the phase and the
//! pass carry on.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use nsmgr_common::{CfgMgrResult, ErrorKind, NetworkState, Outcome};

use crate::addr_mgr::AddrMgr;
use crate::bridge_mgr::BridgeMgr;
use crate::config::NetworkConfig;
use crate::link_mgr::{qualified, LinkMgr};
use crate::netns_mgr::NetnsMgr;
use crate::report::{Phase, PhaseReport, RunReport};
use crate::route_mgr::RouteMgr;
use crate::rule_mgr::RuleMgr;
use crate::veth_mgr::VethMgr;

/// Convergence driver over all managers
#[derive(Clone)]
pub struct Orchestrator {
    netns: NetnsMgr,
    links: LinkMgr,
    veths: VethMgr,
    bridges: BridgeMgr,
    addrs: AddrMgr,
    routes: RouteMgr,
    rules: RuleMgr,
}

fn record(report: &mut PhaseReport, subject: String, result: CfgMgrResult<Outcome>) {
    match &result {
        Ok(outcome) => debug!("[{}] {}: {}", report.phase, subject, outcome),
        Err(e) => warn!(
            "[{}] {} failed ({}, {}): {}",
            report.phase,
            subject,
            e.kind(),
            e.code(),
            e
        ),
    }
    report.push(subject, result);
}

/// Teardown treats an already-absent subject as done
fn absent_is_done(result: CfgMgrResult<Outcome>) -> CfgMgrResult<Outcome> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{}", e);
            Ok(Outcome::Skipped)
        }
        other => other,
    }
}

fn route_subject(to: &str, table: &str, namespace: &str) -> String {
    if table.is_empty() {
        format!("route {}", qualified(to, namespace))
    } else {
        format!("route {} table {}", qualified(to, namespace), table)
    }
}

fn rule_subject(from: &str, to: &str, table: &str, namespace: &str) -> String {
    let from = if from.is_empty() { "all" } else { from };
    let to = if to.is_empty() { "all" } else { to };
    qualified(&format!("rule from {} to {} lookup {}", from, to, table), namespace)
}

impl Orchestrator {
    /// Create an Orchestrator whose managers share one network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self {
            netns: NetnsMgr::new(net.clone()),
            links: LinkMgr::new(net.clone()),
            veths: VethMgr::new(net.clone()),
            bridges: BridgeMgr::new(net.clone()),
            addrs: AddrMgr::new(net.clone()),
            routes: RouteMgr::new(net.clone()),
            rules: RuleMgr::new(net),
        }
    }

    /// Run the convergence pass
    #[instrument(skip_all)]
    pub async fn apply(&self, config: &NetworkConfig) -> RunReport {
        info!("Starting convergence pass");
        let mut run = RunReport::default();

        run.phases.push(self.create_namespaces(config).await);
        run.phases.push(self.bring_down(config).await);
        run.phases.push(self.place_interfaces(config).await);
        run.phases.push(self.create_veths(config).await);
        run.phases.push(self.bridging(config).await);
        run.phases.push(self.addressing(config).await);
        run.phases.push(self.interface_params(config).await);
        run.phases.push(self.bring_up(config).await);
        run.phases.push(self.install_routes(config).await);
        run.phases.push(self.install_rules(config).await);

        info!(
            "Convergence pass finished: {} applied, {} skipped, {} failed",
            run.applied(),
            run.skipped(),
            run.failed()
        );
        run
    }

    /// Run the reverse pass removing what `apply` installs
    #[instrument(skip_all)]
    pub async fn teardown(&self, config: &NetworkConfig) -> RunReport {
        info!("Starting teardown pass");
        let mut run = RunReport::default();

        run.phases.push(self.delete_rules(config).await);
        run.phases.push(self.delete_routes(config).await);
        run.phases.push(self.remove_addresses(config).await);
        run.phases.push(self.delete_bridges(config).await);
        run.phases.push(self.delete_veths(config).await);
        run.phases.push(self.return_interfaces(config).await);
        run.phases.push(self.delete_namespaces(config).await);

        info!(
            "Teardown pass finished: {} applied, {} skipped, {} failed",
            run.applied(),
            run.skipped(),
            run.failed()
        );
        run
    }

    async fn create_namespaces(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::CreateNamespaces);
        for name in config.referenced_namespaces() {
            let result = self.netns.add(&name).await;
            record(&mut report, name, result);
        }
        report
    }

    /// Interfaces are expected in the root namespace here; one that already
    /// left root (an earlier run placed it) is skipped.
    async fn bring_down(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::BringDown);
        for iface in &config.interfaces {
            let result = match self.links.exists(&iface.name, "").await {
                Ok(false) => Ok(Outcome::Skipped),
                Ok(true) => self.links.bring_down(&iface.name, "").await,
                Err(e) => Err(e),
            };
            record(&mut report, iface.name.clone(), result);
        }
        report
    }

    async fn place_interfaces(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::PlaceInterfaces);
        for iface in config.interfaces.iter().filter(|i| !i.netns.is_empty()) {
            let result = self.links.move_to_namespace(&iface.name, &iface.netns).await;
            record(&mut report, qualified(&iface.name, &iface.netns), result);
        }
        report
    }

    async fn create_veths(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::CreateVeths);
        for veth in &config.veths {
            let result = self
                .veths
                .create(&veth.name, &veth.peer, &veth.netns, &veth.peer_netns)
                .await;
            let subject = format!(
                "{} <-> {}",
                qualified(&veth.name, &veth.netns),
                qualified(&veth.peer, &veth.peer_netns)
            );
            record(&mut report, subject, result);
        }
        report
    }

    async fn bridging(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Bridging);
        for bridge in &config.bridges {
            let subject = qualified(&bridge.name, &bridge.netns);
            let result = self.bridges.create(&bridge.name, &bridge.netns).await;
            record(&mut report, subject.clone(), result);

            for member in &bridge.interfaces {
                let result = self
                    .bridges
                    .add_interface(member, &bridge.name, &bridge.netns)
                    .await;
                record(&mut report, format!("{} -> {}", member, subject), result);
            }
        }
        report
    }

    async fn addressing(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Addressing);
        for addr in &config.addresses {
            let result = self
                .addrs
                .add(&addr.interface, &addr.address, &addr.prefix_length, &addr.netns)
                .await;
            let subject = format!(
                "{}/{} on {}",
                addr.address,
                addr.prefix_length,
                qualified(&addr.interface, &addr.netns)
            );
            record(&mut report, subject, result);
        }
        report
    }

    async fn interface_params(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::InterfaceParams);
        for params in &config.iface_params {
            let (iface, ns) = (params.interface.as_str(), params.netns.as_str());
            let subject = |what: &str| format!("{} {}", qualified(iface, ns), what);

            if !params.mtu.is_empty() {
                let result = self.links.set_mtu(iface, ns, &params.mtu).await;
                record(&mut report, subject("mtu"), result);
            }
            if !params.txqueuelen.is_empty() {
                let result = self.links.set_tx_queue_len(iface, ns, &params.txqueuelen).await;
                record(&mut report, subject("txqueuelen"), result);
            }
            if !params.rxqueuelen.is_empty() {
                let result = self.links.set_rx_queue_len(iface, ns, &params.rxqueuelen).await;
                record(&mut report, subject("rxqueuelen"), result);
            }
            if !params.other.trim().is_empty() {
                let result = self.links.set_other_params(iface, ns, &params.other).await;
                record(&mut report, subject("params"), result);
            }
        }
        report
    }

    /// Declared interfaces, both veth ends and bridges, each once
    async fn bring_up(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::BringUp);

        let declared = config
            .interfaces
            .iter()
            .map(|i| (i.name.as_str(), i.netns.as_str()))
            .chain(config.veths.iter().flat_map(|v| {
                [
                    (v.name.as_str(), v.netns.as_str()),
                    (v.peer.as_str(), v.peer_netns.as_str()),
                ]
            }))
            .chain(
                config
                    .bridges
                    .iter()
                    .map(|b| (b.name.as_str(), b.netns.as_str())),
            );

        let mut seen: Vec<(&str, &str)> = Vec::new();
        for (name, ns) in declared {
            if seen.contains(&(name, ns)) {
                continue;
            }
            seen.push((name, ns));
            let result = self.links.bring_up(name, ns).await;
            record(&mut report, qualified(name, ns), result);
        }
        report
    }

    /// Each route's device is brought up first; when that fails the route
    /// entry fails with it and no add is attempted.
    async fn install_routes(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Routes);
        for route in &config.routes {
            let subject = route_subject(&route.to, &route.table, &route.netns);
            if !route.dev.is_empty() {
                if let Err(e) = self.links.bring_up(&route.dev, &route.netns).await {
                    record(&mut report, subject, Err(e));
                    continue;
                }
            }
            let result = self.routes.add(&route.args(), &route.netns).await;
            record(&mut report, subject, result);
        }
        report
    }

    async fn install_rules(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::PolicyRules);
        for rule in &config.routing_policy {
            let result = self.rules.add(&rule.args(), &rule.netns).await;
            let subject = rule_subject(&rule.from, &rule.to, &rule.table, &rule.netns);
            record(&mut report, subject, result);
        }
        report
    }

    /// Rules and routes go away with their namespace
    async fn namespace_gone(&self, namespace: &str) -> CfgMgrResult<bool> {
        if namespace.is_empty() {
            return Ok(false);
        }
        Ok(!self.netns.exists(namespace).await?)
    }

    async fn delete_rules(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::DeleteRules);
        for rule in config.routing_policy.iter().rev() {
            let result = match self.namespace_gone(&rule.netns).await {
                Ok(true) => Ok(Outcome::Skipped),
                Ok(false) => self.rules.delete(&rule.args(), &rule.netns).await,
                Err(e) => Err(e),
            };
            let subject = rule_subject(&rule.from, &rule.to, &rule.table, &rule.netns);
            record(&mut report, subject, result);
        }
        report
    }

    async fn delete_routes(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::DeleteRoutes);
        for route in config.routes.iter().rev() {
            let result = match self.namespace_gone(&route.netns).await {
                Ok(true) => Ok(Outcome::Skipped),
                Ok(false) => {
                    self.routes
                        .delete(&route.to, &route.via, &route.table, &route.metric, &route.netns)
                        .await
                }
                Err(e) => Err(e),
            };
            record(
                &mut report,
                route_subject(&route.to, &route.table, &route.netns),
                result,
            );
        }
        report
    }

    /// Addresses on interfaces that are already gone are skipped
    async fn remove_addresses(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::RemoveAddresses);
        for addr in config.addresses.iter().rev() {
            let result = match self.links.exists(&addr.interface, &addr.netns).await {
                Ok(false) => Ok(Outcome::Skipped),
                Ok(true) => {
                    self.addrs
                        .remove(&addr.interface, &addr.address, &addr.prefix_length, &addr.netns)
                        .await
                }
                Err(e) => Err(e),
            };
            let subject = format!(
                "{}/{} on {}",
                addr.address,
                addr.prefix_length,
                qualified(&addr.interface, &addr.netns)
            );
            record(&mut report, subject, result);
        }
        report
    }

    async fn delete_bridges(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::DeleteBridges);
        for bridge in config.bridges.iter().rev() {
            let result = match self.links.exists(&bridge.name, &bridge.netns).await {
                Ok(false) => Ok(Outcome::Skipped),
                Ok(true) => self.bridges.delete(&bridge.name, &bridge.netns).await,
                Err(e) => Err(e),
            };
            record(&mut report, qualified(&bridge.name, &bridge.netns), result);
        }
        report
    }

    async fn delete_veths(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::DeleteVeths);
        for veth in config.veths.iter().rev() {
            let result = absent_is_done(self.veths.delete(&veth.name, &veth.netns).await);
            record(&mut report, qualified(&veth.name, &veth.netns), result);
        }
        report
    }

    async fn return_interfaces(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::ReturnInterfaces);
        for iface in config.interfaces.iter().rev().filter(|i| !i.netns.is_empty()) {
            let result = match self.links.exists(&iface.name, &iface.netns).await {
                Ok(false) => Ok(Outcome::Skipped),
                Ok(true) => self.links.move_to_root(&iface.name, &iface.netns).await,
                Err(e) => Err(e),
            };
            record(&mut report, qualified(&iface.name, &iface.netns), result);
        }
        report
    }

    async fn delete_namespaces(&self, config: &NetworkConfig) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::DeleteNamespaces);
        for name in config.referenced_namespaces().into_iter().rev() {
            let result = absent_is_done(self.netns.delete(&name).await);
            record(&mut report, name, result);
        }
        report
    }
}
