//! Full passes over a two-namespace lab
//!
//! Scenario (see `nsmgr_test::two_namespace_lab`):
//! - `eth1` moves from root into `red` and joins bridge `br0`
//! - veth `veth-red` (red) <-> `veth-blue` (blue) joins the same bridge
//! - `blue` routes through `br0`'s address and has a source rule into table 100

use std::sync::Arc;

use nsmgr_common::{ErrorKind, Outcome};
use nsmgr_test::{two_namespace_lab, FakeKernel};
use nsmgrd::{NetworkConfig, Orchestrator, Phase};
use pretty_assertions::assert_eq;

fn lab() -> (Arc<FakeKernel>, Orchestrator, NetworkConfig) {
    let kernel = Arc::new(FakeKernel::new());
    kernel.add_physical("eth1", "");
    let config = NetworkConfig::from_yaml_str(&two_namespace_lab().to_yaml()).unwrap();
    (kernel.clone(), Orchestrator::new(kernel), config)
}

#[tokio::test]
async fn test_apply_builds_lab() {
    let (kernel, orchestrator, config) = lab();

    let run = orchestrator.apply(&config).await;
    assert_eq!(run.failed(), 0, "{}", run.summary());

    assert_eq!(kernel.namespaces(), vec!["red".to_string(), "blue".to_string()]);
    assert!(!kernel.link_exists("eth1", ""));
    assert_eq!(kernel.master_of("eth1", "red").as_deref(), Some("br0"));
    assert_eq!(kernel.master_of("veth-red", "red").as_deref(), Some("br0"));
    assert!(kernel.link_exists("veth-blue", "blue"));
    assert_eq!(kernel.addresses("br0", "red"), vec!["10.10.0.1/24".to_string()]);
    assert_eq!(kernel.mtu("veth-blue", "blue"), Some(1400));
    for (iface, ns) in [("eth1", "red"), ("veth-red", "red"), ("veth-blue", "blue"), ("br0", "red")] {
        assert!(kernel.is_up(iface, ns), "{} in {} is down", iface, ns);
    }

    let main = kernel.routes("blue", "main");
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].dst, "default");
    assert_eq!(main[0].dev.as_deref(), Some("veth-blue"));
    assert_eq!(kernel.routes("blue", "100").len(), 1);
    assert!(kernel
        .rules("blue")
        .iter()
        .any(|r| r.priority == 1000 && r.table == "100"));

    let verifier = kernel.verifier();
    verifier
        .assert_executed_before("netns add \"red\"", "link set dev \"eth1\" netns \"red\"")
        .unwrap();
    verifier
        .assert_executed_before("link set dev \"eth1\" down", "link set dev \"eth1\" netns")
        .unwrap();
    verifier
        .assert_executed_before("type bridge", "address add")
        .unwrap();
    verifier
        .assert_executed_before("route add", "rule add")
        .unwrap();
}

/// A second pass only re-issues the unguarded operations
#[tokio::test]
async fn test_second_apply_converges() {
    let (kernel, orchestrator, config) = lab();
    orchestrator.apply(&config).await;
    kernel.clear_commands();

    let run = orchestrator.apply(&config).await;

    for created in ["netns add", "link add", "netns \"red\"", "master", "route add", "rule add"] {
        kernel.verifier().assert_command_not_executed(created).unwrap();
    }
    for phase in [
        Phase::CreateNamespaces,
        Phase::BringDown,
        Phase::PlaceInterfaces,
        Phase::CreateVeths,
        Phase::Routes,
        Phase::PolicyRules,
    ] {
        let report = run.phase(phase).unwrap();
        assert!(
            report
                .entries
                .iter()
                .all(|e| e.result.as_ref().ok() == Some(&Outcome::Skipped)),
            "{} was not skipped",
            phase
        );
    }

    // addresses carry no existence probe; the kernel rejects the duplicates
    let failures = run.failures();
    assert_eq!(failures.len(), 2, "{}", run.summary());
    assert!(failures.iter().all(|f| f.phase == Phase::Addressing));
    assert!(failures.iter().all(|f| f.kind == ErrorKind::Operation));
}

#[tokio::test]
async fn test_teardown_restores_root() {
    let (kernel, orchestrator, config) = lab();
    orchestrator.apply(&config).await;

    let run = orchestrator.teardown(&config).await;
    assert_eq!(run.failed(), 0, "{}", run.summary());

    assert!(kernel.namespaces().is_empty());
    assert!(kernel.link_exists("eth1", ""));
    assert_eq!(kernel.master_of("eth1", ""), None);
    assert!(!kernel.link_exists("veth-red", ""));
    assert!(!kernel.link_exists("br0", ""));
    assert_eq!(kernel.rules("").len(), 5);
}

#[tokio::test]
async fn test_teardown_of_nothing_skips() {
    let (kernel, orchestrator, config) = lab();

    let run = orchestrator.teardown(&config).await;

    assert_eq!(run.failed(), 0, "{}", run.summary());
    assert_eq!(run.applied(), 0);
    assert!(kernel.mutations().is_empty());
}

#[tokio::test]
async fn test_partial_failure_keeps_going() {
    let (kernel, orchestrator, config) = lab();
    kernel.fail_when("type bridge");

    let run = orchestrator.apply(&config).await;

    let bridging = run.phase(Phase::Bridging).unwrap();
    assert!(bridging.entries.iter().all(|e| e.is_failed()));
    assert_eq!(
        bridging.entries[1].error().map(|e| e.code()),
        Some("bridge_missing")
    );
    assert!(kernel.link_exists("veth-blue", "blue"));
    assert_eq!(kernel.routes("blue", "main").len(), 1);
    assert!(run.summary().contains("[bridging]"));
}

#[tokio::test]
async fn test_uncreated_namespaces_fail_the_run() {
    // Same view a recording pass gets: nothing it asked for was created
    let (kernel, orchestrator, config) = lab();
    kernel.fail_when("netns add");

    let run = orchestrator.apply(&config).await;

    assert!(!run.is_success());
    let veths = run.phase(Phase::CreateVeths).unwrap();
    assert_eq!(veths.entries[0].error().map(|e| e.kind()), Some(ErrorKind::Precondition));
    let routes = run.phase(Phase::Routes).unwrap();
    assert!(routes.entries.iter().all(|e| e.is_failed()));
    let summary = run.summary();
    assert!(summary.contains("[create-veths] veth-red"), "{}", summary);
    assert!(summary.contains("[routes]"), "{}", summary);
}
