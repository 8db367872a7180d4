//! Handle to the live kernel networking state.
//!
//! Managers receive an `Arc<dyn NetworkState>` instead of shelling out
//! directly, so the same code runs against the host ([`ShellNetworkState`]),
//! in plan mode ([`DryRunNetworkState`]) or against an in-memory fake in
//! tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::{CfgMgrError, CfgMgrResult};
use crate::shell::{self, ExecResult};

/// The kernel networking state, reached through the control interface.
///
/// Calls are split by intent: probes that only read state go through
/// [`query`](NetworkState::query), anything that changes it goes through
/// [`apply`](NetworkState::apply).
#[async_trait]
pub trait NetworkState: Send + Sync {
    /// Runs a read-only command.
    async fn query(&self, cmd: &str) -> CfgMgrResult<ExecResult>;

    /// Runs a state-changing command.
    async fn apply(&self, cmd: &str) -> CfgMgrResult<ExecResult>;

    /// Runs a state-changing command and fails on non-zero exit.
    async fn apply_or_throw(&self, cmd: &str) -> CfgMgrResult<String> {
        self.apply(cmd).await?.into_stdout(cmd)
    }
}

/// Runs a JSON query and decodes its output.
///
/// Empty output decodes as `T::default()`, which is what `ip -j` prints for
/// an empty listing on some iproute2 versions.
pub async fn query_json<T>(net: &dyn NetworkState, cmd: &str) -> CfgMgrResult<T>
where
    T: DeserializeOwned + Default,
{
    let stdout = net.query(cmd).await?.into_stdout(cmd)?;
    if stdout.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&stdout).map_err(|e| CfgMgrError::Parse {
        command: cmd.to_string(),
        message: e.to_string(),
    })
}

/// Executes every command on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellNetworkState;

#[async_trait]
impl NetworkState for ShellNetworkState {
    async fn query(&self, cmd: &str) -> CfgMgrResult<ExecResult> {
        shell::exec(cmd).await
    }

    async fn apply(&self, cmd: &str) -> CfgMgrResult<ExecResult> {
        shell::exec(cmd).await
    }
}

/// Probes the host but only records mutations.
///
/// Every recorded mutation reports success, so a plan shows what a real
/// run would attempt given the current host state.
#[derive(Debug, Default)]
pub struct DryRunNetworkState {
    recorded: Mutex<Vec<String>>,
}

impl DryRunNetworkState {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutations recorded so far, in order.
    pub fn recorded(&self) -> Vec<String> {
        self.recorded.lock().clone()
    }
}

#[async_trait]
impl NetworkState for DryRunNetworkState {
    async fn query(&self, cmd: &str) -> CfgMgrResult<ExecResult> {
        shell::exec(cmd).await
    }

    async fn apply(&self, cmd: &str) -> CfgMgrResult<ExecResult> {
        info!(command = %cmd, "Dry run: not executing");
        self.recorded.lock().push(cmd.to_string());
        Ok(ExecResult::ok(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    #[tokio::test]
    async fn test_dry_run_records_mutations() {
        let net = DryRunNetworkState::new();
        let result = net.apply("/sbin/ip netns add \"ns1\"").await.unwrap();
        assert!(result.success());
        net.apply_or_throw("/sbin/ip netns add \"ns2\"").await.unwrap();
        assert_eq!(
            net.recorded(),
            vec![
                "/sbin/ip netns add \"ns1\"".to_string(),
                "/sbin/ip netns add \"ns2\"".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_query_executes() {
        let net = DryRunNetworkState::new();
        let result = net.query("echo probe").await.unwrap();
        assert_eq!(result.stdout, "probe");
        assert!(net.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_query_json_decodes_and_handles_empty() {
        let net = ShellNetworkState;
        let names: Vec<Named> = query_json(&net, r#"echo '[{"name":"ns1"}]'"#)
            .await
            .unwrap();
        assert_eq!(names, vec![Named { name: "ns1".to_string() }]);

        let empty: Vec<Named> = query_json(&net, "true").await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_query_json_parse_error() {
        let net = ShellNetworkState;
        let err = query_json::<Vec<Named>>(&net, "echo not-json")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unparsable_output");
    }
}
