//! RuleMgr - routing policy rules guarded by structured existence probes

use std::sync::Arc;

use tracing::{debug, info, instrument};

use nsmgr_common::{query_json, CfgMgrError, CfgMgrResult, Field, NetworkState, Outcome};

use crate::commands::{build_rule_cmd, build_show_rules_cmd, RuleArgs};
use crate::route_mgr::is_ipv6;
use crate::types::{join_prefix, normalize_fwmark, normalize_prefix, normalize_table, RuleEntry};

fn optional_eq(listed: Option<&str>, wanted: &str) -> bool {
    wanted.is_empty() || listed == Some(wanted)
}

/// Whether a listed rule carries the key of `rule`
///
/// Selectors and table always participate; priority, fwmark, iif and oif
/// only when the caller supplied them.
pub fn rule_matches(entry: &RuleEntry, rule: &RuleArgs<'_>) -> bool {
    if join_prefix(entry.src.as_deref(), entry.srclen) != normalize_prefix(rule.from)
        || join_prefix(entry.dst.as_deref(), entry.dstlen) != normalize_prefix(rule.to)
        || normalize_table(entry.table.as_deref().unwrap_or_default())
            != normalize_table(rule.table)
    {
        return false;
    }
    if !rule.priority.is_empty() && entry.priority != rule.priority.trim().parse().ok() {
        return false;
    }
    if !rule.fwmark.is_empty()
        && entry.fwmark.as_deref().map(normalize_fwmark) != Some(normalize_fwmark(rule.fwmark))
    {
        return false;
    }
    optional_eq(entry.iif.as_deref(), rule.iif) && optional_eq(entry.oif.as_deref(), rule.oif)
}

/// Policy rule manager
#[derive(Clone)]
pub struct RuleMgr {
    net: Arc<dyn NetworkState>,
}

impl RuleMgr {
    /// Create a new RuleMgr on top of a network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self { net }
    }

    /// Check whether a rule with the key of `rule` is installed
    pub async fn exists(&self, rule: &RuleArgs<'_>, namespace: &str) -> CfgMgrResult<bool> {
        let cmd = build_show_rules_cmd(namespace, is_ipv6(&[rule.from, rule.to]));
        let rules: Vec<RuleEntry> = query_json(self.net.as_ref(), &cmd).await?;
        Ok(rules.iter().any(|r| rule_matches(r, rule)))
    }

    /// Install a policy rule
    #[instrument(skip(self))]
    pub async fn add(&self, rule: &RuleArgs<'_>, namespace: &str) -> CfgMgrResult<Outcome> {
        self.run("add", "rule add", rule, namespace).await
    }

    /// Remove a policy rule
    #[instrument(skip(self))]
    pub async fn delete(&self, rule: &RuleArgs<'_>, namespace: &str) -> CfgMgrResult<Outcome> {
        self.run("del", "rule delete", rule, namespace).await
    }

    async fn run(
        &self,
        verb: &str,
        op: &'static str,
        rule: &RuleArgs<'_>,
        namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require(op, Field::Table, rule.table)?;

        let present = self.exists(rule, namespace).await?;
        let adding = verb == "add";
        if present == adding {
            debug!(
                "Rule from {} to {} lookup {} {}",
                normalize_prefix(rule.from),
                normalize_prefix(rule.to),
                rule.table,
                if adding { "already exists" } else { "not present" }
            );
            return Ok(Outcome::Skipped);
        }

        self.net
            .apply_or_throw(&build_rule_cmd(verb, rule, namespace))
            .await?;
        info!(
            "{}: from {} to {} lookup {}",
            op,
            normalize_prefix(rule.from),
            normalize_prefix(rule.to),
            rule.table
        );
        Ok(Outcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmgr_test::FakeKernel;

    fn mgr() -> (Arc<FakeKernel>, RuleMgr) {
        let kernel = Arc::new(FakeKernel::new());
        (kernel.clone(), RuleMgr::new(kernel))
    }

    fn source_rule() -> RuleArgs<'static> {
        RuleArgs {
            from: "192.168.1.0/24",
            table: "1",
            priority: "100",
            ..Default::default()
        }
    }

    #[test]
    fn test_rule_matches_normalised_key() {
        let entry = RuleEntry {
            priority: Some(100),
            src: Some("192.168.1.0".to_string()),
            srclen: Some(24),
            table: Some("1".to_string()),
            ..Default::default()
        };
        assert!(rule_matches(&entry, &source_rule()));
        assert!(!rule_matches(
            &entry,
            &RuleArgs {
                table: "2",
                ..source_rule()
            }
        ));
        assert!(!rule_matches(
            &entry,
            &RuleArgs {
                priority: "200",
                ..source_rule()
            }
        ));

        let main = RuleEntry {
            priority: Some(32766),
            src: Some("all".to_string()),
            table: Some("main".to_string()),
            ..Default::default()
        };
        assert!(rule_matches(
            &main,
            &RuleArgs {
                table: "254",
                ..Default::default()
            }
        ));
    }

    #[test]
    fn test_rule_matches_fwmark() {
        let entry = RuleEntry {
            priority: Some(10),
            src: Some("all".to_string()),
            table: Some("7".to_string()),
            fwmark: Some("0x7".to_string()),
            ..Default::default()
        };
        let rule = RuleArgs {
            table: "7",
            fwmark: "7",
            ..Default::default()
        };
        assert!(rule_matches(&entry, &rule));
    }

    #[tokio::test]
    async fn test_reapply_reports_existing() {
        let (kernel, mgr) = mgr();
        let before = kernel.rules("").len();

        assert_eq!(mgr.add(&source_rule(), "").await.unwrap(), Outcome::Applied);
        assert_eq!(mgr.add(&source_rule(), "").await.unwrap(), Outcome::Skipped);
        assert_eq!(kernel.rules("").len(), before + 1);
    }

    #[tokio::test]
    async fn test_namespace_scoped() {
        let (kernel, mgr) = mgr();
        kernel.add_namespace("ns1");

        mgr.add(&source_rule(), "ns1").await.unwrap();
        assert!(mgr.exists(&source_rule(), "ns1").await.unwrap());
        assert!(!mgr.exists(&source_rule(), "").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let (kernel, mgr) = mgr();
        mgr.add(&source_rule(), "").await.unwrap();

        assert_eq!(mgr.delete(&source_rule(), "").await.unwrap(), Outcome::Applied);
        assert_eq!(mgr.delete(&source_rule(), "").await.unwrap(), Outcome::Skipped);
        assert_eq!(kernel.mutations_matching("rule del").len(), 1);
    }

    #[tokio::test]
    async fn test_table_required() {
        let (kernel, mgr) = mgr();
        let rule = RuleArgs {
            from: "10.0.0.0/8",
            ..Default::default()
        };
        assert_eq!(mgr.add(&rule, "").await.unwrap_err().code(), "missing_table");
        assert_eq!(mgr.delete(&rule, "").await.unwrap_err().code(), "missing_table");
        assert!(kernel.commands().is_empty());
    }
}
