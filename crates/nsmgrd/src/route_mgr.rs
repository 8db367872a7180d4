//! RouteMgr - route installation guarded by structured existence probes

use std::sync::Arc;

use tracing::{debug, info, instrument};

use nsmgr_common::{query_json, CfgMgrError, CfgMgrResult, Field, NetworkState, Outcome};

use crate::commands::{build_route_cmd, build_show_routes_cmd, RouteArgs};
use crate::link_mgr::qualified;
use crate::types::{normalize_prefix, RouteEntry};

/// True when any of the values is an IPv6 address or prefix
pub(crate) fn is_ipv6(values: &[&str]) -> bool {
    values.iter().any(|v| v.contains(':'))
}

fn same_metric(listed: Option<u32>, wanted: &str) -> bool {
    match wanted.trim().parse::<u32>() {
        Ok(m) => listed.unwrap_or(0) == m,
        Err(_) => false,
    }
}

/// Whether a listed route carries the key of `route`
///
/// Destination always participates; gateway, metric and device only when
/// the caller supplied them.
pub fn route_matches(entry: &RouteEntry, route: &RouteArgs<'_>) -> bool {
    if normalize_prefix(&entry.dst) != normalize_prefix(route.to) {
        return false;
    }
    if !route.via.is_empty()
        && entry.gateway.as_deref().map(normalize_prefix) != Some(normalize_prefix(route.via))
    {
        return false;
    }
    if !route.metric.is_empty() && !same_metric(entry.metric, route.metric) {
        return false;
    }
    if !route.dev.is_empty() && entry.dev.as_deref() != Some(route.dev) {
        return false;
    }
    true
}

/// Route manager
#[derive(Clone)]
pub struct RouteMgr {
    net: Arc<dyn NetworkState>,
}

impl RouteMgr {
    /// Create a new RouteMgr on top of a network state handle
    pub fn new(net: Arc<dyn NetworkState>) -> Self {
        Self { net }
    }

    /// Check whether a route with the key of `route` is installed
    pub async fn exists(&self, route: &RouteArgs<'_>, namespace: &str) -> CfgMgrResult<bool> {
        let cmd = build_show_routes_cmd(
            route.table,
            namespace,
            is_ipv6(&[route.to, route.via]),
        );
        let routes: Vec<RouteEntry> = query_json(self.net.as_ref(), &cmd).await?;
        Ok(routes.iter().any(|r| route_matches(r, route)))
    }

    /// Install a route
    ///
    /// Skipped when a route with the same key is already present.
    #[instrument(skip(self))]
    pub async fn add(&self, route: &RouteArgs<'_>, namespace: &str) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("route add", Field::To, route.to)?;
        CfgMgrError::require("route add", Field::Via, route.via)?;
        if route.onlink {
            CfgMgrError::require("route add", Field::Dev, route.dev)?;
        }

        if self.exists(route, namespace).await? {
            debug!("Route {} already present", qualified(route.to, namespace));
            return Ok(Outcome::Skipped);
        }

        self.net
            .apply_or_throw(&build_route_cmd("add", route, namespace))
            .await?;
        info!(
            "Added route {} via {} in {}",
            route.to,
            route.via,
            qualified(&table_label(route.table), namespace)
        );
        Ok(Outcome::Applied)
    }

    /// Remove a route
    ///
    /// Only `to`, `via`, `table` and `metric` take part; skipped when no
    /// matching route is present.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        to: &str,
        via: &str,
        table: &str,
        metric: &str,
        namespace: &str,
    ) -> CfgMgrResult<Outcome> {
        CfgMgrError::require("route delete", Field::To, to)?;

        let route = RouteArgs {
            to,
            via,
            table,
            metric,
            ..Default::default()
        };
        if !self.exists(&route, namespace).await? {
            debug!("Route {} not present", qualified(to, namespace));
            return Ok(Outcome::Skipped);
        }

        self.net
            .apply_or_throw(&build_route_cmd("del", &route, namespace))
            .await?;
        info!("Deleted route {} in {}", to, qualified(&table_label(table), namespace));
        Ok(Outcome::Applied)
    }
}

fn table_label(table: &str) -> String {
    if table.is_empty() {
        "table main".to_string()
    } else {
        format!("table {}", table)
    }
}
