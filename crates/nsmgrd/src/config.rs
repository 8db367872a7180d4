//! Declarative topology document
//!
//! ```yaml
//! network:
//!   interfaces:
//!     - { name: eth1, netns: ns1 }
//!   veths:
//!     - { name: veth0, peer: veth1, netns: ns1, peer-netns: ns2 }
//!   routes:
//!     - { to: default, via: 192.0.2.1, dev: veth0, onlink: true, netns: ns1 }
//! ```
//!
//! Every leaf is a string. YAML numbers and booleans are stringified before
//! typed decoding, and absent fields decode as empty strings.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};

use nsmgr_common::{CfgMgrError, CfgMgrResult};

use crate::commands::{RouteArgs, RuleArgs};
use crate::tables::{sections, NETWORK_KEY};

/// Interface placed into a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InterfaceConfig {
    pub name: String,
    pub netns: String,
}

/// Veth pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VethConfig {
    pub name: String,
    pub peer: String,
    pub netns: String,
    pub peer_netns: String,
}

/// Bridge with its member interfaces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BridgeConfig {
    pub name: String,
    pub netns: String,
    pub interfaces: Vec<String>,
}

/// Address binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AddressConfig {
    pub interface: String,
    pub netns: String,
    pub address: String,
    pub prefix_length: String,
}

/// Interface parameter set; empty values are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IfaceParamsConfig {
    pub interface: String,
    pub netns: String,
    pub mtu: String,
    pub txqueuelen: String,
    pub rxqueuelen: String,
    pub other: String,
}

/// Route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RouteConfig {
    pub to: String,
    pub via: String,
    pub dev: String,
    pub table: String,
    pub metric: String,
    pub onlink: String,
    pub netns: String,
}

impl RouteConfig {
    /// Whether `onlink` holds a true value
    pub fn onlink(&self) -> bool {
        is_true(&self.onlink)
    }

    /// Borrow as command arguments
    pub fn args(&self) -> RouteArgs<'_> {
        RouteArgs {
            to: &self.to,
            via: &self.via,
            dev: &self.dev,
            table: &self.table,
            metric: &self.metric,
            onlink: self.onlink(),
        }
    }
}

/// Routing policy rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolicyRuleConfig {
    pub from: String,
    pub to: String,
    pub table: String,
    pub priority: String,
    pub fwmark: String,
    pub iif: String,
    pub oif: String,
    pub netns: String,
}

impl PolicyRuleConfig {
    /// Borrow as command arguments
    pub fn args(&self) -> RuleArgs<'_> {
        RuleArgs {
            from: &self.from,
            to: &self.to,
            table: &self.table,
            priority: &self.priority,
            fwmark: &self.fwmark,
            iif: &self.iif,
            oif: &self.oif,
        }
    }
}

/// The `network` section of the document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NetworkConfig {
    pub interfaces: Vec<InterfaceConfig>,
    pub veths: Vec<VethConfig>,
    pub bridges: Vec<BridgeConfig>,
    pub addresses: Vec<AddressConfig>,
    pub iface_params: Vec<IfaceParamsConfig>,
    pub routes: Vec<RouteConfig>,
    pub routing_policy: Vec<PolicyRuleConfig>,
}

fn is_true(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

/// Turn number and boolean scalars into strings and drop null map entries
fn stringify_scalars(value: &mut Value) {
    match value {
        Value::Number(n) => *value = Value::String(n.to_string()),
        Value::Bool(b) => *value = Value::String(b.to_string()),
        Value::Sequence(items) => items.iter_mut().for_each(stringify_scalars),
        Value::Mapping(map) => {
            map.retain(|_, v| !v.is_null());
            map.iter_mut().for_each(|(_, v)| stringify_scalars(v));
        }
        Value::Tagged(tagged) => stringify_scalars(&mut tagged.value),
        Value::Null | Value::String(_) => {}
    }
}

fn warn_unknown_sections(network: &Value) {
    if let Value::Mapping(map) = network {
        for key in map.keys() {
            match key.as_str() {
                Some(name) if sections::ALL.contains(&name) => {}
                _ => warn!("Ignoring unknown section {:?} under {}", key, NETWORK_KEY),
            }
        }
    }
}

impl NetworkConfig {
    /// Parse a YAML document
    ///
    /// Fails when the `network` key is missing or holds no entries.
    pub fn from_yaml_str(text: &str) -> CfgMgrResult<Self> {
        let document: Value = serde_yaml::from_str(text)
            .map_err(|e| CfgMgrError::invalid_config("document", e.to_string()))?;

        let mut network = match document.get(NETWORK_KEY) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                return Err(CfgMgrError::invalid_config(
                    NETWORK_KEY,
                    "missing top-level section",
                ))
            }
        };
        stringify_scalars(&mut network);
        warn_unknown_sections(&network);

        let config: NetworkConfig = serde_yaml::from_value(network)
            .map_err(|e| CfgMgrError::invalid_config(NETWORK_KEY, e.to_string()))?;
        if config.is_empty() {
            return Err(CfgMgrError::invalid_config(NETWORK_KEY, "section is empty"));
        }
        Ok(config)
    }

    /// Read and parse a document from disk
    pub fn load(path: &Path) -> CfgMgrResult<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            CfgMgrError::invalid_config(path.display().to_string(), e.to_string())
        })?;
        Self::from_yaml_str(&text)
    }

    /// True when no section holds any entry
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
            && self.veths.is_empty()
            && self.bridges.is_empty()
            && self.addresses.is_empty()
            && self.iface_params.is_empty()
            && self.routes.is_empty()
            && self.routing_policy.is_empty()
    }

    /// Distinct non-root namespaces referenced anywhere, in first-seen order
    pub fn referenced_namespaces(&self) -> Vec<String> {
        let names = self
            .interfaces
            .iter()
            .map(|i| i.netns.as_str())
            .chain(
                self.veths
                    .iter()
                    .flat_map(|v| [v.netns.as_str(), v.peer_netns.as_str()]),
            )
            .chain(self.bridges.iter().map(|b| b.netns.as_str()))
            .chain(self.addresses.iter().map(|a| a.netns.as_str()))
            .chain(self.iface_params.iter().map(|p| p.netns.as_str()))
            .chain(self.routes.iter().map(|r| r.netns.as_str()))
            .chain(self.routing_policy.iter().map(|r| r.netns.as_str()));

        let mut seen: Vec<String> = Vec::new();
        for name in names {
            if !name.is_empty() && !seen.iter().any(|s| s == name) {
                seen.push(name.to_string());
            }
        }
        seen
    }
}
