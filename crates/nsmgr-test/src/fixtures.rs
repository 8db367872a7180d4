//! Topology fixtures
//!
//! Fixtures are rendered to the YAML document format nsmgrd loads, so tests
//! go through the same parsing path as a real configuration file.

use serde_yaml::{Mapping, Value};

pub const INTERFACES: &str = "interfaces";
pub const VETHS: &str = "veths";
pub const BRIDGES: &str = "bridges";
pub const ADDRESSES: &str = "addresses";
pub const IFACE_PARAMS: &str = "iface-params";
pub const ROUTES: &str = "routes";
pub const ROUTING_POLICY: &str = "routing-policy";

/// One entry of a document section
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    /// Section name (e.g., "interfaces", "routes")
    pub section: String,
    fields: Mapping,
}

impl ConfigEntry {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            fields: Mapping::new(),
        }
    }

    /// Add a scalar field; empty values are left out of the document
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.fields
                .insert(Value::String(field.into()), Value::String(value));
        }
        self
    }

    /// Add a raw YAML value (numbers, booleans) as written by hand
    pub fn with_value(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(Value::String(field.into()), value);
        self
    }

    /// Add a list of strings
    pub fn with_list<I, S>(mut self, field: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items
            .into_iter()
            .map(|s| Value::String(s.into()))
            .collect();
        self.fields
            .insert(Value::String(field.into()), Value::Sequence(items));
        self
    }
}

/// Scenario builder producing a topology document
#[derive(Debug, Clone)]
pub struct Topology {
    /// Scenario name
    pub name: String,
    pub entries: Vec<ConfigEntry>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn with(mut self, entry: ConfigEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_all<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = ConfigEntry>,
    {
        self.entries.extend(entries);
        self
    }

    /// Sections appear in the order their first entry was added
    pub fn to_yaml(&self) -> String {
        let mut sections = Mapping::new();
        for entry in &self.entries {
            let key = Value::String(entry.section.clone());
            let item = Value::Mapping(entry.fields.clone());
            match sections.get_mut(&key) {
                Some(Value::Sequence(items)) => items.push(item),
                _ => {
                    sections.insert(key, Value::Sequence(vec![item]));
                }
            }
        }

        let mut doc = Mapping::new();
        doc.insert(Value::String("network".into()), Value::Mapping(sections));
        serde_yaml::to_string(&Value::Mapping(doc)).unwrap_or_default()
    }
}

pub fn interface(name: &str, netns: &str) -> ConfigEntry {
    ConfigEntry::new(INTERFACES)
        .with_field("name", name)
        .with_field("netns", netns)
}

pub fn veth(name: &str, peer: &str, netns: &str, peer_netns: &str) -> ConfigEntry {
    ConfigEntry::new(VETHS)
        .with_field("name", name)
        .with_field("peer", peer)
        .with_field("netns", netns)
        .with_field("peer-netns", peer_netns)
}

pub fn bridge(name: &str, netns: &str, members: &[&str]) -> ConfigEntry {
    ConfigEntry::new(BRIDGES)
        .with_field("name", name)
        .with_field("netns", netns)
        .with_list("interfaces", members.iter().copied())
}

pub fn address(interface: &str, netns: &str, address: &str, prefix_length: &str) -> ConfigEntry {
    ConfigEntry::new(ADDRESSES)
        .with_field("interface", interface)
        .with_field("netns", netns)
        .with_field("address", address)
        .with_field("prefix-length", prefix_length)
}

/// Interface parameters with only an MTU
pub fn mtu(interface: &str, netns: &str, mtu: &str) -> ConfigEntry {
    ConfigEntry::new(IFACE_PARAMS)
        .with_field("interface", interface)
        .with_field("netns", netns)
        .with_field("mtu", mtu)
}

pub fn route(to: &str, via: &str, netns: &str) -> ConfigEntry {
    ConfigEntry::new(ROUTES)
        .with_field("to", to)
        .with_field("via", via)
        .with_field("netns", netns)
}

pub fn onlink_route(to: &str, via: &str, dev: &str, netns: &str) -> ConfigEntry {
    route(to, via, netns)
        .with_field("dev", dev)
        .with_value("onlink", Value::Bool(true))
}

pub fn rule(from: &str, table: &str, priority: &str, netns: &str) -> ConfigEntry {
    ConfigEntry::new(ROUTING_POLICY)
        .with_field("from", from)
        .with_field("table", table)
        .with_field("priority", priority)
        .with_field("netns", netns)
}

/// Two namespaces joined by a veth pair, one with a physical uplink on a
/// bridge, addresses on both sides, a default route and a source rule.
///
/// Expects `eth1` to exist in the root namespace.
pub fn two_namespace_lab() -> Topology {
    Topology::new("two namespace lab").with_all([
        interface("eth1", "red"),
        veth("veth-red", "veth-blue", "red", "blue"),
        bridge("br0", "red", &["eth1", "veth-red"]),
        address("br0", "red", "10.10.0.1", "24"),
        address("veth-blue", "blue", "10.10.0.2", "24"),
        mtu("veth-blue", "blue", "1400"),
        route("default", "10.10.0.1", "blue"),
        rule("10.10.0.0/24", "100", "1000", "blue"),
        ConfigEntry::new(ROUTES)
            .with_field("to", "default")
            .with_field("via", "10.10.0.1")
            .with_field("table", "100")
            .with_field("netns", "blue"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sections_grouped_in_first_seen_order() {
        let yaml = Topology::new("t")
            .with(route("default", "10.0.0.1", ""))
            .with(interface("eth1", "ns1"))
            .with(route("10.1.0.0/16", "10.0.0.2", ""))
            .to_yaml();

        let doc: Value = serde_yaml::from_str(&yaml).unwrap();
        let sections: Vec<&str> = doc["network"]
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(sections, vec![ROUTES, INTERFACES]);
        assert_eq!(doc["network"][ROUTES].as_sequence().unwrap().len(), 2);
        assert!(doc["network"][ROUTES][0].get("netns").is_none());
    }

    #[test]
    fn test_onlink_is_a_yaml_bool() {
        let yaml = Topology::new("t")
            .with(onlink_route("default", "192.0.2.1", "eth0", "ns1"))
            .to_yaml();
        let doc: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["network"][ROUTES][0]["onlink"], Value::Bool(true));
    }
}
