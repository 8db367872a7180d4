//! Type definitions for `ip -j` listings and key normalisation

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Loopback device name, never counted as "assigned" to a namespace
pub const LOOPBACK: &str = "lo";

/// Entry of `ip -j netns list`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetnsEntry {
    /// Namespace name
    pub name: String,
    /// Namespace id, when one is assigned
    #[serde(default)]
    pub id: Option<i64>,
}

/// Entry of `ip -j link show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    /// Interface name
    pub ifname: String,
    /// Bridge (or other master) this interface is attached to
    #[serde(default)]
    pub master: Option<String>,
    /// Interface MTU
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Operational state ("UP", "DOWN", "UNKNOWN")
    #[serde(default)]
    pub operstate: Option<String>,
    /// Interface flags ("UP", "BROADCAST", ...)
    #[serde(default)]
    pub flags: Vec<String>,
    /// Device details, only present with `-d` on virtual devices
    #[serde(default)]
    pub linkinfo: Option<LinkInfo>,
}

impl LinkEntry {
    /// Device kind ("bridge", "veth", ...); `None` for physical devices
    pub fn kind(&self) -> Option<&str> {
        self.linkinfo.as_ref()?.info_kind.as_deref()
    }
}

/// `linkinfo` block of `ip -j -d link show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    #[serde(default)]
    pub info_kind: Option<String>,
}

/// Entry of `ip -j route show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination ("default", "10.0.0.0/8", or a bare host address)
    #[serde(default)]
    pub dst: String,
    /// Gateway address
    #[serde(default)]
    pub gateway: Option<String>,
    /// Output device
    #[serde(default)]
    pub dev: Option<String>,
    /// Metric (omitted by iproute2 when zero)
    #[serde(default)]
    pub metric: Option<u32>,
    /// Table (present when listing across tables)
    #[serde(default)]
    pub table: Option<String>,
    /// Route flags ("onlink", "linkdown", ...)
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Entry of `ip -j rule show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Rule priority
    #[serde(default)]
    pub priority: Option<u32>,
    /// Source selector ("all" or an address)
    #[serde(default)]
    pub src: Option<String>,
    /// Source prefix length
    #[serde(default)]
    pub srclen: Option<u8>,
    /// Destination selector
    #[serde(default)]
    pub dst: Option<String>,
    /// Destination prefix length
    #[serde(default)]
    pub dstlen: Option<u8>,
    /// Table looked up
    #[serde(default)]
    pub table: Option<String>,
    /// Firewall mark
    #[serde(default)]
    pub fwmark: Option<String>,
    /// Input interface
    #[serde(default)]
    pub iif: Option<String>,
    /// Output interface
    #[serde(default)]
    pub oif: Option<String>,
}

/// Normalises a destination or selector for comparison.
///
/// `""`, `all`, `default` and zero-length prefixes all map to `default`;
/// full-length prefixes map to the bare address, which is how iproute2
/// prints host routes.
pub fn normalize_prefix(value: &str) -> String {
    let value = value.trim();
    match value {
        "" | "all" | "default" => return "default".to_string(),
        _ => {}
    }
    if let Ok(net) = value.parse::<IpNet>() {
        if net.prefix_len() == 0 {
            "default".to_string()
        } else if net.prefix_len() == net.max_prefix_len() {
            net.addr().to_string()
        } else {
            net.to_string()
        }
    } else if let Ok(addr) = value.parse::<IpAddr>() {
        addr.to_string()
    } else {
        value.to_string()
    }
}

/// Joins a listed address and prefix length, then normalises.
pub fn join_prefix(addr: Option<&str>, len: Option<u8>) -> String {
    match (addr, len) {
        (None, _) => normalize_prefix(""),
        (Some(addr), Some(len)) => normalize_prefix(&format!("{}/{}", addr, len)),
        (Some(addr), None) => normalize_prefix(addr),
    }
}

/// Normalises a routing table id or name.
pub fn normalize_table(table: &str) -> String {
    match table.trim() {
        "" | "main" | "254" => "main".to_string(),
        "local" | "255" => "local".to_string(),
        "default" | "253" => "default".to_string(),
        other => other.to_string(),
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Normalises a firewall mark (`1`, `0x1`, `0x1/0xffffffff` compare equal).
pub fn normalize_fwmark(fwmark: &str) -> String {
    let mut parts = fwmark.trim().splitn(2, '/');
    let mark = parts.next().unwrap_or_default();
    let mask = parts.next();
    match (parse_u32(mark), mask.map(parse_u32)) {
        (Some(mark), None) | (Some(mark), Some(Some(u32::MAX))) => format!("0x{:x}", mark),
        (Some(mark), Some(Some(mask))) => format!("0x{:x}/0x{:x}", mark, mask),
        _ => fwmark.trim().to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "default");
        assert_eq!(normalize_prefix("all"), "default");
        assert_eq!(normalize_prefix("0.0.0.0/0"), "default");
        assert_eq!(normalize_prefix("::/0"), "default");
        assert_eq!(normalize_prefix("10.0.0.0/8"), "10.0.0.0/8");
        assert_eq!(normalize_prefix("10.0.0.1/32"), "10.0.0.1");
        assert_eq!(normalize_prefix("2001:db8::1/128"), "2001:db8::1");
        assert_eq!(normalize_prefix("10.0.0.1"), "10.0.0.1");
        assert_eq!(normalize_prefix("blackhole"), "blackhole");
    }

    #[test]
    fn test_join_prefix() {
        assert_eq!(join_prefix(Some("192.168.1.0"), Some(24)), "192.168.1.0/24");
        assert_eq!(join_prefix(Some("all"), None), "default");
        assert_eq!(join_prefix(None, None), "default");
    }

    #[test]
    fn test_link_kind() {
        let links: Vec<LinkEntry> = serde_json::from_str(
            r#"[{"ifindex":4,"ifname":"br0","flags":["BROADCAST"],"mtu":1500,
                 "operstate":"DOWN","linkinfo":{"info_kind":"bridge","info_data":{"stp_state":0}}},
                {"ifindex":2,"ifname":"eth0","flags":[],"mtu":1500}]"#,
        )
        .unwrap();
        assert_eq!(links[0].kind(), Some("bridge"));
        assert_eq!(links[1].kind(), None);
    }

    #[test]
    fn test_normalize_table() {
        assert_eq!(normalize_table(""), "main");
        assert_eq!(normalize_table("254"), "main");
        assert_eq!(normalize_table("255"), "local");
        assert_eq!(normalize_table("100"), "100");
    }

    #[test]
    fn test_normalize_fwmark() {
        assert_eq!(normalize_fwmark("1"), "0x1");
        assert_eq!(normalize_fwmark("0x1"), "0x1");
        assert_eq!(normalize_fwmark("0x1/0xffffffff"), "0x1");
        assert_eq!(normalize_fwmark("0x10/0xff"), "0x10/0xff");
        assert_eq!(normalize_fwmark("MARK"), "mark");
    }

    #[test]
    fn test_route_entry_deserialize() {
        let json = r#"[{"dst":"default","gateway":"192.0.2.1","dev":"eth0","flags":["onlink"]},
                       {"dst":"10.0.0.0/8","dev":"eth1","protocol":"kernel","metric":100,"flags":[]}]"#;
        let routes: Vec<RouteEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].gateway.as_deref(), Some("192.0.2.1"));
        assert_eq!(routes[0].flags, vec!["onlink".to_string()]);
        assert_eq!(routes[1].metric, Some(100));
    }

    #[test]
    fn test_rule_entry_deserialize() {
        let json = r#"[{"priority":0,"src":"all","table":"local"},
                       {"priority":100,"src":"192.168.1.0","srclen":24,"table":"1","fwmark":"0x1"}]"#;
        let rules: Vec<RuleEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(rules[1].srclen, Some(24));
        assert_eq!(rules[1].fwmark.as_deref(), Some("0x1"));
    }
}
