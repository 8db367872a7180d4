//! Shell command builders for namespace, link, address, route and rule operations

use nsmgr_common::shell::{self, ip_cmd, ip_json_cmd, shellquote};

use crate::link_params::LinkOption;

/// Build namespace listing command (JSON)
pub fn build_list_netns_cmd() -> String {
    format!("{} -j netns list", shell::IP_CMD)
}

/// Build namespace creation command
pub fn build_add_netns_cmd(name: &str) -> String {
    format!("{} netns add {}", shell::IP_CMD, shellquote(name))
}

/// Build namespace deletion command
pub fn build_del_netns_cmd(name: &str) -> String {
    format!("{} netns del {}", shell::IP_CMD, shellquote(name))
}

/// Build link listing command (JSON), scoped to a namespace
pub fn build_list_links_cmd(namespace: &str) -> String {
    format!("{} link show", ip_json_cmd(namespace))
}

/// Build single link probe command
///
/// Exits non-zero when the device does not exist in the namespace
pub fn build_show_link_cmd(iface: &str, namespace: &str) -> String {
    format!("{} link show dev {}", ip_cmd(namespace), shellquote(iface))
}

/// Build detailed single link listing command (JSON)
pub fn build_show_link_details_cmd(iface: &str, namespace: &str) -> String {
    format!(
        "{} -d link show dev {}",
        ip_json_cmd(namespace),
        shellquote(iface)
    )
}

/// Build link admin state command
pub fn build_set_link_state_cmd(iface: &str, namespace: &str, up: bool) -> String {
    format!(
        "{} link set dev {} {}",
        ip_cmd(namespace),
        shellquote(iface),
        if up { "up" } else { "down" }
    )
}

/// Build single-valued link attribute command (`mtu`, `txqueuelen`, ...)
pub fn build_set_link_attr_cmd(iface: &str, namespace: &str, attr: &str, value: &str) -> String {
    format!(
        "{} link set dev {} {} {}",
        ip_cmd(namespace),
        shellquote(iface),
        attr,
        shellquote(value)
    )
}

/// Build multi-option link command from parsed options
pub fn build_set_link_options_cmd(iface: &str, namespace: &str, options: &[LinkOption]) -> String {
    let args: Vec<String> = options.iter().map(LinkOption::to_args).collect();
    format!(
        "{} link set dev {} {}",
        ip_cmd(namespace),
        shellquote(iface),
        args.join(" ")
    )
}

/// Build move-into-namespace command
///
/// Issued from the namespace the interface currently lives in
pub fn build_move_link_cmd(iface: &str, from_namespace: &str, target_namespace: &str) -> String {
    format!(
        "{} link set dev {} netns {}",
        ip_cmd(from_namespace),
        shellquote(iface),
        shellquote(target_namespace)
    )
}

/// Build move-to-root command
pub fn build_move_link_to_root_cmd(iface: &str, current_namespace: &str) -> String {
    format!(
        "{} link set dev {} netns {}",
        ip_cmd(current_namespace),
        shellquote(iface),
        shell::ROOT_NETNS_PID
    )
}

/// Build veth pair creation command
///
/// Both ends are created in `namespace` in one call
pub fn build_add_veth_cmd(host: &str, peer: &str, namespace: &str) -> String {
    format!(
        "{} link add {} type veth peer name {}",
        ip_cmd(namespace),
        shellquote(host),
        shellquote(peer)
    )
}

/// Build link deletion command
pub fn build_del_link_cmd(iface: &str, namespace: &str) -> String {
    format!("{} link del dev {}", ip_cmd(namespace), shellquote(iface))
}

/// Build bridge creation command
pub fn build_add_bridge_cmd(name: &str, namespace: &str) -> String {
    format!(
        "{} link add name {} type bridge",
        ip_cmd(namespace),
        shellquote(name)
    )
}

/// Build bridge member attach command
pub fn build_set_master_cmd(iface: &str, bridge: &str, namespace: &str) -> String {
    format!(
        "{} link set dev {} master {}",
        ip_cmd(namespace),
        shellquote(iface),
        shellquote(bridge)
    )
}

/// Build bridge member detach command
pub fn build_set_nomaster_cmd(iface: &str, namespace: &str) -> String {
    format!(
        "{} link set dev {} nomaster",
        ip_cmd(namespace),
        shellquote(iface)
    )
}

/// Build bridge member listing command (JSON)
pub fn build_list_members_cmd(bridge: &str, namespace: &str) -> String {
    format!(
        "{} link show master {}",
        ip_json_cmd(namespace),
        shellquote(bridge)
    )
}

/// Build address add/del command
pub fn build_address_cmd(op: &str, iface: &str, cidr: &str, namespace: &str) -> String {
    format!(
        "{} address {} {} dev {}",
        ip_cmd(namespace),
        op,
        shellquote(cidr),
        shellquote(iface)
    )
}

fn family_flag(ipv6: bool) -> &'static str {
    if ipv6 {
        " -6"
    } else {
        ""
    }
}

/// Build route listing command (JSON), optionally for one table
pub fn build_show_routes_cmd(table: &str, namespace: &str, ipv6: bool) -> String {
    let base = format!("{}{} route show", ip_json_cmd(namespace), family_flag(ipv6));
    if table.is_empty() {
        base
    } else {
        format!("{} table {}", base, shellquote(table))
    }
}

/// Route fields passed to `ip route add|del`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteArgs<'a> {
    /// Destination prefix or `default`
    pub to: &'a str,
    /// Gateway address
    pub via: &'a str,
    /// Output device
    pub dev: &'a str,
    /// Routing table
    pub table: &'a str,
    /// Route metric
    pub metric: &'a str,
    /// Treat the gateway as directly reachable on `dev`
    pub onlink: bool,
}

/// Build route add/del command
///
/// Empty fields are left out of the command line
pub fn build_route_cmd(op: &str, route: &RouteArgs<'_>, namespace: &str) -> String {
    let mut cmd = format!("{} route {} {}", ip_cmd(namespace), op, shellquote(route.to));
    for (keyword, value) in [
        ("via", route.via),
        ("dev", route.dev),
        ("table", route.table),
        ("metric", route.metric),
    ] {
        if !value.is_empty() {
            cmd.push_str(&format!(" {} {}", keyword, shellquote(value)));
        }
    }
    if route.onlink {
        cmd.push_str(" onlink");
    }
    cmd
}

/// Build rule listing command (JSON)
pub fn build_show_rules_cmd(namespace: &str, ipv6: bool) -> String {
    format!("{}{} rule show", ip_json_cmd(namespace), family_flag(ipv6))
}

/// Policy rule fields passed to `ip rule add|del`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleArgs<'a> {
    /// Source selector
    pub from: &'a str,
    /// Destination selector
    pub to: &'a str,
    /// Table to look up
    pub table: &'a str,
    /// Rule priority
    pub priority: &'a str,
    /// Firewall mark selector
    pub fwmark: &'a str,
    /// Input interface selector
    pub iif: &'a str,
    /// Output interface selector
    pub oif: &'a str,
}

/// Build rule add/del command
pub fn build_rule_cmd(op: &str, rule: &RuleArgs<'_>, namespace: &str) -> String {
    let mut cmd = format!("{} rule {}", ip_cmd(namespace), op);
    for (keyword, value) in [
        ("from", rule.from),
        ("to", rule.to),
        ("fwmark", rule.fwmark),
        ("iif", rule.iif),
        ("oif", rule.oif),
        ("priority", rule.priority),
        ("table", rule.table),
    ] {
        if !value.is_empty() {
            cmd.push_str(&format!(" {} {}", keyword, shellquote(value)));
        }
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_netns_cmds() {
        assert_eq!(build_list_netns_cmd(), "/sbin/ip -j netns list");
        assert_eq!(build_add_netns_cmd("ns1"), "/sbin/ip netns add \"ns1\"");
        assert_eq!(build_del_netns_cmd("ns1"), "/sbin/ip netns del \"ns1\"");
    }

    #[test]
    fn test_build_link_cmds_scoped() {
        assert_eq!(
            build_show_link_cmd("eth0", ""),
            "/sbin/ip link show dev \"eth0\""
        );
        assert_eq!(
            build_set_link_state_cmd("veth1", "ns2", true),
            "/sbin/ip -n \"ns2\" link set dev \"veth1\" up"
        );
        assert_eq!(
            build_set_link_attr_cmd("eth0", "", "mtu", "9000"),
            "/sbin/ip link set dev \"eth0\" mtu \"9000\""
        );
        assert_eq!(
            build_list_links_cmd("ns1"),
            "/sbin/ip -n \"ns1\" -j link show"
        );
    }

    #[test]
    fn test_build_move_cmds() {
        assert_eq!(
            build_move_link_cmd("eth1", "", "ns1"),
            "/sbin/ip link set dev \"eth1\" netns \"ns1\""
        );
        assert_eq!(
            build_move_link_to_root_cmd("eth1", "ns1"),
            "/sbin/ip -n \"ns1\" link set dev \"eth1\" netns 1"
        );
    }

    #[test]
    fn test_build_veth_and_bridge_cmds() {
        assert_eq!(
            build_add_veth_cmd("veth0", "veth1", "ns1"),
            "/sbin/ip -n \"ns1\" link add \"veth0\" type veth peer name \"veth1\""
        );
        assert_eq!(
            build_add_bridge_cmd("br0", ""),
            "/sbin/ip link add name \"br0\" type bridge"
        );
        assert_eq!(
            build_set_master_cmd("eth0", "br0", "ns1"),
            "/sbin/ip -n \"ns1\" link set dev \"eth0\" master \"br0\""
        );
        assert_eq!(
            build_set_nomaster_cmd("eth0", ""),
            "/sbin/ip link set dev \"eth0\" nomaster"
        );
        assert_eq!(
            build_list_members_cmd("br0", ""),
            "/sbin/ip -j link show master \"br0\""
        );
    }

    #[test]
    fn test_build_address_cmd() {
        assert_eq!(
            build_address_cmd("add", "eth0", "10.0.0.1/24", "ns1"),
            "/sbin/ip -n \"ns1\" address add \"10.0.0.1/24\" dev \"eth0\""
        );
    }

    #[test]
    fn test_build_route_cmd_skips_empty_fields() {
        let route = RouteArgs {
            to: "10.0.0.0/8",
            via: "10.0.0.254",
            ..Default::default()
        };
        assert_eq!(
            build_route_cmd("add", &route, ""),
            "/sbin/ip route add \"10.0.0.0/8\" via \"10.0.0.254\""
        );

        let onlink = RouteArgs {
            to: "default",
            via: "192.0.2.1",
            dev: "eth0",
            table: "100",
            metric: "50",
            onlink: true,
        };
        assert_eq!(
            build_route_cmd("add", &onlink, "ns1"),
            "/sbin/ip -n \"ns1\" route add \"default\" via \"192.0.2.1\" dev \"eth0\" \
             table \"100\" metric \"50\" onlink"
        );
    }

    #[test]
    fn test_build_show_routes_cmd() {
        assert_eq!(build_show_routes_cmd("", "", false), "/sbin/ip -j route show");
        assert_eq!(
            build_show_routes_cmd("100", "ns1", false),
            "/sbin/ip -n \"ns1\" -j route show table \"100\""
        );
        assert_eq!(
            build_show_routes_cmd("", "", true),
            "/sbin/ip -j -6 route show"
        );
        assert_eq!(build_show_rules_cmd("ns1", true), "/sbin/ip -n \"ns1\" -j -6 rule show");
    }

    #[test]
    fn test_build_rule_cmd() {
        let rule = RuleArgs {
            from: "192.168.1.0/24",
            table: "1",
            priority: "100",
            ..Default::default()
        };
        assert_eq!(
            build_rule_cmd("add", &rule, ""),
            "/sbin/ip rule add from \"192.168.1.0/24\" priority \"100\" table \"1\""
        );
    }

    #[test]
    fn test_shellquote_safety() {
        let cmd = build_add_netns_cmd("ns1; rm -rf /");
        assert!(cmd.contains("\"ns1; rm -rf /\""));
    }
}
