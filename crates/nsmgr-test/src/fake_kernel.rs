//! In-memory kernel networking state
//!
//! [`FakeKernel`] implements [`NetworkState`] by interpreting the `ip`
//! command lines the managers generate. It keeps namespaces, links,
//! addresses, routes and policy rules, answers `-j` listings in the shape
//! iproute2 prints them, and fails the way the kernel does (duplicate
//! objects, missing devices, unreachable gateways). Every call is recorded,
//! so tests can assert on the exact commands issued.

use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::debug;

use nsmgr_common::shell::{ExecResult, IP_CMD, ROOT_NETNS_PID};
use nsmgr_common::{CfgMgrResult, NetworkState};

use crate::verification::CommandVerifier;

/// Exit status of `ip` for usage and lookup errors
const EXIT_ERROR: i32 = 1;
/// Exit status of `ip` when the kernel rejects a request
const EXIT_RTNETLINK: i32 = 2;
/// Exit status of `ip` for unknown objects or commands
const EXIT_USAGE: i32 = 255;

const LOOPBACK: &str = "lo";
const DEFAULT_MTU: u32 = 1500;
const LOOPBACK_MTU: u32 = 65536;

const PRIO_LOCAL: u32 = 0;
const PRIO_MAIN: u32 = 32766;
const PRIO_DEFAULT: u32 = 32767;

type Answer = Result<String, (i32, String)>;

fn fail(code: i32, message: impl Into<String>) -> Answer {
    Err((code, message.into()))
}

fn file_exists() -> Answer {
    fail(EXIT_RTNETLINK, "RTNETLINK answers: File exists")
}

fn no_device(name: &str) -> Answer {
    fail(EXIT_ERROR, format!("Cannot find device \"{}\"", name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Loopback,
    Physical,
    Veth(u64),
    Bridge,
}

#[derive(Debug, Clone)]
struct Link {
    ifindex: u32,
    name: String,
    kind: LinkKind,
    up: bool,
    mtu: u32,
    master: Option<String>,
    addresses: Vec<IpNet>,
    settings: Vec<String>,
}

/// A route held by the fake kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRoute {
    /// Destination as iproute2 prints it (`default`, `10.0.0.0/8`, bare host)
    pub dst: String,
    pub gateway: Option<String>,
    pub dev: Option<String>,
    /// Canonical table name (`main`, `local`, `default` or the number)
    pub table: String,
    pub metric: u32,
    pub onlink: bool,
    pub ipv6: bool,
}

/// A policy rule held by the fake kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRule {
    pub priority: u32,
    pub from: Option<IpNet>,
    pub to: Option<IpNet>,
    /// Canonical table name
    pub table: String,
    /// Mark in `0x..` form
    pub fwmark: Option<String>,
    pub iif: Option<String>,
    pub oif: Option<String>,
    pub ipv6: bool,
}

impl FakeRule {
    fn builtin(priority: u32, table: &str, ipv6: bool) -> Self {
        Self {
            priority,
            from: None,
            to: None,
            table: table.to_string(),
            fwmark: None,
            iif: None,
            oif: None,
            ipv6,
        }
    }
}

#[derive(Debug, Default)]
struct Netns {
    links: Vec<Link>,
    routes: Vec<FakeRoute>,
    rules: Vec<FakeRule>,
}

impl Netns {
    fn link(&self, name: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.name == name)
    }

    fn link_mut(&mut self, name: &str) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.name == name)
    }
}

#[derive(Debug)]
struct Call {
    mutation: bool,
    command: String,
}

#[derive(Debug, Default)]
struct State {
    namespaces: Vec<(String, Netns)>,
    next_ifindex: u32,
    next_pair: u64,
    calls: Vec<Call>,
    failures: Vec<String>,
}

impl State {
    fn ns(&self, name: &str) -> Option<&Netns> {
        self.namespaces
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ns)| ns)
    }

    fn ns_mut(&mut self, name: &str) -> Option<&mut Netns> {
        self.namespaces
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, ns)| ns)
    }

    fn new_link(&mut self, name: &str, kind: LinkKind) -> Link {
        self.next_ifindex += 1;
        Link {
            ifindex: self.next_ifindex,
            name: name.to_string(),
            kind,
            up: false,
            mtu: if kind == LinkKind::Loopback {
                LOOPBACK_MTU
            } else {
                DEFAULT_MTU
            },
            master: None,
            addresses: Vec::new(),
            settings: Vec::new(),
        }
    }

    fn create_namespace(&mut self, name: &str) {
        let lo = self.new_link(LOOPBACK, LinkKind::Loopback);
        let mut ns = Netns::default();
        ns.links.push(lo);
        ns.rules = vec![
            FakeRule::builtin(PRIO_LOCAL, "local", false),
            FakeRule::builtin(PRIO_MAIN, "main", false),
            FakeRule::builtin(PRIO_DEFAULT, "default", false),
            FakeRule::builtin(PRIO_LOCAL, "local", true),
            FakeRule::builtin(PRIO_MAIN, "main", true),
        ];
        self.namespaces.push((name.to_string(), ns));
    }

    /// Detach a link from `namespace`, dropping what the kernel drops with it
    fn take_link(&mut self, namespace: &str, name: &str) -> Option<Link> {
        let ns = self.ns_mut(namespace)?;
        let pos = ns.links.iter().position(|l| l.name == name)?;
        let link = ns.links.remove(pos);
        ns.routes.retain(|r| r.dev.as_deref() != Some(name));
        if link.kind == LinkKind::Bridge {
            for member in ns.links.iter_mut() {
                if member.master.as_deref() == Some(name) {
                    member.master = None;
                }
            }
        }
        Some(link)
    }

    fn delete_link(&mut self, namespace: &str, name: &str) -> Answer {
        let link = match self.take_link(namespace, name) {
            Some(link) => link,
            None => return no_device(name),
        };
        if let LinkKind::Veth(pair) = link.kind {
            let peers: Vec<(String, String)> = self
                .namespaces
                .iter()
                .flat_map(|(ns_name, ns)| {
                    ns.links
                        .iter()
                        .filter(move |l| l.kind == LinkKind::Veth(pair))
                        .map(move |l| (ns_name.clone(), l.name.clone()))
                })
                .collect();
            for (ns_name, peer) in peers {
                self.take_link(&ns_name, &peer);
            }
        }
        Ok(String::new())
    }

    fn move_link(&mut self, from: &str, name: &str, to: &str) -> Answer {
        if self.ns(to).is_none() {
            return fail(
                EXIT_ERROR,
                format!("Cannot open network namespace \"{}\": No such file or directory", to),
            );
        }
        if from == to {
            return Ok(String::new());
        }
        if self.ns(to).and_then(|ns| ns.link(name)).is_some() {
            return file_exists();
        }
        let mut link = match self.take_link(from, name) {
            Some(link) => link,
            None => return no_device(name),
        };
        link.up = false;
        link.master = None;
        link.addresses.clear();
        if let Some(ns) = self.ns_mut(to) {
            ns.links.push(link);
        }
        Ok(String::new())
    }
}

/// Split a command line the way `/bin/sh` would for double-quoted words
fn tokenize(cmd: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = cmd.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    tokens.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        tokens.push(current);
    }
    tokens
}

fn canonical_table(table: &str) -> String {
    match table {
        "" | "main" | "254" => "main".to_string(),
        "local" | "255" => "local".to_string(),
        "default" | "253" => "default".to_string(),
        other => other.to_string(),
    }
}

/// `None` stands for `default`/`all`
fn parse_prefix(value: &str) -> Result<Option<IpNet>, (i32, String)> {
    match value {
        "" | "default" | "all" => return Ok(None),
        _ => {}
    }
    let net = match value.parse::<IpNet>() {
        Ok(net) => net,
        Err(_) => match value.parse::<IpAddr>() {
            Ok(addr) => IpNet::from(addr),
            Err(_) => {
                return Err((
                    EXIT_ERROR,
                    format!("Error: any valid prefix is expected rather than \"{}\".", value),
                ))
            }
        },
    };
    if net.trunc() != net {
        return Err((
            EXIT_RTNETLINK,
            "Error: Invalid prefix for given prefix length.".to_string(),
        ));
    }
    Ok(if net.prefix_len() == 0 { None } else { Some(net) })
}

fn display_dst(net: &Option<IpNet>) -> String {
    match net {
        None => "default".to_string(),
        Some(n) if n.prefix_len() == n.max_prefix_len() => n.addr().to_string(),
        Some(n) => n.to_string(),
    }
}

fn canonical_fwmark(value: &str) -> String {
    let mut parts = value.splitn(2, '/');
    let parse = |v: &str| match v.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => v.parse::<u32>().ok(),
    };
    let mark = parts.next().and_then(parse);
    let mask = parts.next().and_then(parse);
    match (mark, mask) {
        (Some(m), None) | (Some(m), Some(u32::MAX)) => format!("0x{:x}", m),
        (Some(m), Some(mask)) => format!("0x{:x}/0x{:x}", m, mask),
        _ => value.to_string(),
    }
}

/// `details` adds the `linkinfo` block `-d` prints for virtual devices
fn link_json(link: &Link, details: bool) -> Value {
    let mut flags: Vec<&str> = Vec::new();
    if link.kind == LinkKind::Loopback {
        flags.push("LOOPBACK");
    } else {
        flags.extend(["BROADCAST", "MULTICAST"]);
    }
    if link.up {
        flags.extend(["UP", "LOWER_UP"]);
    }
    let operstate = match (link.kind, link.up) {
        (LinkKind::Loopback, _) => "UNKNOWN",
        (_, true) => "UP",
        (_, false) => "DOWN",
    };

    let mut obj = Map::new();
    obj.insert("ifindex".into(), json!(link.ifindex));
    obj.insert("ifname".into(), json!(link.name));
    obj.insert("flags".into(), json!(flags));
    obj.insert("mtu".into(), json!(link.mtu));
    if let Some(master) = &link.master {
        obj.insert("master".into(), json!(master));
    }
    obj.insert("operstate".into(), json!(operstate));
    let info_kind = match link.kind {
        LinkKind::Veth(_) => Some("veth"),
        LinkKind::Bridge => Some("bridge"),
        LinkKind::Loopback | LinkKind::Physical => None,
    };
    if let (true, Some(kind)) = (details, info_kind) {
        obj.insert("linkinfo".into(), json!({ "info_kind": kind }));
    }
    Value::Object(obj)
}

fn route_json(route: &FakeRoute) -> Value {
    let mut obj = Map::new();
    obj.insert("dst".into(), json!(route.dst));
    if let Some(gw) = &route.gateway {
        obj.insert("gateway".into(), json!(gw));
    }
    if let Some(dev) = &route.dev {
        obj.insert("dev".into(), json!(dev));
    }
    if route.metric != 0 {
        obj.insert("metric".into(), json!(route.metric));
    }
    let flags: Vec<&str> = if route.onlink { vec!["onlink"] } else { vec![] };
    obj.insert("flags".into(), json!(flags));
    Value::Object(obj)
}

fn selector_json(obj: &mut Map<String, Value>, key: &str, net: &Option<IpNet>) {
    match net {
        None if key == "src" => {
            obj.insert("src".into(), json!("all"));
        }
        None => {}
        Some(n) => {
            obj.insert(key.into(), json!(n.addr().to_string()));
            if n.prefix_len() != n.max_prefix_len() {
                obj.insert(format!("{}len", key), json!(n.prefix_len()));
            }
        }
    }
}

fn rule_json(rule: &FakeRule) -> Value {
    let mut obj = Map::new();
    obj.insert("priority".into(), json!(rule.priority));
    selector_json(&mut obj, "src", &rule.from);
    selector_json(&mut obj, "dst", &rule.to);
    if let Some(mark) = &rule.fwmark {
        obj.insert("fwmark".into(), json!(mark));
    }
    if let Some(iif) = &rule.iif {
        obj.insert("iif".into(), json!(iif));
    }
    if let Some(oif) = &rule.oif {
        obj.insert("oif".into(), json!(oif));
    }
    obj.insert("table".into(), json!(rule.table));
    Value::Object(obj)
}

fn to_json(values: Vec<Value>) -> Answer {
    serde_json::to_string(&values).map_err(|e| (EXIT_ERROR, e.to_string()))
}

/// Keyword/value pairs after the positional part of a command
fn options<'a>(args: &'a [&'a str], flags: &[&str]) -> Result<Vec<(&'a str, &'a str)>, (i32, String)> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if flags.contains(&args[i]) {
            pairs.push((args[i], ""));
            i += 1;
        } else if let Some(value) = args.get(i + 1) {
            pairs.push((args[i], *value));
            i += 2;
        } else {
            return Err((
                EXIT_USAGE,
                format!("Command line is not complete. Try option \"{}\"", args[i]),
            ));
        }
    }
    Ok(pairs)
}

/// Interprets one `ip` command line against the state
fn interpret(state: &mut State, cmd: &str) -> Answer {
    let owned = tokenize(cmd);
    let tokens: Vec<&str> = owned.iter().map(String::as_str).collect();
    if tokens.first() != Some(&IP_CMD) {
        return fail(127, format!("sh: unsupported command: {}", cmd));
    }

    let mut namespace = "";
    let mut ipv6 = false;
    let mut json_out = false;
    let mut details = false;
    let mut i = 1;
    while let Some(opt) = tokens.get(i) {
        match *opt {
            "-n" => {
                namespace = tokens.get(i + 1).copied().unwrap_or_default();
                i += 2;
            }
            "-j" => {
                json_out = true;
                i += 1;
            }
            "-d" => {
                details = true;
                i += 1;
            }
            "-6" => {
                ipv6 = true;
                i += 1;
            }
            _ => break,
        }
    }
    if state.ns(namespace).is_none() {
        return fail(
            EXIT_ERROR,
            format!(
                "Cannot open network namespace \"{}\": No such file or directory",
                namespace
            ),
        );
    }

    let object = tokens.get(i).copied().unwrap_or_default();
    let verb = tokens.get(i + 1).copied().unwrap_or_default();
    let args = tokens.get(i + 2..).unwrap_or_default();

    match (object, verb) {
        ("netns", "list") => netns_list(state),
        ("netns", "add") => netns_add(state, args.first().copied().unwrap_or_default()),
        ("netns", "del") | ("netns", "delete") => {
            netns_del(state, args.first().copied().unwrap_or_default())
        }
        ("link", "show") => link_show(state, namespace, json_out, details, args),
        ("link", "set") => link_set(state, namespace, args),
        ("link", "add") => link_add(state, namespace, args),
        ("link", "del") | ("link", "delete") => match args {
            ["dev", name] => state.delete_link(namespace, name),
            _ => fail(EXIT_USAGE, "Usage: ip link del dev DEVICE"),
        },
        ("address", "add") | ("address", "del") => address(state, namespace, verb, args),
        ("route", "show") => route_show(state, namespace, ipv6, args),
        ("route", "add") | ("route", "del") => route_change(state, namespace, verb, args),
        ("rule", "show") => rule_show(state, namespace, ipv6),
        ("rule", "add") | ("rule", "del") => rule_change(state, namespace, verb, ipv6, args),
        _ => fail(
            EXIT_USAGE,
            format!("Object \"{}\" is unknown, try \"ip help\".", object),
        ),
    }
}

fn netns_list(state: &State) -> Answer {
    let entries: Vec<Value> = state
        .namespaces
        .iter()
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, _)| json!({ "name": name }))
        .collect();
    if entries.is_empty() {
        return Ok(String::new());
    }
    to_json(entries)
}

fn netns_add(state: &mut State, name: &str) -> Answer {
    if name.is_empty() {
        return fail(EXIT_USAGE, "No netns name specified");
    }
    if state.ns(name).is_some() {
        return fail(
            EXIT_ERROR,
            format!(
                "Cannot create namespace file \"/var/run/netns/{}\": File exists",
                name
            ),
        );
    }
    state.create_namespace(name);
    Ok(String::new())
}

/// Physical links return to root; virtual ones are destroyed with the namespace
fn netns_del(state: &mut State, name: &str) -> Answer {
    let links: Vec<(String, LinkKind)> = match state.ns(name) {
        Some(ns) if !name.is_empty() => ns.links.iter().map(|l| (l.name.clone(), l.kind)).collect(),
        _ => {
            return fail(
                EXIT_ERROR,
                format!(
                    "Cannot remove namespace file \"/var/run/netns/{}\": No such file or directory",
                    name
                ),
            )
        }
    };
    for (link, kind) in links {
        match kind {
            LinkKind::Loopback => {}
            LinkKind::Physical => {
                if state.move_link(name, &link, "").is_err() {
                    state.take_link(name, &link);
                }
            }
            LinkKind::Veth(_) | LinkKind::Bridge => {
                let _ = state.delete_link(name, &link);
            }
        }
    }
    state.namespaces.retain(|(n, _)| n != name);
    Ok(String::new())
}

fn link_show(
    state: &State,
    namespace: &str,
    json_out: bool,
    details: bool,
    args: &[&str],
) -> Answer {
    let ns = match state.ns(namespace) {
        Some(ns) => ns,
        None => return no_device(namespace),
    };
    let render = |link: &Link| link_json(link, details);
    match args {
        [] => to_json(ns.links.iter().map(render).collect()),
        ["dev", name] => match ns.link(name) {
            Some(link) if json_out => to_json(vec![render(link)]),
            Some(link) => Ok(format!(
                "{}: {}: <{}> mtu {}",
                link.ifindex,
                link.name,
                if link.up { "UP" } else { "DOWN" },
                link.mtu
            )),
            None => fail(EXIT_ERROR, format!("Device \"{}\" does not exist.", name)),
        },
        ["master", bridge] => {
            if ns.link(bridge).is_none() {
                return fail(EXIT_ERROR, format!("Device \"{}\" does not exist.", bridge));
            }
            to_json(
                ns.links
                    .iter()
                    .filter(|l| l.master.as_deref() == Some(*bridge))
                    .map(render)
                    .collect(),
            )
        }
        _ => fail(EXIT_USAGE, "Usage: ip link show [ dev DEVICE ] [ master DEVICE ]"),
    }
}

fn link_set(state: &mut State, namespace: &str, args: &[&str]) -> Answer {
    let (name, rest) = match args {
        ["dev", name, rest @ ..] => (*name, rest),
        _ => return fail(EXIT_USAGE, "Not enough information: \"dev\" argument is required."),
    };
    if state.ns(namespace).and_then(|ns| ns.link(name)).is_none() {
        return no_device(name);
    }

    let pairs = options(rest, &["up", "down", "nomaster"])?;
    let mut target = None;
    for (keyword, value) in pairs {
        match keyword {
            "netns" => target = Some(value),
            "master" => {
                let is_bridge = state
                    .ns(namespace)
                    .and_then(|ns| ns.link(value))
                    .map(|l| l.kind == LinkKind::Bridge);
                match is_bridge {
                    Some(true) => {}
                    Some(false) => {
                        return fail(EXIT_RTNETLINK, "RTNETLINK answers: Operation not supported")
                    }
                    None => return no_device(value),
                }
            }
            "mtu" | "txqueuelen" | "rxqueuelen" => {
                if value.parse::<u32>().is_err() {
                    return fail(EXIT_USAGE, format!("Error: argument \"{}\" is wrong: Invalid \"{}\" value", value, keyword));
                }
            }
            _ => {}
        }
    }

    let pairs = options(rest, &["up", "down", "nomaster"])?;
    if let Some(link) = state.ns_mut(namespace).and_then(|ns| ns.link_mut(name)) {
        for (keyword, value) in pairs {
            match keyword {
                "up" => link.up = true,
                "down" => link.up = false,
                "nomaster" => link.master = None,
                "master" => link.master = Some(value.to_string()),
                "mtu" => link.mtu = value.parse().unwrap_or(link.mtu),
                "netns" => {}
                other => link.settings.push(format!("{} {}", other, value).trim().to_string()),
            }
        }
    }

    match target {
        Some(ROOT_NETNS_PID) => state.move_link(namespace, name, ""),
        Some(target) => state.move_link(namespace, name, target),
        None => Ok(String::new()),
    }
}

fn link_add(state: &mut State, namespace: &str, args: &[&str]) -> Answer {
    match args {
        [host, "type", "veth", "peer", "name", peer] => {
            let exists = state
                .ns(namespace)
                .map(|ns| ns.link(host).is_some() || ns.link(peer).is_some())
                .unwrap_or(false);
            if exists || host == peer {
                return file_exists();
            }
            state.next_pair += 1;
            let pair = LinkKind::Veth(state.next_pair);
            let a = state.new_link(host, pair);
            let b = state.new_link(peer, pair);
            if let Some(ns) = state.ns_mut(namespace) {
                ns.links.push(a);
                ns.links.push(b);
            }
            Ok(String::new())
        }
        ["name", name, "type", "bridge"] => {
            if state.ns(namespace).and_then(|ns| ns.link(name)).is_some() {
                return file_exists();
            }
            let bridge = state.new_link(name, LinkKind::Bridge);
            if let Some(ns) = state.ns_mut(namespace) {
                ns.links.push(bridge);
            }
            Ok(String::new())
        }
        _ => fail(EXIT_USAGE, "Unsupported link type"),
    }
}

fn address(state: &mut State, namespace: &str, verb: &str, args: &[&str]) -> Answer {
    let (cidr, name) = match args {
        [cidr, "dev", name] => (*cidr, *name),
        _ => return fail(EXIT_USAGE, "Usage: ip address {add|del} IFADDR dev IFNAME"),
    };
    let net: IpNet = match cidr.parse() {
        Ok(net) => net,
        Err(_) => {
            return fail(
                EXIT_ERROR,
                format!("Error: any valid prefix is expected rather than \"{}\".", cidr),
            )
        }
    };
    let link = match state.ns_mut(namespace).and_then(|ns| ns.link_mut(name)) {
        Some(link) => link,
        None => return no_device(name),
    };
    let present = link.addresses.contains(&net);
    match (verb, present) {
        ("add", true) => file_exists(),
        ("add", false) => {
            link.addresses.push(net);
            Ok(String::new())
        }
        (_, true) => {
            link.addresses.retain(|a| *a != net);
            Ok(String::new())
        }
        (_, false) => fail(
            EXIT_RTNETLINK,
            "RTNETLINK answers: Cannot assign requested address",
        ),
    }
}

fn route_show(state: &State, namespace: &str, ipv6: bool, args: &[&str]) -> Answer {
    let table = match args {
        [] => "main".to_string(),
        ["table", table] => canonical_table(table),
        _ => return fail(EXIT_USAGE, "Usage: ip route show [ table TABLE ]"),
    };
    let ns = match state.ns(namespace) {
        Some(ns) => ns,
        None => return Ok(String::new()),
    };
    to_json(
        ns.routes
            .iter()
            .filter(|r| r.table == table && r.ipv6 == ipv6)
            .map(route_json)
            .collect(),
    )
}

fn route_change(state: &mut State, namespace: &str, verb: &str, args: &[&str]) -> Answer {
    let (dst, rest) = match args {
        [dst, rest @ ..] => (*dst, rest),
        _ => return fail(EXIT_USAGE, "Usage: ip route {add|del} ROUTE"),
    };
    let dst_net = parse_prefix(dst)?;
    let mut via = None;
    let mut dev = None;
    let mut table = "main".to_string();
    let mut metric = None;
    let mut onlink = false;
    for (keyword, value) in options(rest, &["onlink"])? {
        match keyword {
            "via" => via = Some(value),
            "dev" => dev = Some(value.to_string()),
            "table" => table = canonical_table(value),
            "metric" | "priority" => {
                metric = Some(value.parse::<u32>().map_err(|_| {
                    (EXIT_USAGE, format!("Error: \"metric\" value is invalid: {}", value))
                })?)
            }
            "onlink" => onlink = true,
            _ => {}
        }
    }
    let gateway = match via {
        Some(gw) => match gw.parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => return fail(EXIT_ERROR, format!("Error: inet address is expected rather than \"{}\".", gw)),
        },
        None => None,
    };
    let ipv6 = dst.contains(':') || gateway.map(|g| g.is_ipv6()).unwrap_or(false);
    let dst = display_dst(&dst_net);

    let ns = match state.ns_mut(namespace) {
        Some(ns) => ns,
        None => return Ok(String::new()),
    };

    if verb == "del" {
        let pos = ns.routes.iter().position(|r| {
            r.dst == dst
                && r.table == table
                && r.ipv6 == ipv6
                && gateway.map_or(true, |g| r.gateway.as_deref() == Some(g.to_string().as_str()))
                && dev.as_ref().map_or(true, |d| r.dev.as_ref() == Some(d))
                && metric.map_or(true, |m| r.metric == m)
        });
        return match pos {
            Some(pos) => {
                ns.routes.remove(pos);
                Ok(String::new())
            }
            None => fail(EXIT_RTNETLINK, "RTNETLINK answers: No such process"),
        };
    }

    if let Some(d) = &dev {
        if ns.link(d).is_none() {
            return no_device(d);
        }
    }
    if let Some(gw) = gateway {
        if onlink {
            match dev.as_deref().and_then(|d| ns.link(d)) {
                None => return fail(EXIT_RTNETLINK, "Error: Nexthop device required for onlink."),
                Some(link) if !link.up => {
                    return fail(EXIT_RTNETLINK, "Error: Nexthop device is not up.")
                }
                Some(_) => {}
            }
        } else {
            let connected = ns
                .links
                .iter()
                .filter(|l| dev.as_ref().map_or(true, |d| &l.name == d))
                .find(|l| l.addresses.iter().any(|a| a.contains(&gw)))
                .map(|l| l.name.clone());
            match connected {
                Some(name) => {
                    if dev.is_none() {
                        dev = Some(name);
                    }
                }
                None => return fail(EXIT_RTNETLINK, "Error: Nexthop has invalid gateway."),
            }
        }
    }

    let metric = metric.unwrap_or(0);
    if ns
        .routes
        .iter()
        .any(|r| r.dst == dst && r.table == table && r.metric == metric && r.ipv6 == ipv6)
    {
        return file_exists();
    }
    ns.routes.push(FakeRoute {
        dst,
        gateway: gateway.map(|g| g.to_string()),
        dev,
        table,
        metric,
        onlink,
        ipv6,
    });
    Ok(String::new())
}

fn rule_show(state: &State, namespace: &str, ipv6: bool) -> Answer {
    let ns = match state.ns(namespace) {
        Some(ns) => ns,
        None => return Ok(String::new()),
    };
    let mut rules: Vec<&FakeRule> = ns.rules.iter().filter(|r| r.ipv6 == ipv6).collect();
    rules.sort_by_key(|r| r.priority);
    to_json(rules.into_iter().map(rule_json).collect())
}

fn rule_change(
    state: &mut State,
    namespace: &str,
    verb: &str,
    family_v6: bool,
    args: &[&str],
) -> Answer {
    let mut from = None;
    let mut to = None;
    let mut table = None;
    let mut priority = None;
    let mut fwmark = None;
    let mut iif = None;
    let mut oif = None;
    for (keyword, value) in options(args, &[])? {
        match keyword {
            "from" => from = parse_prefix(value)?,
            "to" => to = parse_prefix(value)?,
            "table" | "lookup" => table = Some(canonical_table(value)),
            "priority" | "pref" | "preference" => {
                priority = Some(value.parse::<u32>().map_err(|_| {
                    (EXIT_USAGE, format!("Error: argument \"{}\" is wrong: preference value is invalid", value))
                })?)
            }
            "fwmark" => fwmark = Some(canonical_fwmark(value)),
            "iif" => iif = Some(value.to_string()),
            "oif" => oif = Some(value.to_string()),
            other => return fail(EXIT_USAGE, format!("Error: argument \"{}\" is wrong", other)),
        }
    }
    let ipv6 = family_v6
        || from.map(|n| matches!(n, IpNet::V6(_))).unwrap_or(false)
        || to.map(|n| matches!(n, IpNet::V6(_))).unwrap_or(false);

    let ns = match state.ns_mut(namespace) {
        Some(ns) => ns,
        None => return Ok(String::new()),
    };

    if verb == "del" {
        let pos = ns.rules.iter().position(|r| {
            r.ipv6 == ipv6
                && (from.is_none() || r.from == from)
                && (to.is_none() || r.to == to)
                && table.as_ref().map_or(true, |t| &r.table == t)
                && priority.map_or(true, |p| r.priority == p)
                && fwmark.as_ref().map_or(true, |m| r.fwmark.as_ref() == Some(m))
                && iif.as_ref().map_or(true, |i| r.iif.as_ref() == Some(i))
                && oif.as_ref().map_or(true, |o| r.oif.as_ref() == Some(o))
        });
        return match pos {
            Some(pos) => {
                ns.rules.remove(pos);
                Ok(String::new())
            }
            None => fail(EXIT_RTNETLINK, "RTNETLINK answers: No such file or directory"),
        };
    }

    let priority = priority.unwrap_or_else(|| {
        ns.rules
            .iter()
            .filter(|r| r.ipv6 == ipv6 && r.priority > 0)
            .map(|r| r.priority)
            .min()
            .map_or(0, |p| p - 1)
    });
    let rule = FakeRule {
        priority,
        from,
        to,
        table: table.unwrap_or_else(|| "main".to_string()),
        fwmark,
        iif,
        oif,
        ipv6,
    };
    if ns.rules.contains(&rule) {
        return file_exists();
    }
    ns.rules.push(rule);
    Ok(String::new())
}

/// In-memory [`NetworkState`] for tests
#[derive(Debug)]
pub struct FakeKernel {
    state: Mutex<State>,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    /// A kernel with only the root namespace and its loopback device
    pub fn new() -> Self {
        let mut state = State::default();
        state.create_namespace("");
        Self {
            state: Mutex::new(state),
        }
    }

    /// Create a namespace directly, without recording a call
    pub fn add_namespace(&self, name: &str) {
        let mut state = self.state.lock();
        if state.ns(name).is_none() {
            state.create_namespace(name);
        }
    }

    /// Add a physical interface, creating its namespace if needed
    pub fn add_physical(&self, name: &str, namespace: &str) {
        let mut state = self.state.lock();
        if state.ns(namespace).is_none() {
            state.create_namespace(namespace);
        }
        let link = state.new_link(name, LinkKind::Physical);
        if let Some(ns) = state.ns_mut(namespace) {
            ns.links.push(link);
        }
    }

    /// Bind an address directly
    pub fn add_address(&self, iface: &str, namespace: &str, cidr: &str) {
        let mut state = self.state.lock();
        if let (Ok(net), Some(link)) = (
            cidr.parse::<IpNet>(),
            state.ns_mut(namespace).and_then(|ns| ns.link_mut(iface)),
        ) {
            link.addresses.push(net);
        }
    }

    /// Set a link administratively up directly
    pub fn set_up(&self, iface: &str, namespace: &str) {
        if let Some(link) = self
            .state
            .lock()
            .ns_mut(namespace)
            .and_then(|ns| ns.link_mut(iface))
        {
            link.up = true;
        }
    }

    /// Fail every later mutation whose command line contains `pattern`
    pub fn fail_when(&self, pattern: &str) {
        self.state.lock().failures.push(pattern.to_string());
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        !name.is_empty() && self.state.lock().ns(name).is_some()
    }

    /// Non-root namespace names in creation order
    pub fn namespaces(&self) -> Vec<String> {
        self.state
            .lock()
            .namespaces
            .iter()
            .filter(|(n, _)| !n.is_empty())
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn link_exists(&self, name: &str, namespace: &str) -> bool {
        self.state
            .lock()
            .ns(namespace)
            .and_then(|ns| ns.link(name))
            .is_some()
    }

    /// Link names in a namespace, loopback included
    pub fn links(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .ns(namespace)
            .map(|ns| ns.links.iter().map(|l| l.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_up(&self, name: &str, namespace: &str) -> bool {
        self.state
            .lock()
            .ns(namespace)
            .and_then(|ns| ns.link(name))
            .map(|l| l.up)
            .unwrap_or(false)
    }

    pub fn mtu(&self, name: &str, namespace: &str) -> Option<u32> {
        self.state
            .lock()
            .ns(namespace)
            .and_then(|ns| ns.link(name))
            .map(|l| l.mtu)
    }

    pub fn master_of(&self, name: &str, namespace: &str) -> Option<String> {
        self.state
            .lock()
            .ns(namespace)
            .and_then(|ns| ns.link(name))
            .and_then(|l| l.master.clone())
    }

    /// Settings other than state, MTU and master (`promisc on`, `txqueuelen 2000`)
    pub fn settings(&self, name: &str, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .ns(namespace)
            .and_then(|ns| ns.link(name))
            .map(|l| l.settings.clone())
            .unwrap_or_default()
    }

    /// Addresses bound to an interface, as `addr/len`
    pub fn addresses(&self, name: &str, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .ns(namespace)
            .and_then(|ns| ns.link(name))
            .map(|l| l.addresses.iter().map(IpNet::to_string).collect())
            .unwrap_or_default()
    }

    /// Routes of one table (`main`, `254`, `100`, ...)
    pub fn routes(&self, namespace: &str, table: &str) -> Vec<FakeRoute> {
        let table = canonical_table(table);
        self.state
            .lock()
            .ns(namespace)
            .map(|ns| ns.routes.iter().filter(|r| r.table == table).cloned().collect())
            .unwrap_or_default()
    }

    /// Every policy rule of a namespace, both families, built-ins included
    pub fn rules(&self, namespace: &str) -> Vec<FakeRule> {
        self.state
            .lock()
            .ns(namespace)
            .map(|ns| ns.rules.clone())
            .unwrap_or_default()
    }

    /// Every command received, probes and mutations, in order
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Mutating commands received, in order
    pub fn mutations(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.mutation)
            .map(|c| c.command.clone())
            .collect()
    }

    pub fn mutations_matching(&self, pattern: &str) -> Vec<String> {
        self.mutations()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    /// Forget recorded calls; kernel state is kept
    pub fn clear_commands(&self) {
        self.state.lock().calls.clear();
    }

    /// Verifier over the mutations recorded so far
    pub fn verifier(&self) -> CommandVerifier {
        CommandVerifier::new(self.mutations())
    }

    fn run(&self, cmd: &str, mutation: bool) -> ExecResult {
        let mut state = self.state.lock();
        state.calls.push(Call {
            mutation,
            command: cmd.to_string(),
        });

        if mutation && state.failures.iter().any(|p| cmd.contains(p.as_str())) {
            debug!(command = %cmd, "Injected failure");
            return ExecResult::failed(
                EXIT_RTNETLINK,
                "RTNETLINK answers: Operation not permitted",
            );
        }

        match interpret(&mut state, cmd) {
            Ok(stdout) => ExecResult::ok(stdout),
            Err((code, stderr)) => ExecResult::failed(code, stderr),
        }
    }
}

#[async_trait]
impl NetworkState for FakeKernel {
    async fn query(&self, cmd: &str) -> CfgMgrResult<ExecResult> {
        Ok(self.run(cmd, false))
    }

    async fn apply(&self, cmd: &str) -> CfgMgrResult<ExecResult> {
        Ok(self.run(cmd, true))
    }
}
