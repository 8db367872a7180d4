//! Free-form link parameters parsed into typed options.
//!
//! `iface-params` entries may carry an `other` string such as
//! `"promisc on address 02:00:00:00:00:01"`. Keywords nsmgr knows become
//! typed [`LinkOption`]s; anything else is kept verbatim as
//! [`LinkOption::Raw`] so the full `ip link set` vocabulary stays reachable.

use std::fmt;

use nsmgr_common::shell::shellquote;
use nsmgr_common::{CfgMgrError, CfgMgrResult, Field};

const OPERATION: &str = "link set";

fn malformed(keyword: &str, message: impl Into<String>) -> CfgMgrError {
    CfgMgrError::invalid_argument(OPERATION, Field::Value, keyword, message)
}

/// One `ip link set` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOption {
    /// Link-layer address.
    Address(String),
    /// Interface alias.
    Alias(String),
    /// Device group.
    Group(String),
    /// Promiscuous mode.
    Promisc(bool),
    /// ARP on the interface.
    Arp(bool),
    /// Multicast flag.
    Multicast(bool),
    /// All-multicast flag.
    AllMulticast(bool),
    /// Passed through unchanged.
    Raw(String),
}

impl LinkOption {
    /// Renders the option as `ip link set` arguments.
    pub fn to_args(&self) -> String {
        match self {
            LinkOption::Address(v) => format!("address {}", shellquote(v)),
            LinkOption::Alias(v) => format!("alias {}", shellquote(v)),
            LinkOption::Group(v) => format!("group {}", shellquote(v)),
            LinkOption::Promisc(on) => format!("promisc {}", on_off(*on)),
            LinkOption::Arp(on) => format!("arp {}", on_off(*on)),
            LinkOption::Multicast(on) => format!("multicast {}", on_off(*on)),
            LinkOption::AllMulticast(on) => format!("allmulticast {}", on_off(*on)),
            LinkOption::Raw(token) => shellquote(token),
        }
    }
}

impl fmt::Display for LinkOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args())
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn parse_toggle(keyword: &str, value: Option<&str>) -> CfgMgrResult<bool> {
    match value {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        Some(other) => Err(malformed(
            keyword,
            format!("expected 'on' or 'off', got '{}'", other),
        )),
        None => Err(malformed(keyword, "missing 'on' or 'off'")),
    }
}

fn take_value<'a>(keyword: &str, value: Option<&'a str>) -> CfgMgrResult<&'a str> {
    value.ok_or_else(|| malformed(keyword, "missing value"))
}

/// Parses a whitespace-separated option string.
pub fn parse_link_options(params: &str) -> CfgMgrResult<Vec<LinkOption>> {
    let mut tokens = params.split_whitespace();
    let mut options = Vec::new();

    while let Some(keyword) = tokens.next() {
        let option = match keyword {
            "address" => LinkOption::Address(take_value(keyword, tokens.next())?.to_string()),
            "alias" => LinkOption::Alias(take_value(keyword, tokens.next())?.to_string()),
            "group" => LinkOption::Group(take_value(keyword, tokens.next())?.to_string()),
            "promisc" => LinkOption::Promisc(parse_toggle(keyword, tokens.next())?),
            "arp" => LinkOption::Arp(parse_toggle(keyword, tokens.next())?),
            "multicast" => LinkOption::Multicast(parse_toggle(keyword, tokens.next())?),
            "allmulticast" => LinkOption::AllMulticast(parse_toggle(keyword, tokens.next())?),
            other => LinkOption::Raw(other.to_string()),
        };
        options.push(option);
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmgr_common::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_known_options() {
        let options = parse_link_options("promisc on address 02:00:00:00:00:01 arp off").unwrap();
        assert_eq!(
            options,
            vec![
                LinkOption::Promisc(true),
                LinkOption::Address("02:00:00:00:00:01".to_string()),
                LinkOption::Arp(false),
            ]
        );
    }

    #[test]
    fn test_unknown_keywords_pass_through() {
        let options = parse_link_options("gso_max_size 65536").unwrap();
        assert_eq!(
            options,
            vec![
                LinkOption::Raw("gso_max_size".to_string()),
                LinkOption::Raw("65536".to_string()),
            ]
        );
        assert_eq!(options[0].to_args(), "\"gso_max_size\"");
    }

    #[test]
    fn test_bad_toggle_rejected() {
        let err = parse_link_options("promisc yes").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "invalid_argument");
        assert_eq!(
            err.to_string(),
            "link set: invalid value 'promisc': expected 'on' or 'off', got 'yes'"
        );
        assert!(parse_link_options("multicast").is_err());
        assert!(parse_link_options("alias").is_err());
    }

    #[test]
    fn test_to_args() {
        assert_eq!(LinkOption::AllMulticast(true).to_args(), "allmulticast on");
        assert_eq!(LinkOption::Alias("uplink".to_string()).to_args(), "alias \"uplink\"");
    }

    #[test]
    fn test_empty_string() {
        assert!(parse_link_options("   ").unwrap().is_empty());
    }
}
