//! Configuration document key constants for nsmgrd

/// Environment variable selecting the configuration file
pub const CONFIG_ENV: &str = "NSMGR_CONFIG";

/// Configuration file used when neither the flag nor the variable is set
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nsmgr/network.yaml";

/// Top-level key holding every section
pub const NETWORK_KEY: &str = "network";

/// Section names
pub mod sections {
    /// Interfaces to place into namespaces
    pub const INTERFACES: &str = "interfaces";

    /// Veth pairs
    pub const VETHS: &str = "veths";

    /// Bridges and their members
    pub const BRIDGES: &str = "bridges";

    /// Address bindings
    pub const ADDRESSES: &str = "addresses";

    /// Interface parameter sets
    pub const IFACE_PARAMS: &str = "iface-params";

    /// Routes
    pub const ROUTES: &str = "routes";

    /// Routing policy rules
    pub const ROUTING_POLICY: &str = "routing-policy";

    pub const ALL: [&str; 7] = [
        INTERFACES,
        VETHS,
        BRIDGES,
        ADDRESSES,
        IFACE_PARAMS,
        ROUTES,
        ROUTING_POLICY,
    ];
}
