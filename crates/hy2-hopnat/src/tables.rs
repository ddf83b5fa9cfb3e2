//! Table, chain and option name constants for NAT redirect rules

/// Packet-filter table holding the redirects
pub const NAT_TABLE: &str = "nat";

/// Chain evaluated before the routing decision
pub const PREROUTING_CHAIN: &str = "PREROUTING";

/// Jump target rewriting the destination port to a local port
pub const REDIRECT_TARGET: &str = "REDIRECT";

/// Upper bound on check-and-delete rounds in one removal
pub const DEFAULT_MAX_DELETE_ITERATIONS: u32 = 50;

/// Controller actions
pub mod actions {
    pub const APPEND: &str = "-A";
    pub const CHECK: &str = "-C";
    pub const DELETE: &str = "-D";
    pub const LIST_RULES: &str = "-S";
    pub const LIST: &str = "-L";
    pub const TABLE: &str = "-t";
    pub const NUMERIC: &str = "-n";
}

/// Rule specification options
pub mod rule_opts {
    pub const PROTOCOL: &str = "-p";
    pub const MATCH: &str = "-m";
    pub const DPORT: &str = "--dport";
    pub const JUMP: &str = "-j";
    pub const TO_PORTS: &str = "--to-ports";
}

/// Diagnostics meaning the IPv6 NAT table cannot be used on this kernel
pub const NAT_UNAVAILABLE_MARKERS: &[&str] = &[
    "table does not exist",
    "can't initialize",
    "could not fetch rule set",
    "protocol not supported",
];
