//! Redirect rule type definitions

use std::fmt;
use std::str::FromStr;

use crate::error::HopNatError;
use crate::tables::{rule_opts, REDIRECT_TARGET};

/// Transport protocol matched by a redirect rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
        }
    }
}

/// Address family, each with its own packet-filter controller and NAT table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Both families, IPv4 first
    pub const ALL: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "IPv4",
            AddressFamily::Ipv6 => "IPv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive destination port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: u16, end: u16) -> Result<Self, HopNatError> {
        if start > end {
            return Err(HopNatError::invalid_rule(format!(
                "port range start {} is greater than end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Range covering exactly one port
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }
}

/// Always renders `start:end`, including single-port ranges (`443:443`)
impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Accepts `N`, `N:M` and `N-M`
impl FromStr for PortRange {
    type Err = HopNatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_port = |p: &str| {
            p.trim().parse::<u16>().map_err(|_| {
                HopNatError::invalid_rule(format!("invalid port '{}' in range '{}'", p, s))
            })
        };

        match s.split_once([':', '-']) {
            Some((start, end)) => PortRange::new(parse_port(start)?, parse_port(end)?),
            None => Ok(PortRange::single(parse_port(s)?)),
        }
    }
}

/// UDP port-range to single-port REDIRECT rule in NAT PREROUTING
///
/// Two rules are the same rule iff every field matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedirectRule {
    pub protocol: Protocol,
    pub family: AddressFamily,
    pub ports: PortRange,
    pub target_port: u16,
}

impl RedirectRule {
    /// Create a UDP redirect rule, rejecting a zero target port
    pub fn udp(
        family: AddressFamily,
        ports: PortRange,
        target_port: u16,
    ) -> Result<Self, HopNatError> {
        if target_port == 0 {
            return Err(HopNatError::invalid_rule("target port must not be 0"));
        }
        Ok(Self {
            protocol: Protocol::Udp,
            family,
            ports,
            target_port,
        })
    }

    /// Same rule for another address family
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    /// Rule specification as passed to the packet-filter controller
    ///
    /// `-p udp --dport 35000:36000 -j REDIRECT --to-ports 443`
    pub fn spec(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {}",
            rule_opts::PROTOCOL,
            self.protocol.as_str(),
            rule_opts::DPORT,
            self.ports,
            rule_opts::JUMP,
            REDIRECT_TARGET,
            rule_opts::TO_PORTS,
            self.target_port
        )
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {}",
            self.family,
            self.protocol.as_str(),
            self.ports,
            self.target_port
        )
    }
}
