//! Structured parsing of `-S PREROUTING` output.
//!
//! Each save-format line is turned into a [`RedirectRule`] when, and only
//! when, it has exactly the shape this tool installs: a UDP destination-port
//! match jumping to `REDIRECT` with a single `--to-ports` value. Comparison
//! then happens on the parsed values, so cosmetic differences in the
//! controller's output (an implicit `-m udp`, `443` printed for `443:443`,
//! option order) do not matter.
//!
//! Lines carrying anything else (input interface, source or destination
//! match, negation, other targets) are not managed rules and yield `None`.

use crate::tables::{actions, rule_opts, PREROUTING_CHAIN, REDIRECT_TARGET};
use crate::types::{AddressFamily, PortRange, Protocol, RedirectRule};

/// Parses every managed-shape redirect rule out of a chain listing.
pub fn parse_listing(output: &str, family: AddressFamily) -> Vec<RedirectRule> {
    output
        .lines()
        .filter_map(|line| parse_rule_line(line, family))
        .collect()
}

/// Parses one save-format line, e.g.
/// `-A PREROUTING -p udp -m udp --dport 35000:36000 -j REDIRECT --to-ports 443`.
pub fn parse_rule_line(line: &str, family: AddressFamily) -> Option<RedirectRule> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != actions::APPEND || tokens.next()? != PREROUTING_CHAIN {
        return None;
    }

    let mut protocol = None;
    let mut ports = None;
    let mut redirect = false;
    let mut target_port = None;

    while let Some(opt) = tokens.next() {
        let value = tokens.next()?;
        match opt {
            rule_opts::PROTOCOL => protocol = parse_protocol(value),
            // Protocol match modules are implied by -p
            rule_opts::MATCH if value == "udp" => {}
            rule_opts::DPORT => ports = Some(value.parse::<PortRange>().ok()?),
            rule_opts::JUMP => redirect = value == REDIRECT_TARGET,
            rule_opts::TO_PORTS => target_port = Some(parse_to_ports(value)?),
            _ => return None,
        }
    }

    if !redirect {
        return None;
    }

    RedirectRule::udp(family, ports?, target_port?)
        .ok()
        .filter(|rule| protocol == Some(rule.protocol))
}

fn parse_protocol(value: &str) -> Option<Protocol> {
    match value {
        "udp" | "17" => Some(Protocol::Udp),
        _ => None,
    }
}

/// `--to-ports` takes `N` or `N-M`; only a single port is a managed rule.
fn parse_to_ports(value: &str) -> Option<u16> {
    match value.split_once('-') {
        Some((start, end)) if start == end => start.parse().ok(),
        Some(_) => None,
        None => value.parse().ok(),
    }
}
