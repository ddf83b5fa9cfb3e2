//! Explicit per-invocation firewall context

use hy2_common::shell::{IP6TABLES_CMD, IPTABLES_CMD};
use hy2_common::{PersistenceBackend, Platform};

use crate::tables::DEFAULT_MAX_DELETE_ITERATIONS;
use crate::types::AddressFamily;

/// Which controllers and persistence backend apply on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatContext {
    /// IPv4 packet-filter controller
    pub iptables_cmd: String,
    /// IPv6 packet-filter controller
    pub ip6tables_cmd: String,
    pub persistence: PersistenceBackend,
    /// Bound on check-and-delete rounds per removal
    pub max_delete_iterations: u32,
    /// When false, IPv6 is skipped without probing
    pub ipv6_enabled: bool,
}

impl Default for NatContext {
    fn default() -> Self {
        Self {
            iptables_cmd: IPTABLES_CMD.to_string(),
            ip6tables_cmd: IP6TABLES_CMD.to_string(),
            persistence: PersistenceBackend::None,
            max_delete_iterations: DEFAULT_MAX_DELETE_ITERATIONS,
            ipv6_enabled: true,
        }
    }
}

impl NatContext {
    /// Default controllers with the platform's persistence backend
    pub fn for_platform(platform: &Platform) -> Self {
        Self {
            persistence: platform.persistence.clone(),
            ..Self::default()
        }
    }

    pub fn with_persistence(mut self, persistence: PersistenceBackend) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_max_delete_iterations(mut self, iterations: u32) -> Self {
        self.max_delete_iterations = iterations;
        self
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.ipv6_enabled = enabled;
        self
    }

    /// Controller binary for `family`
    pub fn controller(&self, family: AddressFamily) -> &str {
        match family {
            AddressFamily::Ipv4 => &self.iptables_cmd,
            AddressFamily::Ipv6 => &self.ip6tables_cmd,
        }
    }
}
