//! Configuration file support for hopnat
//!
//! Loads and validates hopnat configuration from TOML files.
//! Default location: /etc/hopnat/hopnat.toml

use std::fs;
use std::path::Path;

use hy2_common::shell::{IP6TABLES_CMD, IPTABLES_CMD};
use hy2_common::{PersistenceBackend, Platform};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::NatContext;
use crate::error::{HopNatError, HopNatResult};
use crate::tables::DEFAULT_MAX_DELETE_ITERATIONS;
use crate::types::PortRange;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hopnat/hopnat.toml";

/// Packet-filter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// IPv4 controller binary
    #[serde(default = "default_iptables_cmd")]
    pub iptables_cmd: String,

    /// IPv6 controller binary
    #[serde(default = "default_ip6tables_cmd")]
    pub ip6tables_cmd: String,

    /// Bound on deletions per removal
    #[serde(default = "default_max_delete_iterations")]
    pub max_delete_iterations: u32,

    /// Manage IPv6 redirects when the kernel supports them
    #[serde(default = "default_ipv6")]
    pub ipv6: bool,

    /// Persistence backend override; detected from the platform when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<String>,
}

/// Port-hopping range and target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoppingConfig {
    /// First port of the hopping range
    #[serde(default = "default_start")]
    pub start: u16,

    /// Last port of the hopping range, inclusive
    #[serde(default = "default_end")]
    pub end: u16,

    /// Port the server listens on
    #[serde(default = "default_target")]
    pub target: u16,
}

/// Complete hopnat configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopNatConfig {
    #[serde(default)]
    pub firewall: FirewallConfig,

    #[serde(default)]
    pub hopping: HoppingConfig,
}

// Default functions
fn default_iptables_cmd() -> String {
    IPTABLES_CMD.to_string()
}

fn default_ip6tables_cmd() -> String {
    IP6TABLES_CMD.to_string()
}

fn default_max_delete_iterations() -> u32 {
    DEFAULT_MAX_DELETE_ITERATIONS
}

fn default_ipv6() -> bool {
    true
}

fn default_start() -> u16 {
    20000
}

fn default_end() -> u16 {
    50000
}

fn default_target() -> u16 {
    443
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            iptables_cmd: default_iptables_cmd(),
            ip6tables_cmd: default_ip6tables_cmd(),
            max_delete_iterations: default_max_delete_iterations(),
            ipv6: default_ipv6(),
            persistence: None,
        }
    }
}

impl Default for HoppingConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            target: default_target(),
        }
    }
}

impl HopNatConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> HopNatResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                HopNatError::config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(HopNatError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> HopNatResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| HopNatError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content).map_err(|e| {
            HopNatError::config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> HopNatResult<()> {
        if self.firewall.iptables_cmd.trim().is_empty()
            || self.firewall.ip6tables_cmd.trim().is_empty()
        {
            return Err(HopNatError::config("controller commands must not be empty"));
        }

        if self.firewall.max_delete_iterations == 0 {
            return Err(HopNatError::config("max_delete_iterations must be >= 1"));
        }

        if let Some(backend) = &self.firewall.persistence {
            backend
                .parse::<PersistenceBackend>()
                .map_err(|e| HopNatError::config(e.to_string()))?;
        }

        if self.hopping.start == 0 {
            return Err(HopNatError::config("hopping start port must be > 0"));
        }

        if self.hopping.start > self.hopping.end {
            return Err(HopNatError::config(format!(
                "hopping start {} is greater than end {}",
                self.hopping.start, self.hopping.end
            )));
        }

        if self.hopping.target == 0 {
            return Err(HopNatError::config("hopping target port must be > 0"));
        }

        Ok(())
    }

    /// Configured hopping range
    pub fn port_range(&self) -> HopNatResult<PortRange> {
        PortRange::new(self.hopping.start, self.hopping.end)
    }

    /// Build the firewall context for `platform`, applying file overrides
    pub fn nat_context(&self, platform: &Platform) -> HopNatResult<NatContext> {
        let persistence = match &self.firewall.persistence {
            Some(backend) => backend
                .parse::<PersistenceBackend>()
                .map_err(|e| HopNatError::config(e.to_string()))?,
            None => platform.persistence.clone(),
        };

        Ok(NatContext {
            iptables_cmd: self.firewall.iptables_cmd.clone(),
            ip6tables_cmd: self.firewall.ip6tables_cmd.clone(),
            persistence,
            max_delete_iterations: self.firewall.max_delete_iterations,
            ipv6_enabled: self.firewall.ipv6,
        })
    }
}
