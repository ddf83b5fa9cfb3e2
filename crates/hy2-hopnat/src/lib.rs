//! hopnat - UDP port-hopping redirect manager for Hysteria 2 servers
//!
//! Maintains NAT PREROUTING REDIRECT rules that fold a UDP port range onto
//! the server's listening port, handling:
//! - Idempotent install and removal per address family
//! - IPv6 NAT capability probing with graceful IPv4-only fallback
//! - Structured parsing of the live rule listing
//! - Best-effort persistence through the host's native mechanism

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod listing;
pub mod persistence;
pub mod redirect_mgr;
pub mod report;
pub mod tables;
pub mod types;

pub use config::HopNatConfig;
pub use context::NatContext;
pub use error::{HopNatError, HopNatResult};
pub use redirect_mgr::RedirectMgr;
pub use report::{FamilyOutcome, PersistOutcome, RedirectReport, RuleChange, SkipReason};
pub use types::{AddressFamily, PortRange, Protocol, RedirectRule};
