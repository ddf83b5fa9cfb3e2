//! Test infrastructure for the hy2 firewall tooling
//!
//! Provides:
//! - A stateful fake packet-filter executor ([`FakeNetfilter`])
//! - Fixtures for rule specs and os-release files
//! - Rule-set and command verification helpers

pub mod fake;
pub mod fixtures;
mod verification;

pub use fake::{Family, FakeNetfilter};
pub use fixtures::*;
pub use verification::*;
