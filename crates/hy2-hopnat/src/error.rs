//! Error types for NAT redirect management.
//!
//! Soft conditions (missing controller, unsupported IPv6 NAT, failed
//! persistence) have variants here so they can be reported uniformly, but
//! the manager only returns them from [`RedirectMgr::list`]; rule mutations
//! report them as skipped outcomes or warnings instead.
//!
//! [`RedirectMgr::list`]: crate::RedirectMgr::list

use hy2_common::Hy2Error;
use thiserror::Error;

use crate::types::AddressFamily;

/// Result type alias for redirect manager operations.
pub type HopNatResult<T> = Result<T, HopNatError>;

/// Errors that can occur while managing redirect rules.
#[derive(Debug, Error)]
pub enum HopNatError {
    /// Rule violates a precondition (range order, zero target port).
    #[error("Invalid redirect rule: {message}")]
    InvalidRule { message: String },

    /// Packet-filter controller binary is not installed.
    #[error("{family} controller '{command}' is not installed")]
    ControllerUnavailable {
        family: AddressFamily,
        command: String,
    },

    /// Kernel cannot use the IPv6 NAT table.
    #[error("IPv6 NAT table is not supported on this host")]
    CapabilityUnsupported,

    /// Listing the PREROUTING chain failed.
    #[error("Failed to list {family} NAT rules: '{command}' (exit code {exit_code}): {output}")]
    ListFailed {
        family: AddressFamily,
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Appending the redirect failed.
    #[error("Failed to insert {family} redirect: '{command}' (exit code {exit_code}): {output}")]
    InsertFailed {
        family: AddressFamily,
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Rule check failed for a reason other than "no match".
    #[error("Failed to check {family} redirect: '{command}' (exit code {exit_code}): {output}")]
    CheckFailed {
        family: AddressFamily,
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Deleting a matching redirect failed.
    #[error("Failed to delete {family} redirect: '{command}' (exit code {exit_code}): {output}")]
    DeleteFailed {
        family: AddressFamily,
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Delete loop did not converge within the configured bound.
    #[error("{rule} still present after {iterations} delete attempts")]
    ConvergenceExceeded { rule: String, iterations: u32 },

    /// Saving the rule set for reboot failed.
    #[error("Failed to persist {family} rules: {message}")]
    PersistenceFailed {
        family: AddressFamily,
        message: String,
    },

    /// Configuration file or override is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command could not be spawned at all.
    #[error(transparent)]
    Exec(#[from] Hy2Error),
}

impl HopNatError {
    /// Creates an invalid rule error.
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true for conditions reported as warnings rather than failures.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            HopNatError::ControllerUnavailable { .. }
                | HopNatError::CapabilityUnsupported
                | HopNatError::PersistenceFailed { .. }
        )
    }
}
