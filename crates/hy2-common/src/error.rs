//! Error types for shell execution and platform detection.

use std::io;
use thiserror::Error;

/// Result type alias for hy2-common operations.
pub type Hy2Result<T> = Result<T, Hy2Error>;

/// Errors raised before a command's exit status is even known, or while
/// reading host facts.
///
/// A command that ran and exited non-zero is not an error at this layer;
/// callers inspect [`ExecResult`](crate::ExecResult) and decide.
#[derive(Debug, Error)]
pub enum Hy2Error {
    /// The shell could not be spawned.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Host files could not be read or interpreted.
    #[error("Platform detection failed: {message}")]
    Platform { message: String },
}

impl Hy2Error {
    /// Creates a platform detection error.
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}
