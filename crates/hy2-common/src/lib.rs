//! Shared infrastructure for the hy2 firewall tooling.
//!
//! - [`shell`]: shell command execution behind the [`CommandExecutor`] seam
//! - [`platform`]: host distribution, package manager, init system and
//!   persistence backend detection
//! - [`error`]: error types for both
//!
//! # Example
//!
//! ```ignore
//! use hy2_common::{
//!     shell::{self, IPTABLES_CMD, shellquote},
//!     Hy2Result,
//! };
//!
//! async fn list_prerouting() -> Hy2Result<Option<String>> {
//!     let cmd = format!("{} -t nat -S PREROUTING", shellquote(IPTABLES_CMD));
//!     let result = shell::exec(&cmd).await?;
//!     Ok(result.success().then_some(result.stdout))
//! }
//! ```

pub mod error;
pub mod platform;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{Hy2Error, Hy2Result};
pub use platform::{InitSystem, OsFamily, PackageManager, PersistenceBackend, Platform};
pub use shell::{CommandExecutor, ExecResult, ShellExecutor};
