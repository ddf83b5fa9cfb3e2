//! Shell command execution.
//!
//! Firewall commands are assembled as strings and run through `/bin/sh -c`;
//! any caller-supplied fragment (binary names, file paths) goes through
//! [`shellquote`]. Code that runs commands is written against
//! [`CommandExecutor`] so tests can swap in a fake packet filter.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{Hy2Error, Hy2Result};

/// IPv4 packet-filter control command.
pub const IPTABLES_CMD: &str = "iptables";

/// IPv6 packet-filter control command.
pub const IP6TABLES_CMD: &str = "ip6tables";

/// Debian/Ubuntu rule persistence helper.
pub const NETFILTER_PERSISTENT_CMD: &str = "netfilter-persistent";

/// SysV-style service wrapper (RHEL family).
pub const SERVICE_CMD: &str = "service";

/// Directory holding init scripts on OpenRC/SysV hosts.
pub const INIT_D_DIR: &str = "/etc/init.d";

/// Exit status the shell reports when a command cannot be found.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// `$`, backtick, `"`, `\` and newline are live inside double quotes
static DQUOTE_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Wraps `s` in double quotes, escaping what the shell would interpret.
///
/// ```
/// use hy2_common::shell::shellquote;
///
/// assert_eq!(shellquote("/usr/sbin/iptables"), "\"/usr/sbin/iptables\"");
/// assert_eq!(shellquote("rules$1"), "\"rules\\$1\"");
/// ```
pub fn shellquote(s: &str) -> String {
    format!("\"{}\"", DQUOTE_SPECIAL.replace_all(s, r"\$1"))
}

/// Exit status and trimmed output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Exit 0 with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Non-zero exit with `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The shell could not find the program.
    pub fn is_command_not_found(&self) -> bool {
        self.exit_code == EXIT_COMMAND_NOT_FOUND
    }

    /// stdout and stderr joined by a newline, skipping whichever is empty.
    pub fn combined_output(&self) -> String {
        [self.stdout.as_str(), self.stderr.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs `cmd` under `/bin/sh -c`.
///
/// Only a spawn failure is an `Err`; a non-zero exit status is returned in
/// the [`ExecResult`] for the caller to classify.
pub async fn exec(cmd: &str) -> Hy2Result<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| Hy2Error::ShellExec {
            command: cmd.to_string(),
            source,
        })?;

    let result = ExecResult {
        // Killed by a signal
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::debug!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command returned non-zero"
        );
    }

    Ok(result)
}

/// Runs command strings on behalf of the firewall code.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `cmd` and returns its exit status and captured output.
    async fn exec(&self, cmd: &str) -> Hy2Result<ExecResult>;

    /// Returns true if `program` resolves on the executor's `PATH`.
    async fn command_exists(&self, program: &str) -> Hy2Result<bool> {
        let cmd = format!("command -v {} >/dev/null 2>&1", shellquote(program));
        Ok(self.exec(&cmd).await?.success())
    }
}

/// [`CommandExecutor`] backed by `/bin/sh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn exec(&self, cmd: &str) -> Hy2Result<ExecResult> {
        exec(cmd).await
    }
}
