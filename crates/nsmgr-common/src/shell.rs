//! Control-interface adapter and shell command execution.
//!
//! Every command nsmgr issues is an `ip` invocation built from the prefix
//! returned by [`ip_cmd`], with all user-supplied values passed through
//! [`shellquote`] before the line is handed to `/bin/sh -c`.
//!
//! # Example
//!
//! ```ignore
//! use nsmgr_common::shell::{self, ip_cmd, shellquote};
//!
//! let cmd = format!("{} link set dev {} up", ip_cmd("ns1"), shellquote("veth1"));
//! let result = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{CfgMgrError, CfgMgrResult};

/// Path to the `ip` command for network interface configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// `netns` target that names the root namespace (the namespace of PID 1).
pub const ROOT_NETNS_PID: &str = "1";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Wraps the string in double quotes and escapes `$`, `` ` ``, `"`, `\`
/// and newline.
///
/// # Example
///
/// ```
/// use nsmgr_common::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Returns the `ip` invocation prefix scoped to `namespace`.
///
/// An empty namespace targets the root namespace. The namespace is not
/// checked for existence.
///
/// ```
/// use nsmgr_common::shell::ip_cmd;
///
/// assert_eq!(ip_cmd(""), "/sbin/ip");
/// assert_eq!(ip_cmd("ns1"), "/sbin/ip -n \"ns1\"");
/// ```
pub fn ip_cmd(namespace: &str) -> String {
    if namespace.is_empty() {
        IP_CMD.to_string()
    } else {
        format!("{} -n {}", IP_CMD, shellquote(namespace))
    }
}

/// Same as [`ip_cmd`], with JSON output requested.
pub fn ip_json_cmd(namespace: &str) -> String {
    format!("{} -j", ip_cmd(namespace))
}

/// Result of a shell command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The combined stdout output.
    pub stdout: String,
    /// The combined stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Creates a successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Creates a failed result with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Converts a non-zero exit into [`CfgMgrError::ShellCommandFailed`].
    pub fn into_stdout(self, cmd: &str) -> CfgMgrResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(CfgMgrError::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: self.exit_code,
                output: self.combined_output(),
            })
        }
    }
}

/// Executes a shell command asynchronously.
///
/// The command runs through `/bin/sh -c`. A non-zero exit is not an error
/// here; only a failure to spawn is.
pub async fn exec(cmd: &str) -> CfgMgrResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CfgMgrError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::debug!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command exited non-zero"
        );
    }

    Ok(result)
}

/// Executes a shell command and fails on non-zero exit.
///
/// # Returns
///
/// * `Ok(String)` - The stdout output on success
/// * `Err(CfgMgrError)` - If the command fails or returns non-zero
pub async fn exec_or_throw(cmd: &str) -> CfgMgrResult<String> {
    exec(cmd).await?.into_stdout(cmd)
}
