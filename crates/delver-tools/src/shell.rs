//! The guarded shell executor.
//!
//! A structurally separate command-execution path: nothing inside the
//! sandbox interpreter can reach it, only the runtime's synthetic shell
//! tool. Commands run under a prefix/pattern policy, confined to a
//! workspace root, with their own output ceiling and timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use delver_core::{ToolError, ToolErrorCode, truncate_bytes};

/// How strictly the first-token policy applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellPolicyMode {
    /// Only allowlisted command prefixes may run.
    #[default]
    Guarded,
    /// Any prefix runs unless blocked. Blocked prefixes and patterns
    /// still apply.
    Permissive,
}

/// Compiled shell policy.
#[derive(Clone, Debug)]
pub struct ShellPolicy {
    /// All commands run under this directory.
    pub workspace_root: PathBuf,
    /// Allowlist strictness.
    pub mode: ShellPolicyMode,
    /// Lowercased first-token allowlist (guarded mode).
    pub allowed_prefixes: Vec<String>,
    /// Lowercased first-token blocklist (every mode).
    pub blocked_prefixes: Vec<String>,
    /// Compiled command patterns refused in every mode.
    pub blocked_patterns: Vec<Regex>,
    /// Byte ceiling per captured stream.
    pub max_output_bytes: usize,
    /// Default command timeout.
    pub default_timeout: Duration,
}

impl ShellPolicy {
    /// Build a policy, compiling the blocked patterns.
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        mode: ShellPolicyMode,
        allowed_prefixes: &[String],
        blocked_prefixes: &[String],
        blocked_patterns: &[String],
        max_output_bytes: usize,
        default_timeout: Duration,
    ) -> Result<Self, ToolError> {
        let mut compiled = Vec::with_capacity(blocked_patterns.len());
        for pattern in blocked_patterns {
            let regex = Regex::new(pattern).map_err(|error| {
                ToolError::new(
                    ToolErrorCode::NotConfigured,
                    format!("invalid blocked command pattern '{pattern}': {error}"),
                )
            })?;
            compiled.push(regex);
        }
        Ok(Self {
            workspace_root: workspace_root.into(),
            mode,
            allowed_prefixes: allowed_prefixes.iter().map(|p| p.to_lowercase()).collect(),
            blocked_prefixes: blocked_prefixes.iter().map(|p| p.to_lowercase()).collect(),
            blocked_patterns: compiled,
            max_output_bytes,
            default_timeout,
        })
    }
}

/// Result of one shell command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellResult {
    /// The command as given.
    pub command: String,
    /// Process exit code (-1 when terminated by signal).
    pub exit_code: i32,
    /// Captured stdout, clamped.
    pub stdout: String,
    /// Captured stderr, clamped.
    pub stderr: String,
    /// Whether either stream was clamped.
    pub truncated: bool,
}

/// Runs external commands under a [`ShellPolicy`].
pub struct ShellExecutor {
    policy: ShellPolicy,
}

impl ShellExecutor {
    /// New executor over a compiled policy.
    #[must_use]
    pub fn new(policy: ShellPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &ShellPolicy {
        &self.policy
    }

    /// Run one command. Policy violations, timeouts, and launch failures
    /// come back as classified errors; a non-zero exit is a normal result.
    pub async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
        cwd: Option<&str>,
    ) -> Result<ShellResult, ToolError> {
        self.ensure_allowed(command)?;
        let resolved_cwd = self.resolve_cwd(cwd)?;
        let timeout = timeout.unwrap_or(self.policy.default_timeout).max(Duration::from_secs(1));

        let mut cmd = Command::new("/bin/sh");
        let _ = cmd
            .arg("-c")
            .arg(command)
            .current_dir(&resolved_cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|error| {
            ToolError::new(
                ToolErrorCode::ShellRuntimeError,
                format!("failed to launch command: {error}"),
            )
            .with_details(serde_json::json!({"command": command}))
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return Err(ToolError::new(
                    ToolErrorCode::ShellRuntimeError,
                    format!("failed to collect command output: {error}"),
                )
                .with_details(serde_json::json!({"command": command})));
            }
            // Dropping the wait future kills the child (kill_on_drop)
            Err(_elapsed) => {
                return Err(ToolError::new(
                    ToolErrorCode::Timeout,
                    format!("command timed out after {}s", timeout.as_secs()),
                )
                .with_details(serde_json::json!({"command": command})));
            }
        };

        let stdout_raw = String::from_utf8_lossy(&output.stdout);
        let stderr_raw = String::from_utf8_lossy(&output.stderr);
        let (stdout, out_cut) = truncate_bytes(&stdout_raw, self.policy.max_output_bytes);
        let (stderr, err_cut) = truncate_bytes(&stderr_raw, self.policy.max_output_bytes);

        Ok(ShellResult {
            command: command.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            truncated: out_cut || err_cut,
        })
    }

    fn ensure_allowed(&self, command: &str) -> Result<(), ToolError> {
        let token = first_command_token(command);
        if token.is_empty() {
            return Err(ToolError::validation("empty shell command"));
        }
        if self.policy.blocked_prefixes.iter().any(|p| *p == token) {
            return Err(ToolError::new(
                ToolErrorCode::PolicyViolation,
                format!("blocked command prefix: {token}"),
            )
            .with_details(serde_json::json!({"command": command})));
        }
        for pattern in &self.policy.blocked_patterns {
            if pattern.is_match(command) {
                return Err(ToolError::new(
                    ToolErrorCode::PolicyViolation,
                    format!("command matches blocked pattern: {}", pattern.as_str()),
                )
                .with_details(serde_json::json!({"command": command})));
            }
        }
        if self.policy.mode == ShellPolicyMode::Guarded
            && !self.policy.allowed_prefixes.iter().any(|p| *p == token)
        {
            let mut allowed = self.policy.allowed_prefixes.clone();
            allowed.sort_unstable();
            return Err(ToolError::new(
                ToolErrorCode::PolicyViolation,
                format!(
                    "command prefix '{token}' is not allowed in guarded mode; allowed prefixes: {allowed:?}"
                ),
            )
            .with_details(serde_json::json!({"command": command, "allowed_prefixes": allowed})));
        }
        Ok(())
    }

    fn resolve_cwd(&self, cwd: Option<&str>) -> Result<PathBuf, ToolError> {
        let root = self.policy.workspace_root.canonicalize().map_err(|error| {
            ToolError::new(
                ToolErrorCode::NotConfigured,
                format!(
                    "workspace root {} is unavailable: {error}",
                    self.policy.workspace_root.display()
                ),
            )
        })?;
        let Some(cwd) = cwd.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(root);
        };
        let candidate = if Path::new(cwd).is_absolute() {
            PathBuf::from(cwd)
        } else {
            root.join(cwd)
        };
        let resolved = candidate.canonicalize().map_err(|error| {
            ToolError::validation(format!("cwd '{cwd}' cannot be resolved: {error}"))
        })?;
        if !resolved.starts_with(&root) {
            return Err(ToolError::new(
                ToolErrorCode::PolicyViolation,
                format!(
                    "cwd '{}' escapes workspace root '{}'",
                    resolved.display(),
                    root.display()
                ),
            ));
        }
        Ok(resolved)
    }
}

/// First command token: split off everything after the first pipe,
/// semicolon, or ampersand chain, then take the first shell word with
/// surrounding quotes stripped, lowercased.
fn first_command_token(command: &str) -> String {
    let first_segment = split_on_operators(command);
    first_segment
        .split_whitespace()
        .next()
        .map(|word| word.trim_matches(['"', '\'']).to_lowercase())
        .unwrap_or_default()
}

fn split_on_operators(command: &str) -> &str {
    let end = command
        .find(['|', ';', '&'])
        .unwrap_or(command.len());
    command[..end].trim()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
