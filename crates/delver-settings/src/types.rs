//! Settings types with compiled defaults.
//!
//! Every struct derives `Deserialize` with `#[serde(default)]` so a
//! settings file can override any subset of fields; missing fields fall
//! back to the compiled defaults below.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelverSettings {
    /// Settings schema version.
    pub version: String,
    /// Turn orchestrator knobs.
    pub orchestrator: OrchestratorSettings,
    /// Sandboxed execution runtime knobs.
    pub sandbox: SandboxSettings,
    /// Guarded shell executor knobs.
    pub shell: ShellSettings,
    /// Sub-agent runner knobs.
    pub subagent: SubagentSettings,
}

impl Default for DelverSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".into(),
            orchestrator: OrchestratorSettings::default(),
            sandbox: SandboxSettings::default(),
            shell: ShellSettings::default(),
            subagent: SubagentSettings::default(),
        }
    }
}

/// Turn orchestrator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Maximum model/tool round-trips per turn.
    pub max_iterations: u32,
    /// Chunk size (chars) for synthesized text segments.
    pub text_chunk_chars: usize,
    /// Maximum chars in a derived thinking-segment title.
    pub title_max_chars: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            text_chunk_chars: 256,
            title_max_chars: 56,
        }
    }
}

/// Sandbox runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxSettings {
    /// Session capacity ceiling (oldest-updated evicted past it).
    pub max_sessions: usize,
    /// Idle time-to-live per session, seconds.
    pub session_ttl_secs: u64,
    /// Byte ceiling per captured stream (stdout and stderr independently).
    pub max_stdout_bytes: usize,
    /// Wall-clock ceiling per exec, seconds (post-hoc, cooperative).
    pub max_wall_time_secs: u64,
    /// Nested tool-call ceiling per exec.
    pub max_tool_calls_per_exec: u32,
    /// Worker cap for the in-sandbox parallel map helper.
    pub parallel_map_max_workers: usize,
    /// Import policy mode: `minimal`, `broad`, or `permissive`.
    pub import_policy: String,
    /// Extra allowed import roots on top of the policy's set.
    pub import_allow_modules: Vec<String>,
    /// Extra denied import modules (denylist always wins).
    pub import_deny_modules: Vec<String>,
    /// Environment snapshot limits.
    pub env_snapshot: EnvSnapshotSettings,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_sessions: 500,
            session_ttl_secs: 86_400,
            max_stdout_bytes: 65_536,
            max_wall_time_secs: 1_500,
            max_tool_calls_per_exec: 200,
            parallel_map_max_workers: 8,
            import_policy: "permissive".into(),
            import_allow_modules: Vec::new(),
            import_deny_modules: Vec::new(),
            env_snapshot: EnvSnapshotSettings::default(),
        }
    }
}

/// Environment snapshot settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvSnapshotSettings {
    /// Maximum variables reported per snapshot.
    pub max_items: usize,
    /// Maximum chars in a value preview.
    pub max_preview_chars: usize,
    /// Variable-name substrings whose previews are redacted.
    pub redact_keys: Vec<String>,
}

impl Default for EnvSnapshotSettings {
    fn default() -> Self {
        Self {
            max_items: 50,
            max_preview_chars: 120,
            redact_keys: ["api_key", "token", "secret", "password", "auth", "cookie"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Guarded shell settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellSettings {
    /// Workspace root all commands are confined to.
    pub workspace_root: String,
    /// Policy mode: `guarded` (allowlist) or `permissive`.
    pub policy_mode: String,
    /// First-token allowlist for guarded mode.
    pub allowed_prefixes: Vec<String>,
    /// First-token blocklist, refused in every mode.
    pub blocked_prefixes: Vec<String>,
    /// Regex patterns refused anywhere in the command, in every mode.
    pub blocked_patterns: Vec<String>,
    /// Byte ceiling per captured stream.
    pub max_output_bytes: usize,
    /// Default command timeout, seconds.
    pub default_timeout_secs: u64,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            workspace_root: "/tmp/delver-workspace".into(),
            policy_mode: "guarded".into(),
            allowed_prefixes: [
                "ls", "cat", "head", "tail", "wc", "grep", "rg", "find", "echo", "pwd",
                "python3", "jq", "sed", "awk", "sort", "uniq", "cut", "curl",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blocked_prefixes: ["rm", "sudo", "shutdown", "reboot", "mkfs", "dd", "kill"]
                .into_iter()
                .map(String::from)
                .collect(),
            blocked_patterns: vec![r">\s*/dev/".into(), r"\bcurl\b.*\|\s*sh\b".into()],
            max_output_bytes: 65_536,
            default_timeout_secs: 30,
        }
    }
}

/// Sub-agent runner settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentSettings {
    /// Iteration ceiling per delegated task.
    pub max_iterations: u32,
    /// Default batch worker-pool size.
    pub max_batch_workers: usize,
    /// Root directory for durable transcripts.
    pub artifacts_root: String,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            max_batch_workers: 4,
            artifacts_root: "/tmp/delver-artifacts".into(),
        }
    }
}
