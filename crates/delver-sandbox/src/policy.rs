//! Import policy for sandboxed code.
//!
//! Checked at `import` time by module root (the segment before the first
//! dot), with a small set of full-name grants for submodules whose root is
//! otherwise blocked. The denylist always wins, even under Permissive.

use delver_core::{ToolError, ToolErrorCode};
use delver_settings::SandboxSettings;

/// Allowlist posture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImportPolicyMode {
    /// Stdlib-shaped data/analysis roots only.
    Minimal,
    /// Minimal plus HTTP client roots.
    Broad,
    /// Anything not denylisted.
    #[default]
    Permissive,
}

impl ImportPolicyMode {
    /// Parse a settings string; unknown values fall back to Permissive.
    #[must_use]
    pub fn parse(mode: &str) -> Self {
        match mode.trim().to_ascii_lowercase().as_str() {
            "minimal" => Self::Minimal,
            "broad" => Self::Broad,
            _ => Self::Permissive,
        }
    }
}

const MINIMAL_ROOTS: &[&str] = &[
    "collections",
    "datetime",
    "functools",
    "itertools",
    "json",
    "math",
    "pathlib",
    "random",
    "re",
    "statistics",
    "string",
    "textwrap",
    "typing",
];

/// Full-name grants whose root is not itself allowed.
const MINIMAL_MODULES: &[&str] = &["urllib.parse"];

const BROAD_EXTRA_ROOTS: &[&str] = &["aiohttp", "httpx", "requests", "urllib"];

/// Never importable, regardless of mode or extra allows.
const DENY_ROOTS: &[&str] = &[
    "subprocess",
    "pty",
    "resource",
    "ctypes",
    "multiprocessing",
    "signal",
    "socket",
];

/// The effective import policy for one sandbox runtime.
#[derive(Clone, Debug, Default)]
pub struct ImportPolicy {
    mode: ImportPolicyMode,
    extra_allow: Vec<String>,
    extra_deny: Vec<String>,
}

impl ImportPolicy {
    /// Policy with no extra grants or denials.
    #[must_use]
    pub fn new(mode: ImportPolicyMode) -> Self {
        Self {
            mode,
            extra_allow: Vec::new(),
            extra_deny: Vec::new(),
        }
    }

    /// Policy from the sandbox settings block.
    #[must_use]
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            mode: ImportPolicyMode::parse(&settings.import_policy),
            extra_allow: settings.import_allow_modules.clone(),
            extra_deny: settings.import_deny_modules.clone(),
        }
    }

    fn denied(&self, root: &str) -> bool {
        DENY_ROOTS.contains(&root) || self.extra_deny.iter().any(|d| d == root)
    }

    /// The sorted allowed set, as shown in refusal messages.
    #[must_use]
    pub fn allowed_modules(&self) -> Vec<String> {
        let mut allowed: Vec<String> = MINIMAL_ROOTS
            .iter()
            .chain(MINIMAL_MODULES)
            .map(ToString::to_string)
            .collect();
        if self.mode == ImportPolicyMode::Broad {
            allowed.extend(BROAD_EXTRA_ROOTS.iter().map(ToString::to_string));
        }
        allowed.extend(self.extra_allow.iter().cloned());
        allowed.retain(|name| {
            let root = name.split('.').next().unwrap_or(name);
            !self.denied(root) || MINIMAL_MODULES.contains(&name.as_str())
        });
        allowed.sort_unstable();
        allowed.dedup();
        allowed
    }

    /// Check one dotted module path against the policy.
    ///
    /// A refusal is a `POLICY_VIOLATION` naming the attempted module and
    /// the sorted allowed set.
    pub fn check(&self, module: &str) -> Result<(), ToolError> {
        let root = module.split('.').next().unwrap_or(module);
        let refusal = |why: &str| {
            let allowed = match self.mode {
                ImportPolicyMode::Permissive => Vec::new(),
                _ => self.allowed_modules(),
            };
            ToolError::new(
                ToolErrorCode::PolicyViolation,
                format!("import of '{module}' is {why}"),
            )
            .with_details(serde_json::json!({
                "module": module,
                "allowed": allowed,
            }))
        };

        if self.denied(root) {
            return Err(refusal("denied by the sandbox import policy"));
        }
        match self.mode {
            ImportPolicyMode::Permissive => Ok(()),
            mode => {
                let roots_allowed = MINIMAL_ROOTS.contains(&root)
                    || (mode == ImportPolicyMode::Broad && BROAD_EXTRA_ROOTS.contains(&root));
                let full_allowed = MINIMAL_MODULES.contains(&module)
                    || self
                        .extra_allow
                        .iter()
                        .any(|a| a == module || a == root);
                if roots_allowed || full_allowed {
                    Ok(())
                } else {
                    Err(refusal("not in the allowed set"))
                }
            }
        }
    }
}
