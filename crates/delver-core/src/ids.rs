//! Identifier constructors.
//!
//! All ids are UUID v7 (time-ordered) with a short type prefix so a bare
//! id in a log line or transcript is self-describing. Nested call ids are
//! derived from the owning execution id plus a zero-padded counter so the
//! observability stream can correlate them back to the exec that made them.

use uuid::Uuid;

/// New run id: `run-<uuid7>`.
#[must_use]
pub fn new_run_id() -> String {
    format!("run-{}", Uuid::now_v7().simple())
}

/// New tool call id: `call_<12 hex chars>`.
#[must_use]
pub fn new_call_id() -> String {
    format!("call_{}", &Uuid::now_v7().simple().to_string()[..12])
}

/// New sandbox execution id: `exec_<12 hex chars>`.
#[must_use]
pub fn new_execution_id() -> String {
    format!("exec_{}", &Uuid::now_v7().simple().to_string()[..12])
}

/// Id for the `n`-th nested tool call made inside one sandbox execution.
#[must_use]
pub fn nested_call_id(parent: &str, n: u32) -> String {
    format!("{parent}:nested:{n:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_prefixed() {
        let a = new_run_id();
        let b = new_run_id();
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }

    #[test]
    fn call_id_length_is_stable() {
        let id = new_call_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 12);
    }

    #[test]
    fn nested_call_id_is_zero_padded() {
        assert_eq!(nested_call_id("exec_abc", 7), "exec_abc:nested:0007");
        assert_eq!(nested_call_id("exec_abc", 1234), "exec_abc:nested:1234");
    }
}
