//! `Test` — the scheduling handle for a single selected check.

use chrono::Utc;

/// One scheduled test: a stable name, the command to run inside a
/// supervisor, the artifact glob patterns to collect afterward, and the
/// attempt id of its current (possibly retried) execution.
///
/// Created once by the selection module; never destroyed until the run
/// ends. `retry()` is the only mutator, and it always assigns a fresh
/// attempt id so a retried attempt's result files never collide with the
/// attempt they replace.
#[derive(Debug, Clone)]
pub struct Test {
    pub name: String,
    pub command: String,
    pub artifact_patterns: Vec<String>,
    attempt_id: String,
}

impl Test {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        artifact_patterns: Vec<String>,
    ) -> Self {
        Test {
            name: name.into(),
            command: command.into(),
            artifact_patterns,
            attempt_id: new_attempt_id(),
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Assign a fresh attempt id, e.g. after a crash-recovery re-queue.
    pub fn retry(&mut self) {
        self.attempt_id = new_attempt_id();
    }
}

/// `YYYY-MM-DD_HH-MM-SS_ffffff` — sortable and collision-resistant enough
/// for same-process retries a microsecond apart.
fn new_attempt_id() -> String {
    Utc::now().format("%Y-%m-%d_%H-%M-%S_%6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_changes_attempt_id() {
        let mut t = Test::new("btrfs/001", "echo hi", vec![]);
        let before = t.attempt_id().to_string();
        t.retry();
        assert_ne!(before, t.attempt_id());
    }

    #[test]
    fn attempt_id_has_expected_shape() {
        let t = Test::new("generic/001", "true", vec![]);
        let id = t.attempt_id();
        assert_eq!(id.len(), "2026-07-26_00-00-00_000000".len());
        assert!(id.chars().filter(|c| *c == '_').count() == 2);
    }
}
