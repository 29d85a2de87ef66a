//! Value types describing the outcome of a single test attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verdict of one test attempt.
///
/// `Error` means the framework could not determine a verdict at all
/// (timeout, VM died beyond the restart cap) — distinct from `Fail`,
/// which means the test ran to completion with a non-success return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
            TestStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<TestStatus> {
        match s.trim() {
            "PASS" => Some(TestStatus::Pass),
            "FAIL" => Some(TestStatus::Fail),
            "SKIP" => Some(TestStatus::Skip),
            "ERROR" => Some(TestStatus::Error),
            _ => None,
        }
    }

    /// True for statuses considered a regression target in `compare`.
    pub fn is_bad(&self) -> bool {
        matches!(self, TestStatus::Fail | TestStatus::Error)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record emitted by a single test attempt.
///
/// Invariant: when `status` is `Pass` or `Fail`, `retcode` is `Some`.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
    pub summary: Option<String>,
    pub retcode: Option<i32>,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

impl TestResult {
    /// Build the result of a test that the framework could not score, e.g.
    /// a timeout or a VM that died mid-run.
    pub fn from_error(
        name: impl Into<String>,
        summary: impl Into<String>,
        duration: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        TestResult {
            name: name.into(),
            status: TestStatus::Error,
            duration,
            timestamp,
            summary: Some(summary.into()),
            retcode: None,
            stdout: None,
            stderr: None,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            TestStatus::Pass,
            TestStatus::Fail,
            TestStatus::Skip,
            TestStatus::Error,
        ] {
            assert_eq!(TestStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn unknown_status_text_is_none() {
        assert_eq!(TestStatus::parse("BOGUS"), None);
    }

    #[test]
    fn from_error_has_no_retcode_or_output() {
        let r = TestResult::from_error("btrfs/001", "timed out", 30.0, Utc::now());
        assert_eq!(r.status, TestStatus::Error);
        assert!(r.retcode.is_none());
        assert!(r.stdout.is_none());
        assert!(r.stderr.is_none());
    }
}
