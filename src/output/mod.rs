//! Observer of every run lifecycle event, plus the on-disk result layout
//! it shares with the recording store.
//!
//! Every worker calls into the same `Output` from the single cooperative
//! thread — interleaved across `.await` points, never truly concurrently
//! — so implementations use `RefCell`, not a lock, for interior state.

pub mod console;

pub use console::ConsoleOutput;

use std::path::{Path, PathBuf};

use crate::result::TestResult;
use crate::test::Test;

/// Observer of supervisor and test lifecycle events. The `TestRunner`
/// depends only on this trait, never on `ConsoleOutput` directly.
pub trait Output {
    /// Begin the "Setting up" phase; `total` supervisors will spawn.
    fn spawning_supervisors(&self, total: usize);
    /// One supervisor finished spawning (ok or not).
    fn spawned_supervisor(&self, name: &str, ok: bool);
    /// A supervisor is being brought back up after a crash.
    fn respawning_supervisor(&self, name: &str);
    fn respawned_supervisor(&self, name: &str, ok: bool);
    /// Begin the "Cleaning up" phase; `total` supervisors will exit.
    fn exiting_supervisors(&self, total: usize);
    fn exited_supervisor(&self, name: &str);
    /// A supervisor died outright (probe failed past the restart cap, or
    /// acquire never succeeded). `test_name` is the in-flight test, if any.
    fn supervisor_died(&self, name: &str, test_name: Option<&str>);

    /// Begin the "Testing" phase; `total` tests are queued.
    fn running_tests(&self, total: usize);
    /// One test started running on `supervisor`.
    fn running_test(&self, test: &Test, supervisor: &str);
    /// Byte sinks the running test's stdout/stderr are written into.
    fn test_sinks(&self, test: &Test) -> (crate::supervisor::ByteSink, crate::supervisor::ByteSink);
    /// Byte sinks for a scoped `dmesg -W` capture.
    fn dmesg_sinks(&self, test: &Test) -> (crate::supervisor::ByteSink, crate::supervisor::ByteSink);
    /// Byte sinks for a scoped bpftrace capture.
    fn bpftrace_sinks(&self, test: &Test) -> (crate::supervisor::ByteSink, crate::supervisor::ByteSink);
    /// Directory artifacts for this attempt should be collected into;
    /// created on demand.
    fn artifact_dir(&self, test: &Test) -> PathBuf;
    /// Final event for one test: persists result files, updates
    /// `latest/`, and renders pass/fail/skip/error.
    fn finished_test(&self, test: &Test, result: &TestResult);
    /// A non-final attempt (about to retry): bumps the retry counter and
    /// persists the failed attempt's files without touching `latest/`.
    fn record_retry(&self, test: &Test, error_result: &TestResult);

    /// End-of-run rendering: counts table, failure panels, optional
    /// slowest-N / duration histogram / failure list.
    fn print_summary(&self);
    fn print_exception(&self, message: &str);

    /// `--keep-alive` debug display; active until dropped.
    fn keeping_alive(&self);
}

/// `<results_dir>/tests/<name>/<attempt_id>/`, creating it.
pub fn attempt_dir(results_dir: &Path, test: &Test) -> PathBuf {
    let dir = results_dir.join("tests").join(&test.name).join(test.attempt_id());
    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// `<results_dir>/latest/<name>`.
fn latest_path(results_dir: &Path, name: &str) -> PathBuf {
    results_dir.join("latest").join(name)
}

/// Write `stdout`, `stderr`, `retcode`, `duration`, `status` into `dir`.
pub fn write_result_files(dir: &Path, result: &TestResult) {
    if let Some(stdout) = &result.stdout {
        let _ = std::fs::write(dir.join("stdout"), stdout);
    }
    if let Some(stderr) = &result.stderr {
        let _ = std::fs::write(dir.join("stderr"), stderr);
    }
    let retcode_text = result
        .retcode
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let _ = std::fs::write(dir.join("retcode"), retcode_text);
    let _ = std::fs::write(dir.join("duration"), result.duration.to_string());
    let _ = std::fs::write(dir.join("status"), result.status.as_str());
}

/// Write `retries` alongside the result files (not written by
/// `write_result_files` since it only applies to the final attempt).
pub fn write_retries_file(dir: &Path, retries: u32) {
    let _ = std::fs::write(dir.join("retries"), retries.to_string());
}

/// Point `latest/<name>` at `attempt_dir`, replacing any existing link.
/// A single rename-into-place keeps the swap atomic from a reader's
/// point of view (see DESIGN.md).
pub fn update_latest(results_dir: &Path, test: &Test) {
    let link = latest_path(results_dir, &test.name);
    if let Some(parent) = link.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let target = attempt_dir(results_dir, test);

    let tmp = link.with_extension("tmp-symlink");
    let _ = std::fs::remove_file(&tmp);
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(&target, &tmp).is_ok() {
            let _ = std::fs::rename(&tmp, &link);
            return;
        }
    }
    // Non-symlink-capable fallback: a plain file naming the attempt dir.
    let _ = std::fs::write(&tmp, target.to_string_lossy().as_bytes());
    let _ = std::fs::rename(&tmp, &link);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TestStatus;
    use chrono::Utc;

    fn result(status: TestStatus) -> TestResult {
        TestResult {
            name: "btrfs/001".into(),
            status,
            duration: 1.5,
            timestamp: Utc::now(),
            summary: None,
            retcode: Some(0),
            stdout: Some(b"ok".to_vec()),
            stderr: Some(Vec::new()),
        }
    }

    #[test]
    fn write_result_files_creates_expected_names() {
        let dir = tempfile::tempdir().unwrap();
        write_result_files(dir.path(), &result(TestStatus::Pass));
        for name in ["stdout", "stderr", "retcode", "duration", "status"] {
            assert!(dir.path().join(name).is_file(), "missing {name}");
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("status")).unwrap(), "PASS");
    }

    #[test]
    fn update_latest_points_at_attempt_dir() {
        let results_dir = tempfile::tempdir().unwrap();
        let test = Test::new("btrfs/001", "true", vec![]);
        let dir = attempt_dir(results_dir.path(), &test);
        std::fs::write(dir.join("status"), "PASS").unwrap();

        update_latest(results_dir.path(), &test);

        let latest = latest_path(results_dir.path(), &test.name);
        let status = std::fs::read_to_string(latest.join("status")).unwrap();
        assert_eq!(status, "PASS");
    }
}
