//! Recordings: on-disk snapshots of a run's per-test status/duration/retries,
//! and the pure `compare` operation over two of them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::result::TestStatus;
use crate::test::Test;

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("recording not found: {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed recording at {path}: bad {field}")]
    Malformed { path: PathBuf, field: &'static str },
}

/// A historical `{status, duration, retries}` tuple loaded from disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedResult {
    pub status: TestStatus,
    pub duration: f64,
    pub retries: u32,
}

pub type RecordedResults = BTreeMap<String, RecordedResult>;

/// Load every test's `{status,duration,retries}` triple out of a directory
/// shaped like `latest/` or `recordings/<label>/`, handling one level of
/// nested test names (e.g. `btrfs/001`).
pub fn load_recording(dir: &Path) -> Result<RecordedResults, RecordingError> {
    if !dir.is_dir() {
        return Err(RecordingError::NotFound(dir.to_path_buf()));
    }

    let mut results = RecordedResults::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // `latest/<name>` entries are symlinks to attempt directories, so
        // follow them (`Path::is_dir` stats through the link) rather than
        // trusting `DirEntry::file_type`, which reports the link itself.
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();

        if let Some(result) = read_result(&path)? {
            results.insert(name, result);
            continue;
        }
        for sub_entry in std::fs::read_dir(&path)? {
            let sub_entry = sub_entry?;
            let sub_path = sub_entry.path();
            if !sub_path.is_dir() {
                continue;
            }
            if let Some(result) = read_result(&sub_path)? {
                let sub_name = sub_entry.file_name().to_string_lossy().to_string();
                results.insert(format!("{name}/{sub_name}"), result);
            }
        }
    }
    Ok(results)
}

fn read_result(test_dir: &Path) -> Result<Option<RecordedResult>, RecordingError> {
    let status_file = test_dir.join("status");
    let duration_file = test_dir.join("duration");
    if !status_file.is_file() || !duration_file.is_file() {
        return Ok(None);
    }

    let status_text = std::fs::read_to_string(&status_file)?;
    let status = TestStatus::parse(status_text.trim()).ok_or_else(|| RecordingError::Malformed {
        path: test_dir.to_path_buf(),
        field: "status",
    })?;

    let duration_text = std::fs::read_to_string(&duration_file)?;
    let duration: f64 = duration_text.trim().parse().map_err(|_| RecordingError::Malformed {
        path: test_dir.to_path_buf(),
        field: "duration",
    })?;

    let retries_file = test_dir.join("retries");
    let retries = match std::fs::read_to_string(&retries_file) {
        Ok(text) => text.trim().parse().unwrap_or(0),
        Err(_) => 0,
    };

    Ok(Some(RecordedResult {
        status,
        duration,
        retries,
    }))
}

/// Snapshot the `latest/` tree into `recordings/<label>/`: a `{status,
/// duration, retries}` text-file triple per test, nested for names
/// containing `/`. `results_dir` is the run's results directory; `label`
/// names the recording.
pub fn save_recording(results_dir: &Path, label: &str) -> Result<(), RecordingError> {
    let latest = load_recording(&results_dir.join("latest"))?;
    let dest_root = results_dir.join("recordings").join(label);
    std::fs::create_dir_all(&dest_root)?;

    for (name, result) in &latest {
        let dir = dest_root.join(name);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("status"), result.status.as_str())?;
        std::fs::write(dir.join("duration"), result.duration.to_string())?;
        std::fs::write(dir.join("retries"), result.retries.to_string())?;
    }
    Ok(())
}

/// List the labels under `<results_dir>/recordings/`, most-recently-modified
/// last (so index `0` from the tail means "most recent").
pub fn list_recordings(results_dir: &Path) -> Vec<String> {
    let rec_dir = results_dir.join("recordings");
    let Ok(entries) = std::fs::read_dir(&rec_dir) else {
        return Vec::new();
    };
    let mut named: Vec<(std::time::SystemTime, String)> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((mtime, e.file_name().to_string_lossy().to_string()))
        })
        .collect();
    named.sort_by_key(|(mtime, _)| *mtime);
    named.into_iter().map(|(_, name)| name).collect()
}

/// Resolve a `--slowest-first`/`--baseline`/`--changed` value (an index into
/// the mtime-sorted recording list, `latest`, or an explicit label) to a
/// `(path, label)` pair.
pub fn resolve_recording(value: &str, results_dir: &Path) -> Result<(PathBuf, String), RecordingError> {
    let rec_dir = results_dir.join("recordings");
    if value == "latest" {
        let recordings = list_recordings(results_dir);
        let label = recordings
            .last()
            .cloned()
            .ok_or_else(|| RecordingError::NotFound(rec_dir.clone()))?;
        return Ok((rec_dir.join(&label), label));
    }
    if let Ok(index) = value.parse::<usize>() {
        let recordings = list_recordings(results_dir);
        let label = recordings
            .get(recordings.len().wrapping_sub(1).wrapping_sub(index))
            .cloned()
            .ok_or_else(|| RecordingError::NotFound(rec_dir.clone()))?;
        return Ok((rec_dir.join(&label), label));
    }
    Ok((rec_dir.join(value), value.to_string()))
}

/// Reorder `tests` for dispatch using `recorded`'s durations: tests present
/// in the recording are sorted by descending duration and dispatched
/// first; unknown tests keep their existing relative order and dispatch
/// afterward. The work queue is popped from the end, so "dispatched
/// first" means "placed last" in the returned vec.
pub fn apply_slowest_first(tests: Vec<Test>, recorded: &RecordedResults) -> Vec<Test> {
    let (mut known, unknown): (Vec<Test>, Vec<Test>) =
        tests.into_iter().partition(|t| recorded.contains_key(&t.name));

    known.sort_by(|a, b| {
        let da = recorded[&a.name].duration;
        let db = recorded[&b.name].duration;
        da.partial_cmp(&db).unwrap()
    });

    let mut ordered = unknown;
    ordered.extend(known);
    ordered
}

/// Minimum duration delta (seconds) to flag as a timing change.
const TIMING_CHANGE_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub enum TimingDelta {
    Slower(f64),
    Faster(f64),
}

/// The structured diff between two recordings, `a` (baseline) and `b`
/// (changed). Categories are not mutually exclusive except
/// regression/fix/unchanged-status.
#[derive(Debug, Clone, Default)]
pub struct Comparison {
    pub regressions: Vec<(String, TestStatus, TestStatus)>,
    pub fixes: Vec<(String, TestStatus, TestStatus)>,
    pub flaky: Vec<(String, u32)>,
    pub new_in_b: Vec<String>,
    pub removed_from_b: Vec<String>,
    pub timing_changes: Vec<(String, TimingDelta)>,
}

impl Comparison {
    pub fn is_empty(&self) -> bool {
        self.regressions.is_empty()
            && self.fixes.is_empty()
            && self.flaky.is_empty()
            && self.new_in_b.is_empty()
            && self.removed_from_b.is_empty()
            && self.timing_changes.is_empty()
    }
}

/// Classify every test name present in either `a` or `b` into exactly one
/// of: regression, fix, flaky, new-in-b, removed-from-b, timing change.
/// Deterministic and order-independent in its inputs; iterates names in
/// sorted order so callers get stable output.
pub fn compare(a: &RecordedResults, b: &RecordedResults) -> Comparison {
    let mut out = Comparison::default();

    let mut all_names: Vec<&String> = a.keys().chain(b.keys()).collect();
    all_names.sort_unstable();
    all_names.dedup();

    for name in all_names {
        match (a.get(name), b.get(name)) {
            (None, Some(rb)) => {
                out.new_in_b.push(name.clone());
                if rb.retries > 0 && rb.status == TestStatus::Pass {
                    out.flaky.push((name.clone(), rb.retries));
                }
            }
            (Some(_), None) => out.removed_from_b.push(name.clone()),
            (Some(ra), Some(rb)) => {
                if ra.status != rb.status {
                    if rb.status.is_bad() {
                        out.regressions.push((name.clone(), ra.status, rb.status));
                    } else if ra.status.is_bad() {
                        out.fixes.push((name.clone(), ra.status, rb.status));
                    }
                }
                let delta = rb.duration - ra.duration;
                if delta.abs() >= TIMING_CHANGE_THRESHOLD {
                    let delta = if delta > 0.0 {
                        TimingDelta::Slower(delta)
                    } else {
                        TimingDelta::Faster(-delta)
                    };
                    out.timing_changes.push((name.clone(), delta));
                }
                if rb.retries > 0 && rb.status == TestStatus::Pass {
                    out.flaky.push((name.clone(), rb.retries));
                }
            }
            (None, None) => unreachable!("name came from a.keys() or b.keys()"),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TestStatus, duration: f64, retries: u32) -> RecordedResult {
        RecordedResult { status, duration, retries }
    }

    #[test]
    fn compare_against_self_is_empty() {
        let mut a = RecordedResults::new();
        a.insert("btrfs/001".into(), result(TestStatus::Pass, 1.0, 0));
        let cmp = compare(&a, &a.clone());
        assert!(cmp.is_empty());
    }

    #[test]
    fn single_status_change_is_one_regression() {
        let mut a = RecordedResults::new();
        a.insert("btrfs/001".into(), result(TestStatus::Pass, 1.0, 0));
        let mut b = a.clone();
        b.insert("btrfs/001".into(), result(TestStatus::Fail, 1.0, 0));

        let cmp = compare(&a, &b);
        assert_eq!(cmp.regressions.len(), 1);
        assert!(cmp.fixes.is_empty());
    }

    #[test]
    fn fail_to_pass_is_a_fix() {
        let mut a = RecordedResults::new();
        a.insert("btrfs/001".into(), result(TestStatus::Fail, 1.0, 0));
        let mut b = RecordedResults::new();
        b.insert("btrfs/001".into(), result(TestStatus::Pass, 1.0, 1));

        let cmp = compare(&a, &b);
        assert_eq!(cmp.fixes.len(), 1);
        assert_eq!(cmp.flaky.len(), 1);
    }

    #[test]
    fn timing_change_threshold_is_five_seconds() {
        let mut a = RecordedResults::new();
        a.insert("btrfs/001".into(), result(TestStatus::Pass, 10.0, 0));
        let mut b = RecordedResults::new();
        b.insert("btrfs/001".into(), result(TestStatus::Pass, 14.9, 0));
        assert!(compare(&a, &b).timing_changes.is_empty());

        b.insert("btrfs/001".into(), result(TestStatus::Pass, 15.0, 0));
        assert_eq!(compare(&a, &b).timing_changes.len(), 1);
    }

    #[test]
    fn new_and_removed_tests_are_tracked() {
        let mut a = RecordedResults::new();
        a.insert("btrfs/001".into(), result(TestStatus::Pass, 1.0, 0));
        let mut b = RecordedResults::new();
        b.insert("btrfs/002".into(), result(TestStatus::Pass, 1.0, 0));

        let cmp = compare(&a, &b);
        assert_eq!(cmp.removed_from_b, vec!["btrfs/001".to_string()]);
        assert_eq!(cmp.new_in_b, vec!["btrfs/002".to_string()]);
    }

    #[test]
    fn round_trip_through_disk_matches_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let test_dir = dir.path().join("btrfs").join("001");
        std::fs::create_dir_all(&test_dir).unwrap();
        std::fs::write(test_dir.join("status"), "PASS").unwrap();
        std::fs::write(test_dir.join("duration"), "3.5").unwrap();
        std::fs::write(test_dir.join("retries"), "1").unwrap();

        let loaded = load_recording(dir.path()).unwrap();
        let expected = result(TestStatus::Pass, 3.5, 1);
        assert_eq!(loaded.get("btrfs/001"), Some(&expected));

        let cmp = compare(&loaded, &loaded.clone());
        assert!(cmp.is_empty());
    }

    #[test]
    fn save_recording_round_trips_latest() {
        let results_dir = tempfile::tempdir().unwrap();
        let attempt_dir = results_dir.path().join("tests").join("btrfs/001").join("attempt-0");
        std::fs::create_dir_all(&attempt_dir).unwrap();
        std::fs::write(attempt_dir.join("status"), "FAIL").unwrap();
        std::fs::write(attempt_dir.join("duration"), "4.25").unwrap();
        std::fs::write(attempt_dir.join("retries"), "2").unwrap();

        let latest_dir = results_dir.path().join("latest").join("btrfs/001");
        std::fs::create_dir_all(latest_dir.parent().unwrap()).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(&attempt_dir, &latest_dir).unwrap();
        #[cfg(not(unix))]
        std::fs::write(&latest_dir, attempt_dir.to_string_lossy().as_bytes()).unwrap();

        save_recording(results_dir.path(), "baseline").unwrap();

        let saved = load_recording(&results_dir.path().join("recordings").join("baseline")).unwrap();
        assert_eq!(saved.get("btrfs/001"), Some(&result(TestStatus::Fail, 4.25, 2)));
    }

    #[test]
    fn slowest_first_dispatches_known_durations_descending() {
        let mut recorded = RecordedResults::new();
        recorded.insert("btrfs/001".into(), result(TestStatus::Pass, 1.0, 0));
        recorded.insert("btrfs/002".into(), result(TestStatus::Pass, 9.0, 0));

        let tests = vec![
            Test::new("btrfs/003", "true", vec![]),
            Test::new("btrfs/001", "true", vec![]),
            Test::new("btrfs/002", "true", vec![]),
        ];
        let ordered = apply_slowest_first(tests, &recorded);
        let names: Vec<&str> = ordered.iter().map(|t| t.name.as_str()).collect();
        // Popped from the end: btrfs/002 (9s) first, then btrfs/001 (1s),
        // then the unknown btrfs/003 last.
        assert_eq!(names, vec!["btrfs/003", "btrfs/001", "btrfs/002"]);
    }
}
