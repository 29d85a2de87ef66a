//! CLI-level integration tests driving the compiled `ff` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn fstests_fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let tests = dir.path().join("tests").join("generic");
    std::fs::create_dir_all(&tests).unwrap();
    std::fs::write(tests.join("001"), "").unwrap();
    std::fs::write(tests.join("002"), "").unwrap();
    std::fs::write(tests.join("group.list"), "001 quick\n002 slow\n").unwrap();
    dir
}

#[test]
fn list_prints_selected_names_and_spawns_nothing() {
    let fstests = fstests_fixture();

    let mut cmd = Command::cargo_bin("ff").unwrap();
    cmd.arg("--fstests")
        .arg(fstests.path())
        .arg("-g")
        .arg("quick")
        .arg("-l");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("generic/001"))
        .stdout(predicate::str::contains("generic/002").not());
}

#[test]
fn missing_fstests_is_a_clear_configuration_error() {
    let mut cmd = Command::cargo_bin("ff").unwrap();
    cmd.arg("--config").arg("/nonexistent/ff-test-config-does-not-exist.toml");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("fstests"));
}

#[test]
fn record_without_results_dir_fails_with_a_clear_message() {
    let mut cmd = Command::cargo_bin("ff").unwrap();
    cmd.arg("record");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("results-dir"));
}

#[test]
fn record_and_compare_round_trip_a_snapshot() {
    let results_dir = tempfile::tempdir().unwrap();
    let attempt_dir = results_dir.path().join("tests").join("generic/001").join("attempt-0");
    std::fs::create_dir_all(&attempt_dir).unwrap();
    std::fs::write(attempt_dir.join("status"), "PASS").unwrap();
    std::fs::write(attempt_dir.join("duration"), "1.0").unwrap();
    std::fs::write(attempt_dir.join("retries"), "0").unwrap();

    let latest_dir = results_dir.path().join("latest").join("generic/001");
    std::fs::create_dir_all(latest_dir.parent().unwrap()).unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(&attempt_dir, &latest_dir).unwrap();

    Command::cargo_bin("ff")
        .unwrap()
        .arg("--results-dir")
        .arg(results_dir.path())
        .arg("record")
        .arg("--label")
        .arg("baseline")
        .assert()
        .success();

    assert!(results_dir
        .path()
        .join("recordings")
        .join("baseline")
        .join("generic/001")
        .join("status")
        .is_file());

    Command::cargo_bin("ff")
        .unwrap()
        .arg("--results-dir")
        .arg(results_dir.path())
        .arg("compare")
        .arg("--baseline")
        .arg("baseline")
        .arg("--changed")
        .arg("baseline")
        .assert()
        .success()
        .stdout(predicate::str::contains("no differences"));
}
