//! Test selection: turns a resolved [`Config`] into the ordered `Vec<Test>`
//! the runner dispatches from.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;

use crate::config::Config;
use crate::test::Test;

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("path to fstests not configured")]
    MissingFstests,
    #[error("test_selection.iterate must be >= 1")]
    BadIterate,
    #[error("no tests selected")]
    Empty,
}

/// Resolve `config` into the ordered list of `Test`s the runner will
/// dispatch. Mirrors `fstests.py::collect_tests`: union explicit tests and
/// group tests, subtract exclusions, filter by filesystem, apply iterate,
/// then order (randomized or reverse-sorted for a pop-from-end queue).
pub fn collect_tests(config: &Config) -> Result<Vec<Test>, SelectionError> {
    let sel = &config.test_selection;
    let fstests = config.fstests.as_ref().ok_or(SelectionError::MissingFstests)?;

    if sel.iterate < 1 {
        return Err(SelectionError::BadIterate);
    }

    let mut names: BTreeSet<String> = BTreeSet::new();
    for test in &sel.tests {
        names.extend(expand_test(test, fstests));
    }
    for group in &sel.groups {
        names.extend(tests_for_group(group, fstests));
    }

    for test in &sel.exclude_tests {
        for name in expand_test(test, fstests) {
            names.remove(&name);
        }
    }
    if let Some(path) = &sel.exclude_tests_file {
        for name in parse_exclude_tests_file(path) {
            names.remove(&name);
        }
    }
    for group in &sel.exclude_groups {
        for name in tests_for_group(group, fstests) {
            names.remove(&name);
        }
    }

    let mut names: Vec<String> = names.into_iter().collect();

    if let Some(fs) = &sel.file_system {
        let before = names.len();
        names.retain(|name| name.contains(fs.as_str()) || name.contains("generic"));
        if names.is_empty() && before > 0 {
            tracing::warn!(file_system = %fs, "no tests match your specified file system");
        }
    }

    if sel.iterate > 1 {
        names = names
            .into_iter()
            .flat_map(|name| std::iter::repeat(name).take(sel.iterate as usize))
            .collect();
    }

    if sel.randomize {
        names.shuffle(&mut rand::thread_rng());
    } else {
        // Reverse-sorted, so a pop-from-end queue dispatches ascending.
        names.sort_unstable();
        names.reverse();
    }

    if names.is_empty() {
        return Err(SelectionError::Empty);
    }

    Ok(names
        .into_iter()
        .map(|name| build_test(&name, fstests, sel.section.as_deref(), sel.exclude_section.as_deref()))
        .collect())
}

/// Rebuild a single `Test` by name using `config`'s fstests path and
/// section options, e.g. for `--retry-failures` re-dispatching a test the
/// initial run already selected and ran.
pub fn test_for_name(name: &str, config: &Config) -> Option<Test> {
    let fstests = config.fstests.as_ref()?;
    Some(build_test(
        name,
        fstests,
        config.test_selection.section.as_deref(),
        config.test_selection.exclude_section.as_deref(),
    ))
}

fn build_test(
    name: &str,
    fstests: &Path,
    section: Option<&str>,
    exclude_section: Option<&str>,
) -> Test {
    let mut check_options = Vec::new();
    if let Some(s) = section {
        check_options.push("-s".to_string());
        check_options.push(s.to_string());
    }
    if let Some(s) = exclude_section {
        check_options.push("-S".to_string());
        check_options.push(s.to_string());
    }
    let options = if check_options.is_empty() {
        String::new()
    } else {
        format!("{} ", check_options.join(" "))
    };
    let command = format!("cd {}; ./check {options}{name}", fstests.display());
    let artifact_pattern = format!("{}/results/*/{name}*", fstests.display());
    Test::new(name, command, vec![artifact_pattern])
}

/// Expand a positional test argument (e.g. `btrfs/001` or `generic/0[0-5]*`)
/// into concrete test names, keeping only entries whose final path
/// component is purely numeric (fstests' convention for a single test id).
fn expand_test(arg: &str, fstests: &Path) -> Vec<String> {
    let pattern = fstests.join("tests").join(arg);
    let tests_root = fstests.join("tests");
    let Ok(entries) = glob::glob(&pattern.to_string_lossy()) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        })
        .filter_map(|p| p.strip_prefix(&tests_root).ok().map(|p| p.to_string_lossy().to_string()))
        .collect()
}

fn parse_exclude_tests_file(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        tracing::warn!(path = %path.display(), "exclude tests file not found");
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Resolve a group name to its member test names. `GROUP` containing `/`
/// scopes the lookup to a single test subdirectory; otherwise every
/// subdirectory of `<fstests>/tests/` is searched.
fn tests_for_group(group: &str, fstests: &Path) -> Vec<String> {
    if let Some((test_dir, group)) = group.split_once('/') {
        return tests_from_test_dir(group, &fstests.join("tests").join(test_dir));
    }

    let tests_root = fstests.join("tests");
    let Ok(entries) = std::fs::read_dir(&tests_root) else {
        return Vec::new();
    };
    let mut names = BTreeSet::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            names.extend(tests_from_test_dir(group, &path));
        }
    }
    names.into_iter().collect()
}

/// Read `<test_dir>/group.list` (committed alongside each test directory;
/// see DESIGN.md for why this crate reads it directly instead of
/// regenerating it from test headers) and collect every test whose
/// group line matches `group` (or `all`).
fn tests_from_test_dir(group: &str, test_dir: &Path) -> Vec<String> {
    let dir_name = match test_dir.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return Vec::new(),
    };
    let Ok(content) = std::fs::read_to_string(test_dir.join("group.list")) else {
        return Vec::new();
    };

    let mut names = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(test_name) = fields.next() else {
            continue;
        };
        let groups: Vec<&str> = fields.collect();
        if group == "all" || groups.contains(&group) {
            names.push(format!("{dir_name}/{test_name}"));
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fstests_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let tests = dir.path().join("tests");
        fs::create_dir_all(tests.join("btrfs")).unwrap();
        fs::create_dir_all(tests.join("generic")).unwrap();
        for n in ["001", "002", "003"] {
            fs::write(tests.join("btrfs").join(n), "").unwrap();
        }
        for n in ["001", "002"] {
            fs::write(tests.join("generic").join(n), "").unwrap();
        }
        fs::write(
            tests.join("btrfs").join("group.list"),
            "001 quick\n002 quick slow\n003 slow\n",
        )
        .unwrap();
        fs::write(tests.join("generic").join("group.list"), "001 quick\n002 slow\n").unwrap();
        dir
    }

    fn base_config(fstests: &Path) -> Config {
        let mut config = Config::default();
        config.fstests = Some(fstests.to_path_buf());
        config.mkosi.num = 1;
        config
    }

    #[test]
    fn no_duplicate_names_at_iterate_one() {
        let fixture = fstests_fixture();
        let mut config = base_config(fixture.path());
        config.test_selection.groups = vec!["quick".into()];
        let tests = collect_tests(&config).unwrap();
        let mut names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn excluded_tests_never_appear_even_if_named_explicitly() {
        let fixture = fstests_fixture();
        let mut config = base_config(fixture.path());
        config.test_selection.tests = vec!["btrfs/001".into()];
        config.test_selection.exclude_tests = vec!["btrfs/001".into()];
        let tests = collect_tests(&config).unwrap_err();
        assert!(matches!(tests, SelectionError::Empty));
    }

    #[test]
    fn excluded_group_never_appears() {
        let fixture = fstests_fixture();
        let mut config = base_config(fixture.path());
        config.test_selection.groups = vec!["quick".into()];
        config.test_selection.exclude_groups = vec!["slow".into()];
        let tests = collect_tests(&config).unwrap();
        assert!(tests.iter().all(|t| t.name != "btrfs/002"));
        assert!(tests.iter().any(|t| t.name == "btrfs/001"));
    }

    #[test]
    fn non_randomized_output_is_reverse_sorted() {
        let fixture = fstests_fixture();
        let mut config = base_config(fixture.path());
        config.test_selection.groups = vec!["all".into()];
        let tests = collect_tests(&config).unwrap();
        let names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.reverse();
        assert_eq!(names, sorted);
    }

    #[test]
    fn iterate_multiplies_each_test() {
        let fixture = fstests_fixture();
        let mut config = base_config(fixture.path());
        config.test_selection.groups = vec!["all".into()];
        config.test_selection.iterate = 3;
        let without_iterate = {
            let mut c = config.clone();
            c.test_selection.iterate = 1;
            collect_tests(&c).unwrap().len()
        };
        let tests = collect_tests(&config).unwrap();
        assert_eq!(tests.len(), without_iterate * 3);
    }

    #[test]
    fn file_system_filter_keeps_generic_and_matching() {
        let fixture = fstests_fixture();
        let mut config = base_config(fixture.path());
        config.test_selection.groups = vec!["all".into()];
        config.test_selection.file_system = Some("btrfs".into());
        let tests = collect_tests(&config).unwrap();
        assert!(tests.iter().all(|t| t.name.contains("btrfs") || t.name.contains("generic")));
    }
}
