//! Configuration loading: TOML file + `clap` CLI, merged as
//! CLI-overrides-TOML-overrides-defaults, with `${VAR}` / `${VAR:-default}`
//! environment expansion applied to path-shaped string fields.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use crate::cli::RunArgs;

/// Errors distinguished at configuration-resolution time; all of these
/// surface before any test runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("path to fstests not specified (set --fstests or fstests in the config file)")]
    MissingFstests,
    #[error("no supervisors configured: set --mkosi-num or --vms")]
    NoSupervisors,
    #[error("cannot specify both --{0} and --{1}")]
    ConflictingFlags(&'static str, &'static str),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    EnvExpand(String),
    #[error("invalid --vms entry {0:?}: expected HOST:PATH")]
    BadVmSpec(String),
}

/// Load a TOML config file. A missing file is not an error — it just means
/// "use CLI flags and defaults".
pub fn load_toml(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        }
        Err(_) => Ok(Config::default()),
    }
}

/// Merge CLI-provided `RunArgs` onto a TOML-loaded `Config`, applying
/// environment expansion and cross-field validation. `results_dir` comes
/// from the top-level `--results-dir` flag shared by every subcommand.
pub fn merge_run_config(
    cli: &RunArgs,
    results_dir: Option<PathBuf>,
    mut config: Config,
) -> Result<Config, ConfigError> {
    if let Some(v) = &cli.fstests {
        config.fstests = Some(v.clone());
    }
    if let Some(fstests) = &config.fstests {
        config.fstests = Some(PathBuf::from(expand_env_value(
            &fstests.to_string_lossy(),
        )?));
    }

    if let Some(v) = results_dir {
        config.results_dir = Some(v);
    }
    if let Some(dir) = &config.results_dir {
        config.results_dir = Some(PathBuf::from(expand_env_value(&dir.to_string_lossy())?));
    }

    if cli.keep_alive {
        config.keep_alive = true;
    }

    let sel = &mut config.test_selection;
    if !cli.tests.is_empty() {
        sel.tests = cli.tests.clone();
    }
    if !cli.groups.is_empty() {
        sel.groups = cli.groups.clone();
    }
    if !cli.exclude_tests.is_empty() {
        sel.exclude_tests = cli.exclude_tests.clone();
    }
    if cli.exclude_tests_file.is_some() {
        sel.exclude_tests_file = cli.exclude_tests_file.clone();
    }
    if !cli.exclude_groups.is_empty() {
        sel.exclude_groups = cli.exclude_groups.clone();
    }
    if cli.section.is_some() {
        sel.section = cli.section.clone();
    }
    if cli.exclude_section.is_some() {
        sel.exclude_section = cli.exclude_section.clone();
    }
    if cli.randomize {
        sel.randomize = true;
    }
    if let Some(n) = cli.iterate {
        sel.iterate = n;
    }
    if cli.list {
        sel.list = true;
    }
    if cli.file_system.is_some() {
        sel.file_system = cli.file_system.clone();
    }

    let mkosi = &mut config.mkosi;
    if let Some(n) = cli.mkosi_num {
        mkosi.num = n;
    }
    if cli.mkosi_config.is_some() {
        mkosi.config = cli.mkosi_config.clone();
    }
    if let Some(dir) = &mkosi.config {
        mkosi.config = Some(expand_env_value(dir)?);
    }
    if !cli.mkosi_options.is_empty() {
        mkosi.options = cli.mkosi_options.clone();
    }
    if cli.mkosi_fstests.is_some() {
        mkosi.fstests = cli.mkosi_fstests.clone();
    }
    if let Some(t) = cli.mkosi_timeout {
        mkosi.timeout = t;
    }
    if cli.build {
        mkosi.build = true;
    }

    if !cli.vms.is_empty() {
        config.custom_vm.vms = cli
            .vms
            .iter()
            .map(|s| s.parse().map_err(ConfigError::BadVmSpec))
            .collect::<Result<Vec<_>, _>>()?;
    }

    let runner = &mut config.test_runner;
    if cli.test_timeout.is_some() {
        runner.test_timeout = cli.test_timeout;
    }
    if cli.bpftrace.is_some() {
        runner.bpftrace = cli.bpftrace.clone();
    }
    if cli.bpftrace_script.is_some() {
        runner.bpftrace_script = cli.bpftrace_script.clone();
    }
    if let Some(n) = cli.probe_interval {
        runner.probe_interval = n;
    }
    if let Some(n) = cli.max_supervisor_restarts {
        runner.max_supervisor_restarts = n;
    }
    if cli.dmesg {
        runner.dmesg = true;
    }
    if runner.bpftrace.is_some() && runner.bpftrace_script.is_some() {
        return Err(ConfigError::ConflictingFlags("bpftrace", "bpftrace-script"));
    }

    let output = &mut config.output;
    if cli.verbose {
        output.verbose = true;
    }
    if cli.record.is_some() {
        output.record = cli.record.clone();
    }
    if cli.slowest_first.is_some() {
        output.slowest_first = cli.slowest_first.clone();
    }
    if let Some(n) = cli.retry_failures {
        output.retry_failures = n;
    }
    if cli.print_failure_list {
        output.print_failure_list = true;
    }
    if cli.print_n_slowest.is_some() {
        output.print_n_slowest = cli.print_n_slowest;
    }
    if cli.print_duration_hist {
        output.print_duration_hist = true;
    }
    if output.slowest_first.is_some() && config.test_selection.randomize {
        return Err(ConfigError::ConflictingFlags("randomize", "slowest-first"));
    }

    if config.test_selection.list {
        // `-l` only needs to enumerate tests; fstests/VMs can stay unset.
        return Ok(config);
    }

    if config.fstests.is_none() {
        return Err(ConfigError::MissingFstests);
    }
    if config.mkosi.num == 0 && config.custom_vm.vms.is_empty() {
        return Err(ConfigError::NoSupervisors);
    }

    Ok(config)
}

/// Expand `${VAR}` / `${VAR:-default}` / `$$` references in a string.
///
/// - `${VAR}` — required, fails if `VAR` is not set.
/// - `${VAR:-default}` — optional, uses `default` if `VAR` is not set.
/// - `$$` — escaped dollar sign (becomes a literal `$`).
pub fn expand_env_value(value: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                let mut var_content = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        found_close = true;
                        break;
                    }
                    var_content.push(c);
                }
                if !found_close {
                    return Err(ConfigError::EnvExpand(format!(
                        "unclosed variable reference: ${{{var_content}"
                    )));
                }

                let (var_name, default_value) = match var_content.find(":-") {
                    Some(idx) => {
                        let (name, rest) = var_content.split_at(idx);
                        (name, Some(&rest[2..]))
                    }
                    None => (var_content.as_str(), None),
                };
                if var_name.is_empty() {
                    return Err(ConfigError::EnvExpand("empty variable name in ${}".into()));
                }

                match std::env::var(var_name) {
                    Ok(val) => result.push_str(&val),
                    Err(_) => match default_value {
                        Some(default) => result.push_str(default),
                        None => {
                            return Err(ConfigError::EnvExpand(format!(
                                "required environment variable not set: {var_name}"
                            )));
                        }
                    },
                }
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_value_no_variables() {
        assert_eq!(expand_env_value("hello world").unwrap(), "hello world");
    }

    #[test]
    fn expand_env_value_escaped_dollar() {
        assert_eq!(expand_env_value("price is $$100").unwrap(), "price is $100");
    }

    #[test]
    fn expand_env_value_default_used_when_unset() {
        assert_eq!(
            expand_env_value("${_FF_TEST_MISSING:-fallback}").unwrap(),
            "fallback"
        );
    }

    #[test]
    fn expand_env_value_unset_without_default_errors() {
        let err = expand_env_value("${_FF_TEST_MISSING_2}").unwrap_err();
        assert!(matches!(err, ConfigError::EnvExpand(_)));
    }

    #[test]
    fn expand_env_value_set_var() {
        // SAFETY: test-local var, no other thread in this process touches it.
        unsafe { std::env::set_var("_FF_TEST_SET", "value") };
        assert_eq!(expand_env_value("${_FF_TEST_SET}").unwrap(), "value");
        unsafe { std::env::remove_var("_FF_TEST_SET") };
    }

    #[test]
    fn merge_overrides_toml_with_cli() {
        let toml_config = load_toml(Path::new("/nonexistent/path/should/not/exist.toml")).unwrap();
        let mut cli = RunArgs::default();
        cli.fstests = Some(PathBuf::from("/fstests"));
        cli.mkosi_num = Some(2);
        let merged = merge_run_config(&cli, None, toml_config).unwrap();
        assert_eq!(merged.fstests, Some(PathBuf::from("/fstests")));
        assert_eq!(merged.mkosi.num, 2);
    }

    #[test]
    fn missing_fstests_is_a_config_error() {
        let cli = RunArgs::default();
        let err = merge_run_config(&cli, None, Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFstests));
    }

    #[test]
    fn randomize_and_slowest_first_conflict() {
        let mut cli = RunArgs::default();
        cli.fstests = Some(PathBuf::from("/fstests"));
        cli.mkosi_num = Some(1);
        cli.randomize = true;
        cli.slowest_first = Some("latest".into());
        let err = merge_run_config(&cli, None, Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingFlags(_, _)));
    }
}
