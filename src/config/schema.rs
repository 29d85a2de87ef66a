//! Configuration schema for `fast-fstests`.
//!
//! This mirrors the CLI surface almost exactly: every field here has a
//! corresponding flag in [`crate::cli::RunArgs`], and CLI-overrides-TOML-
//! overrides-defaults is implemented by [`super::merge_run_config`].
//!
//! ```text
//! Config (root)
//! ├── fstests, results_dir, keep_alive
//! ├── TestSelectionConfig   - positional tests, groups, excludes, ordering
//! ├── MkosiConfig           - local qemu VM driver options
//! ├── CustomVmConfig        - plain-SSH VM driver options
//! ├── TestRunnerConfig      - timeouts, probing, restart cap, tracing
//! └── OutputConfig          - results rendering and recording
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for `fast-fstests`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Path to the fstests checkout (used by the plain-SSH driver and for
    /// building each `Test`'s artifact glob pattern).
    pub fstests: Option<PathBuf>,

    /// Directory results, logs, and recordings are written under.
    pub results_dir: Option<PathBuf>,

    /// Keep supervisors running after the run completes (debugging).
    #[serde(default)]
    pub keep_alive: bool,

    #[serde(default)]
    pub test_selection: TestSelectionConfig,
    #[serde(default)]
    pub mkosi: MkosiConfig,
    #[serde(default)]
    pub custom_vm: CustomVmConfig,
    #[serde(default)]
    pub test_runner: TestRunnerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which tests get selected and in what order. See [`crate::selection`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestSelectionConfig {
    /// Positional test names/globs, e.g. `btrfs/001` or `generic/[0-9]*`.
    #[serde(default)]
    pub tests: Vec<String>,
    /// `-g GROUP,...`
    #[serde(default)]
    pub groups: Vec<String>,
    /// `-e TEST,...`
    #[serde(default)]
    pub exclude_tests: Vec<String>,
    /// `-E FILE`
    pub exclude_tests_file: Option<PathBuf>,
    /// `-x GROUP,...`
    #[serde(default)]
    pub exclude_groups: Vec<String>,
    /// `-s SECTION`
    pub section: Option<String>,
    /// `-S SECTION`
    pub exclude_section: Option<String>,
    /// `-r`
    #[serde(default)]
    pub randomize: bool,
    /// `-i N`, must be >= 1.
    #[serde(default = "default_iterate")]
    pub iterate: u32,
    /// `-l`: print the selected test names and exit without running.
    #[serde(default)]
    pub list: bool,
    /// `--file-system NAME`: keep only tests containing NAME or "generic".
    pub file_system: Option<String>,
}

fn default_iterate() -> u32 {
    1
}

/// The `mkosi`-spawned local qemu VM driver.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MkosiConfig {
    /// `--mkosi-num N`: how many local qemu guests to spawn.
    #[serde(default)]
    pub num: usize,
    /// `--mkosi-config PATH`: directory `mkosi` is invoked from.
    pub config: Option<String>,
    /// `--mkosi-options ...`: extra arguments forwarded to `mkosi`.
    #[serde(default)]
    pub options: Vec<String>,
    /// `--mkosi-fstests PATH`: fstests checkout path inside the guest.
    pub fstests: Option<PathBuf>,
    /// `--mkosi-timeout SECS`: bound on bringing a guest up.
    #[serde(default = "default_mkosi_timeout")]
    pub timeout: u64,
    /// `-f`/`--build`: force a rebuild of the mkosi image before spawning.
    #[serde(default)]
    pub build: bool,
}

fn default_mkosi_timeout() -> u64 {
    30
}

/// The plain-SSH VM driver: hosts that are already up.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CustomVmConfig {
    /// `--vms HOST:PATH,...`
    #[serde(default)]
    pub vms: Vec<VmSpec>,
}

/// One `HOST:PATH` pair from `--vms`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VmSpec {
    pub host: String,
    pub path: String,
}

impl std::str::FromStr for VmSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, path) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HOST:PATH, got {s:?}"))?;
        Ok(VmSpec {
            host: host.to_string(),
            path: path.to_string(),
        })
    }
}

/// Scheduler and crash-recovery knobs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestRunnerConfig {
    /// `--test-timeout SECS`; `None` is unbounded.
    pub test_timeout: Option<u64>,
    /// `--probe-interval SECS`; 0 disables probing.
    #[serde(default)]
    pub probe_interval: u64,
    /// `--max-supervisor-restarts N`; 0 disables restart.
    #[serde(default)]
    pub max_supervisor_restarts: u32,
    /// `--dmesg`
    #[serde(default)]
    pub dmesg: bool,
    /// `--bpftrace EXPR`
    pub bpftrace: Option<String>,
    /// `--bpftrace-script PATH`
    pub bpftrace_script: Option<PathBuf>,
}

impl TestRunnerConfig {
    /// Resolve `bpftrace`/`bpftrace_script` into the single command string
    /// [`crate::supervisor::Supervisor::trace`] expects.
    pub fn trace_command(&self) -> Option<String> {
        match (&self.bpftrace, &self.bpftrace_script) {
            (Some(expr), None) => Some(format!("bpftrace -e {expr}")),
            (None, Some(script)) => Some(format!("bpftrace {}", script.display())),
            _ => None,
        }
    }
}

/// Rendering, persistence, and recording behavior.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    /// `-v`/`--verbose`
    #[serde(default)]
    pub verbose: bool,
    /// `--record LABEL`: snapshot `latest/` into `recordings/<label>/`
    /// after the run completes.
    pub record: Option<String>,
    /// `--slowest-first {N | latest | LABEL}`: reorder the selected tests
    /// using a recording's durations before dispatch.
    pub slowest_first: Option<String>,
    /// `--retry-failures N`: re-run tests that ended FAIL/ERROR up to N
    /// additional times at the end of the run.
    #[serde(default)]
    pub retry_failures: u32,
    #[serde(default)]
    pub print_failure_list: bool,
    pub print_n_slowest: Option<usize>,
    #[serde(default)]
    pub print_duration_hist: bool,
}
