//! `clap`-derived CLI surface, mirrored field-for-field by the TOML config
//! schema in [`crate::config`]. CLI flags override the TOML file, which
//! overrides the defaults baked into [`crate::config::Config`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ff")]
#[command(about = "Parallel filesystem-regression test runner over a pool of ephemeral VMs")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file. Defaults to `$FAST_FSTESTS_CONFIG_PATH`
    /// or `config.toml` in the current directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Results directory (results, logs, and recordings are read/written
    /// under it). Shared by `run`, `record`, and `compare`.
    #[arg(long, global = true)]
    pub results_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run tests (the default when no subcommand is given).
    Run(RunArgs),
    /// Snapshot `latest/` into `recordings/<label>/`.
    Record(RecordArgs),
    /// Print a structured diff between two recordings.
    Compare(CompareArgs),
}

#[derive(Parser, Default, Clone)]
pub struct RunArgs {
    /// Path to the fstests checkout.
    #[arg(long)]
    pub fstests: Option<PathBuf>,

    /// Space-separated test names/globs, e.g. `btrfs/001 generic/0[0-5]*`.
    pub tests: Vec<String>,

    /// Comma-separated list of groups to include.
    #[arg(short = 'g', long, value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Comma-separated list of tests to exclude.
    #[arg(short = 'e', long, value_delimiter = ',')]
    pub exclude_tests: Vec<String>,

    /// File containing one excluded test name per line.
    #[arg(short = 'E', long)]
    pub exclude_tests_file: Option<PathBuf>,

    /// Comma-separated list of groups to exclude.
    #[arg(short = 'x', long, value_delimiter = ',')]
    pub exclude_groups: Vec<String>,

    /// Only include this fstests section.
    #[arg(short = 's', long)]
    pub section: Option<String>,

    /// Exclude this fstests section.
    #[arg(short = 'S', long)]
    pub exclude_section: Option<String>,

    /// Randomize the dispatch order.
    #[arg(short = 'r', long)]
    pub randomize: bool,

    /// Run each selected test this many times.
    #[arg(short = 'i', long)]
    pub iterate: Option<u32>,

    /// List the selected tests and exit without running anything.
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Keep only tests naming this filesystem (or "generic").
    #[arg(long = "file-system")]
    pub file_system: Option<String>,

    /// Number of mkosi-spawned local qemu guests.
    #[arg(long)]
    pub mkosi_num: Option<usize>,

    /// Directory `mkosi` is invoked from.
    #[arg(long)]
    pub mkosi_config: Option<String>,

    /// Extra arguments forwarded verbatim to `mkosi`.
    #[arg(long, value_delimiter = ' ')]
    pub mkosi_options: Vec<String>,

    /// fstests checkout path inside the mkosi guest.
    #[arg(long)]
    pub mkosi_fstests: Option<PathBuf>,

    /// Timeout in seconds for bringing an mkosi guest up.
    #[arg(long)]
    pub mkosi_timeout: Option<u64>,

    /// Force a rebuild of the mkosi image before spawning.
    #[arg(short = 'f', long)]
    pub build: bool,

    /// Comma-separated `HOST:PATH` pairs of already-running SSH hosts.
    #[arg(long, value_delimiter = ',')]
    pub vms: Vec<String>,

    /// Keep supervisors up after the run completes, for debugging.
    #[arg(long)]
    pub keep_alive: bool,

    /// Per-test timeout in seconds.
    #[arg(long)]
    pub test_timeout: Option<u64>,

    /// bpftrace expression, e.g. `kprobe:vfs_open { printf("..\n") }`.
    #[arg(long, conflicts_with = "bpftrace_script")]
    pub bpftrace: Option<String>,

    /// Path to a bpftrace script.
    #[arg(long)]
    pub bpftrace_script: Option<PathBuf>,

    /// Probe interval in seconds; 0 disables liveness probing.
    #[arg(long)]
    pub probe_interval: Option<u64>,

    /// Restart cap per test; 0 disables automatic respawn.
    #[arg(long)]
    pub max_supervisor_restarts: Option<u32>,

    /// Capture `dmesg -W` for each test.
    #[arg(long)]
    pub dmesg: bool,

    /// Verbose logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Snapshot `latest/` into `recordings/<label>/` after the run.
    #[arg(long)]
    pub record: Option<String>,

    /// Reorder dispatch using a prior recording's durations, slowest first.
    /// Accepts an index (`0` = most recent), `latest`, or a label.
    #[arg(long, conflicts_with = "randomize")]
    pub slowest_first: Option<String>,

    /// Re-run FAIL/ERROR tests up to N additional times after the run.
    #[arg(long)]
    pub retry_failures: Option<u32>,

    #[arg(long)]
    pub print_failure_list: bool,

    #[arg(long)]
    pub print_n_slowest: Option<usize>,

    #[arg(long)]
    pub print_duration_hist: bool,
}

#[derive(Parser)]
pub struct RecordArgs {
    /// Label for the recording; defaults to the current timestamp.
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Parser)]
pub struct CompareArgs {
    /// Baseline recording (index, `latest`, or label). Defaults to the
    /// second-most-recent recording.
    #[arg(long)]
    pub baseline: Option<String>,

    /// Changed recording (index, `latest`, or label). Defaults to the
    /// most recent recording.
    #[arg(long)]
    pub changed: Option<String>,
}
