//! CLI entry point: parses arguments, resolves configuration, and drives
//! one of `run` (default), `record`, or `compare` on a single-threaded
//! `tokio` runtime plus `LocalSet` (workers below are `!Send`, see
//! `src/executor/mod.rs`).

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

use fast_fstests::cli::{Cli, Command, CompareArgs, RecordArgs, RunArgs};
use fast_fstests::config::{self, Config};
use fast_fstests::executor::{self, RunOptions};
use fast_fstests::output::{ConsoleOutput, Output};
use fast_fstests::recording::{self, Comparison, TimingDelta};
use fast_fstests::selection;
use fast_fstests::supervisors;
use fast_fstests::Test;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli {
        config: config_flag,
        results_dir,
        command,
        run,
    } = cli;

    let config_path = config_flag
        .or_else(|| std::env::var_os("FAST_FSTESTS_CONFIG_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let toml_config = config::load_toml(&config_path).context("loading config file")?;

    let command = command.unwrap_or(Command::Run(run));
    match command {
        Command::Run(run_args) => run(run_args, results_dir, toml_config),
        Command::Record(record_args) => record(record_args, results_dir, toml_config),
        Command::Compare(compare_args) => compare(compare_args, results_dir, toml_config),
    }
}

fn run(run_args: RunArgs, results_dir: Option<PathBuf>, toml_config: Config) -> Result<()> {
    let config =
        config::merge_run_config(&run_args, results_dir, toml_config).context("resolving configuration")?;

    init_tracing(config.results_dir.as_deref(), config.output.verbose);

    if config.test_selection.list {
        let tests = selection::collect_tests(&config).context("selecting tests")?;
        for test in &tests {
            println!("{}", test.name);
        }
        return Ok(());
    }

    let mut tests = selection::collect_tests(&config).context("selecting tests")?;

    if let Some(value) = &config.output.slowest_first {
        let dir = config
            .results_dir
            .as_deref()
            .context("--slowest-first requires --results-dir")?;
        let (path, _label) = recording::resolve_recording(value, dir)?;
        let recorded = recording::load_recording(&path)?;
        tests = recording::apply_slowest_first(tests, &recorded);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, run_tests(tests, config))
}

/// Drives the dispatch, an optional `--retry-failures` tail, and an
/// optional `--record` snapshot. Must run inside a `LocalSet` — the
/// supervisors spawned here are `!Send`.
async fn run_tests(tests: Vec<Test>, config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::task::spawn_local(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("received ctrl-c, winding down");
                cancel.cancel();
            }
        });
    }

    let output: Rc<dyn Output> = Rc::new(ConsoleOutput::new(
        config.results_dir.clone(),
        config.output.verbose,
        config.output.print_failure_list,
        config.output.print_n_slowest,
        config.output.print_duration_hist,
    ));

    let supervisors = supervisors::build_supervisors(&config);
    let options = RunOptions::from_config(&config);
    if let Err(err) = executor::run(tests, supervisors, output.clone(), options, cancel.clone()).await {
        output.print_exception(&err.to_string());
        return Err(err.into());
    }

    let mut remaining = config.output.retry_failures;
    while remaining > 0 && !cancel.is_cancelled() {
        let Some(results_dir) = config.results_dir.as_deref() else {
            break;
        };
        let latest = recording::load_recording(&results_dir.join("latest")).unwrap_or_default();
        let failing: Vec<Test> = latest
            .iter()
            .filter(|(_, r)| r.status.is_bad())
            .filter_map(|(name, _)| selection::test_for_name(name, &config))
            .collect();
        if failing.is_empty() {
            break;
        }
        tracing::info!(count = failing.len(), "retrying failed tests");

        let supervisors = supervisors::build_supervisors(&config);
        let options = RunOptions::from_config(&config);
        executor::run(failing, supervisors, output.clone(), options, cancel.clone()).await?;
        remaining -= 1;
    }

    if let Some(label) = &config.output.record {
        if let Some(results_dir) = &config.results_dir {
            recording::save_recording(results_dir, label).context("saving recording")?;
        }
    }

    Ok(())
}

fn record(args: RecordArgs, results_dir: Option<PathBuf>, toml_config: Config) -> Result<()> {
    let results_dir = results_dir
        .or(toml_config.results_dir)
        .context("--results-dir not specified")?;
    let label = args.label.unwrap_or_else(default_label);
    recording::save_recording(&results_dir, &label).context("saving recording")?;
    println!("saved recording {label}");
    Ok(())
}

fn compare(args: CompareArgs, results_dir: Option<PathBuf>, toml_config: Config) -> Result<()> {
    let results_dir = results_dir
        .or(toml_config.results_dir)
        .context("--results-dir not specified")?;

    let baseline_value = args.baseline.unwrap_or_else(|| "1".to_string());
    let changed_value = args.changed.unwrap_or_else(|| "0".to_string());

    let (baseline_path, baseline_label) = recording::resolve_recording(&baseline_value, &results_dir)
        .context("resolving baseline recording")?;
    let (changed_path, changed_label) = recording::resolve_recording(&changed_value, &results_dir)
        .context("resolving changed recording")?;

    let baseline = recording::load_recording(&baseline_path)?;
    let changed = recording::load_recording(&changed_path)?;

    let cmp = recording::compare(&baseline, &changed);
    print_comparison(&baseline_label, &changed_label, &cmp);

    if !cmp.regressions.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn default_label() -> String {
    chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn print_comparison(baseline: &str, changed: &str, cmp: &Comparison) {
    println!("{}", style(format!("comparing {baseline} -> {changed}")).bold());

    if cmp.is_empty() {
        println!("  no differences");
        return;
    }

    if !cmp.regressions.is_empty() {
        println!();
        println!("{}", style("Regressions:").red().bold());
        for (name, before, after) in &cmp.regressions {
            println!("  {name}: {} -> {}", before.as_str(), after.as_str());
        }
    }
    if !cmp.fixes.is_empty() {
        println!();
        println!("{}", style("Fixes:").green().bold());
        for (name, before, after) in &cmp.fixes {
            println!("  {name}: {} -> {}", before.as_str(), after.as_str());
        }
    }
    if !cmp.flaky.is_empty() {
        println!();
        println!("{}", style("Flaky:").yellow().bold());
        for (name, retries) in &cmp.flaky {
            println!("  {name}: passed after {retries} retries");
        }
    }
    if !cmp.new_in_b.is_empty() {
        println!();
        println!("{}", style("New tests:").bold());
        for name in &cmp.new_in_b {
            println!("  {name}");
        }
    }
    if !cmp.removed_from_b.is_empty() {
        println!();
        println!("{}", style("Removed tests:").bold());
        for name in &cmp.removed_from_b {
            println!("  {name}");
        }
    }
    if !cmp.timing_changes.is_empty() {
        println!();
        println!("{}", style("Timing changes:").bold());
        for (name, delta) in &cmp.timing_changes {
            match delta {
                TimingDelta::Slower(s) => println!("  {name}: +{s:.1}s"),
                TimingDelta::Faster(s) => println!("  {name}: -{s:.1}s"),
            }
        }
    }
}

/// Install a `tracing` subscriber: `RUST_LOG`-driven filtering, writing to
/// `<results_dir>/logs` when a results directory is known (the terminal is
/// busy with `indicatif` bars), stderr otherwise.
fn init_tracing(results_dir: Option<&std::path::Path>, verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" }));
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(dir) = results_dir {
        if std::fs::create_dir_all(dir).is_ok() {
            if let Ok(file) = std::fs::File::create(dir.join("logs")) {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(std::sync::Mutex::new(file)),
                    )
                    .init();
                return;
            }
        }
    }

    registry
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
