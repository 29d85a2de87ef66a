//! Terminal rendering for [`super::Output`]: an `indicatif::MultiProgress`
//! plus `console::style` coloring.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::result::{TestResult, TestStatus};
use crate::supervisor::ByteSink;
use crate::test::Test;

use super::Output;

struct Summary {
    passed: Vec<TestResult>,
    failed: Vec<TestResult>,
    skipped: Vec<TestResult>,
    errored: Vec<TestResult>,
    retries: HashMap<String, u32>,
}

impl Summary {
    fn new() -> Self {
        Summary {
            passed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            errored: Vec::new(),
            retries: HashMap::new(),
        }
    }
}

pub struct ConsoleOutput {
    results_dir: Option<PathBuf>,
    verbose: bool,
    print_failure_list: bool,
    print_n_slowest: Option<usize>,
    print_duration_hist: bool,

    multi: MultiProgress,
    overall: RefCell<Option<ProgressBar>>,
    supervisor_bars: RefCell<HashMap<String, ProgressBar>>,
    summary: RefCell<Summary>,
}

impl ConsoleOutput {
    pub fn new(
        results_dir: Option<PathBuf>,
        verbose: bool,
        print_failure_list: bool,
        print_n_slowest: Option<usize>,
        print_duration_hist: bool,
    ) -> Self {
        ConsoleOutput {
            results_dir,
            verbose,
            print_failure_list,
            print_n_slowest,
            print_duration_hist,
            multi: MultiProgress::new(),
            overall: RefCell::new(None),
            supervisor_bars: RefCell::new(HashMap::new()),
            summary: RefCell::new(Summary::new()),
        }
    }

    fn overall_bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap()
        .progress_chars("#>-")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]").unwrap()
    }

    fn open_sink(&self, test: &Test, file_name: &str) -> ByteSink {
        let dir = match &self.results_dir {
            Some(results_dir) => super::attempt_dir(results_dir, test),
            None => {
                return Box::new(tokio::io::sink());
            }
        };
        match std::fs::File::create(dir.join(file_name)) {
            Ok(file) => Box::new(tokio::fs::File::from_std(file)),
            Err(_) => Box::new(tokio::io::sink()),
        }
    }

    fn duration_text(seconds: f64) -> String {
        let total = seconds.max(0.0).round() as u64;
        format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}

impl Output for ConsoleOutput {
    fn spawning_supervisors(&self, total: usize) {
        self.multi.println("").ok();
        self.multi.println(format!("{}", style(" Setting up").bold())).ok();
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(Self::overall_bar_style());
        bar.set_message("Spawning supervisors...");
        *self.overall.borrow_mut() = Some(bar);
    }

    fn spawned_supervisor(&self, name: &str, ok: bool) {
        if let Some(bar) = self.overall.borrow().as_ref() {
            bar.inc(1);
        }
        let verb = if ok { style("spawn").green().bold() } else { style("failed").red().bold() };
        self.multi.println(format!("  {verb} {name}")).ok();
    }

    fn respawning_supervisor(&self, name: &str) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(Self::spinner_style());
        bar.set_message(format!("respawning {name}"));
        bar.enable_steady_tick(Duration::from_millis(120));
        self.supervisor_bars.borrow_mut().insert(name.to_string(), bar);
    }

    fn respawned_supervisor(&self, name: &str, ok: bool) {
        if let Some(bar) = self.supervisor_bars.borrow_mut().remove(name) {
            bar.finish_and_clear();
        }
        let verb = if ok { style("respawn").green().bold() } else { style("respawn failed").red().bold() };
        self.multi.println(format!("  {verb} {name}")).ok();
    }

    fn exiting_supervisors(&self, total: usize) {
        self.multi.println("").ok();
        self.multi.println(format!("{}", style(" Cleaning up").bold())).ok();
        if let Some(bar) = self.overall.borrow().as_ref() {
            bar.set_length(total as u64);
            bar.set_position(0);
            bar.set_message("Exiting supervisors...");
        }
    }

    fn exited_supervisor(&self, name: &str) {
        if let Some(bar) = self.overall.borrow().as_ref() {
            bar.inc(1);
        }
        self.multi.println(format!("  {} {name}", style("exit").green().bold())).ok();
    }

    fn supervisor_died(&self, name: &str, test_name: Option<&str>) {
        match test_name {
            Some(test) => {
                self.multi
                    .println(format!("  {} {name} (running {test})", style("died").red().bold()))
                    .ok();
            }
            None => {
                self.multi.println(format!("  {} {name}", style("died").red().bold())).ok();
            }
        }
    }

    fn running_tests(&self, total: usize) {
        self.multi.println("").ok();
        self.multi.println(format!("{}", style(" Testing").bold())).ok();
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(Self::overall_bar_style());
        bar.set_message("Running tests...");
        *self.overall.borrow_mut() = Some(bar);
    }

    fn running_test(&self, test: &Test, supervisor: &str) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(Self::spinner_style());
        bar.set_message(format!("{} on {supervisor}", test.name));
        bar.enable_steady_tick(Duration::from_millis(120));
        self.supervisor_bars.borrow_mut().insert(test.name.clone(), bar);
    }

    fn test_sinks(&self, test: &Test) -> (ByteSink, ByteSink) {
        (self.open_sink(test, "stdout"), self.open_sink(test, "stderr"))
    }

    fn dmesg_sinks(&self, test: &Test) -> (ByteSink, ByteSink) {
        (self.open_sink(test, "dmesg"), self.open_sink(test, "dmesg-stderr"))
    }

    fn bpftrace_sinks(&self, test: &Test) -> (ByteSink, ByteSink) {
        (self.open_sink(test, "bpftrace-stdout"), self.open_sink(test, "bpftrace-stderr"))
    }

    fn artifact_dir(&self, test: &Test) -> PathBuf {
        let dir = match &self.results_dir {
            Some(results_dir) => super::attempt_dir(results_dir, test).join("artifacts"),
            None => std::env::temp_dir().join("fast-fstests-artifacts").join(&test.name),
        };
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn finished_test(&self, test: &Test, result: &TestResult) {
        if let Some(bar) = self.supervisor_bars.borrow_mut().remove(&test.name) {
            bar.finish_and_clear();
        }
        if let Some(bar) = self.overall.borrow().as_ref() {
            bar.inc(1);
        }

        if let Some(results_dir) = &self.results_dir {
            let dir = super::attempt_dir(results_dir, test);
            super::write_result_files(&dir, result);
            let retries = *self.summary.borrow().retries.get(&test.name).unwrap_or(&0);
            super::write_retries_file(&dir, retries);
            super::update_latest(results_dir, test);
        }

        let line = match result.status {
            TestStatus::Pass => format!("  {} {} {}", style("pass").green().bold(), test.name, style(Self::duration_text(result.duration)).yellow()),
            TestStatus::Fail => format!("  {} {} {}", style("fail").red().bold(), test.name, style(Self::duration_text(result.duration)).yellow()),
            TestStatus::Skip => format!(
                "  {} {} {} {}",
                style("skip").yellow().bold(),
                test.name,
                style(Self::duration_text(result.duration)).yellow(),
                style(result.summary.as_deref().unwrap_or_default()).dim(),
            ),
            TestStatus::Error => format!("  {} {} {}", style("error").magenta().bold(), test.name, style(Self::duration_text(result.duration)).yellow()),
        };
        self.multi.println(line).ok();

        let mut summary = self.summary.borrow_mut();
        match result.status {
            TestStatus::Pass => summary.passed.push(result.clone()),
            TestStatus::Fail => summary.failed.push(result.clone()),
            TestStatus::Skip => summary.skipped.push(result.clone()),
            TestStatus::Error => summary.errored.push(result.clone()),
        }
    }

    fn record_retry(&self, test: &Test, error_result: &TestResult) {
        if let Some(results_dir) = &self.results_dir {
            let dir = super::attempt_dir(results_dir, test);
            super::write_result_files(&dir, error_result);
        }
        *self.summary.borrow_mut().retries.entry(test.name.clone()).or_insert(0) += 1;
        if self.verbose {
            self.multi
                .println(format!("  {} {} (will retry)", style("retry").yellow().bold(), test.name))
                .ok();
        }
    }

    fn print_summary(&self) {
        let summary = self.summary.borrow();

        for result in summary.failed.iter().chain(summary.errored.iter()) {
            let label = if result.status == TestStatus::Fail {
                style("Failed:").red().bold()
            } else {
                style("Error:").magenta().bold()
            };
            println!();
            println!("{label} {}", result.name);
            if let Some(results_dir) = &self.results_dir {
                println!("  full results: {}", results_dir.join("tests").join(&result.name).display());
            }
            println!("  retcode: {:?}", result.retcode);
            if let Some(stdout) = &result.stdout {
                println!("  stdout:\n{}", String::from_utf8_lossy(stdout));
            }
            if let Some(stderr) = &result.stderr {
                println!("  stderr:\n{}", String::from_utf8_lossy(stderr));
            }
        }

        if self.print_failure_list && !summary.failed.is_empty() {
            println!();
            println!("{}", style("Failed tests:").red().bold());
            for result in &summary.failed {
                println!("  {}", result.name);
            }
        }

        if let Some(n) = self.print_n_slowest {
            let mut all: Vec<&TestResult> = summary
                .passed
                .iter()
                .chain(summary.failed.iter())
                .chain(summary.skipped.iter())
                .chain(summary.errored.iter())
                .collect();
            all.sort_by(|a, b| b.duration.partial_cmp(&a.duration).unwrap());
            println!();
            println!("{}", style(format!("Slowest {n} tests:")).bold());
            for result in all.into_iter().take(n) {
                println!("  {} {}", Self::duration_text(result.duration), result.name);
            }
        }

        if self.print_duration_hist {
            print_duration_histogram(&summary);
        }

        println!();
        println!("{}", style(" Summary").bold());
        if !summary.passed.is_empty() {
            println!("  {}: {}", style("Passed").green().bold(), summary.passed.len());
        }
        if !summary.skipped.is_empty() {
            println!("  {}: {}", style("Skipped").yellow().bold(), summary.skipped.len());
        }
        if !summary.failed.is_empty() {
            println!("  {}: {}", style("Failed").red().bold(), summary.failed.len());
        }
        if !summary.errored.is_empty() {
            println!("  {}: {}", style("Errored").magenta().bold(), summary.errored.len());
        }
    }

    fn print_exception(&self, message: &str) {
        eprintln!("{} {message}", style("error:").red().bold());
    }

    fn keeping_alive(&self) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(Self::spinner_style());
        bar.set_message("Keeping alive... (ctrl-C to end)");
        bar.enable_steady_tick(Duration::from_millis(120));
        self.supervisor_bars.borrow_mut().insert("__keep_alive__".to_string(), bar);
    }
}

fn print_duration_histogram(summary: &Summary) {
    const BUCKETS: &[(&str, f64, f64)] = &[
        ("<1s", 0.0, 1.0),
        ("1-5s", 1.0, 5.0),
        ("5-30s", 5.0, 30.0),
        ("30-120s", 30.0, 120.0),
        (">120s", 120.0, f64::INFINITY),
    ];
    let all: Vec<&TestResult> = summary
        .passed
        .iter()
        .chain(summary.failed.iter())
        .chain(summary.skipped.iter())
        .chain(summary.errored.iter())
        .collect();

    println!();
    println!("{}", style("Duration histogram:").bold());
    for (label, lo, hi) in BUCKETS {
        let count = all.iter().filter(|r| r.duration >= *lo && r.duration < *hi).count();
        let bar: String = std::iter::repeat('#').take(count.min(60)).collect();
        println!("  {label:>8}  {bar} {count}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(status: TestStatus, duration: f64) -> TestResult {
        TestResult {
            name: "btrfs/001".into(),
            status,
            duration,
            timestamp: Utc::now(),
            summary: None,
            retcode: Some(0),
            stdout: Some(Vec::new()),
            stderr: Some(Vec::new()),
        }
    }

    #[test]
    fn finished_test_persists_and_updates_latest() {
        let dir = tempfile::tempdir().unwrap();
        let output = ConsoleOutput::new(Some(dir.path().to_path_buf()), false, false, None, false);
        let test = Test::new("btrfs/001", "true", vec![]);

        output.running_tests(1);
        output.running_test(&test, "ff-0-abc");
        output.finished_test(&test, &result(TestStatus::Pass, 2.0));

        let latest_status = dir.path().join("latest").join("btrfs/001").join("status");
        assert!(latest_status.exists() || dir.path().join("latest/btrfs/001.tmp-symlink").exists());
    }

    #[test]
    fn record_retry_increments_counter_without_touching_latest() {
        let dir = tempfile::tempdir().unwrap();
        let output = ConsoleOutput::new(Some(dir.path().to_path_buf()), false, false, None, false);
        let test = Test::new("btrfs/001", "true", vec![]);

        output.record_retry(&test, &result(TestStatus::Error, 1.0));
        assert_eq!(*output.summary.borrow().retries.get("btrfs/001").unwrap(), 1);
        assert!(!dir.path().join("latest").exists());
    }

    #[test]
    fn duration_text_formats_hms() {
        assert_eq!(ConsoleOutput::duration_text(65.0), "00:01:05");
    }
}
