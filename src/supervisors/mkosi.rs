//! Supervisor backed by a locally-spawned `mkosi ... qemu` guest.
//!
//! `acquire` spawns the qemu child and polls `mkosi ssh` until it
//! answers; `run_test` and `probe` proxy through `mkosi ssh`; artifacts
//! are read back with `cat` since `mkosi ssh` exposes no `scp`-equivalent.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::sleep;

use crate::config::Config;
use crate::result::{TestResult, TestStatus};
use crate::supervisor::{ByteSink, Supervisor, SupervisorError, SupervisorResult, TraceHandle};
use crate::test::Test;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ARTIFACT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MkosiSupervisor {
    name: String,
    mkosi_config: Option<String>,
    options: Vec<String>,
    child: Option<Child>,
    exited: bool,
}

impl MkosiSupervisor {
    /// One instance per `config.mkosi.num`, named `ff-<index>-<suffix>`.
    pub fn from_config(config: &Config) -> Vec<MkosiSupervisor> {
        (0..config.mkosi.num)
            .map(|i| {
                let suffix: String = {
                    let mut rng = rand::thread_rng();
                    (0..8)
                        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
                        .collect::<String>()
                        .to_lowercase()
                };
                MkosiSupervisor {
                    name: format!("ff-{i}-{suffix}"),
                    mkosi_config: config.mkosi.config.clone(),
                    options: config.mkosi.options.clone(),
                    child: None,
                    exited: false,
                }
            })
            .collect()
    }

    fn mkosi_command(&self) -> Command {
        let mut cmd = Command::new("mkosi");
        cmd.arg("--machine").arg(&self.name);
        if let Some(config) = &self.mkosi_config {
            cmd.arg("--config").arg(config);
        }
        for opt in &self.options {
            cmd.arg(opt);
        }
        cmd
    }

    fn ssh_command(&self, remote: &str) -> Command {
        let mut cmd = self.mkosi_command();
        cmd.arg("ssh").arg(remote);
        cmd
    }

    async fn wait_for_machine(&self, overall_timeout: Duration) -> SupervisorResult<()> {
        let deadline = Instant::now() + overall_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SupervisorError::Timeout);
            }
            let probe = self.ssh_command("echo ready").output();
            match tokio::time::timeout(remaining.min(Duration::from_secs(5)), probe).await {
                Ok(Ok(output)) if output.status.success() => return Ok(()),
                _ => sleep(Duration::from_secs(1)).await,
            }
        }
    }
}

#[async_trait(?Send)]
impl Supervisor for MkosiSupervisor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&mut self, timeout: Duration) -> SupervisorResult<()> {
        let mut cmd = self.mkosi_command();
        cmd.arg("qemu");
        let child = cmd.spawn().map_err(|_| SupervisorError::ProcessExited)?;
        self.child = Some(child);

        match self.wait_for_machine(timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }

    async fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(3), child.wait()).await;
        }
        self.exited = true;
    }

    async fn run_test(
        &self,
        test: &Test,
        timeout: Option<Duration>,
        stdout: &mut ByteSink,
        stderr: &mut ByteSink,
    ) -> SupervisorResult<TestResult> {
        let start = Instant::now();
        let cmd = self.ssh_command(&test.command);

        let output = match crate::supervisors::run_killable(cmd, timeout).await? {
            Some(output) => output,
            None => {
                let duration = start.elapsed().as_secs_f64();
                return Ok(TestResult::from_error(
                    &test.name,
                    "timed out",
                    duration,
                    chrono::Utc::now(),
                ));
            }
        };

        stdout.write_all(&output.stdout).await.ok();
        stderr.write_all(&output.stderr).await.ok();
        let duration = start.elapsed().as_secs_f64();
        let retcode = output.status.code().unwrap_or(-1);
        let status = if retcode == 0 {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        };

        Ok(TestResult {
            name: test.name.clone(),
            status,
            duration,
            timestamp: chrono::Utc::now(),
            summary: None,
            retcode: Some(retcode),
            stdout: Some(output.stdout),
            stderr: Some(output.stderr),
        })
    }

    async fn probe(&self) -> bool {
        let probe = self.ssh_command("echo ready").output();
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, probe).await,
            Ok(Ok(output)) if output.status.success()
        )
    }

    async fn trace(
        &self,
        command: Option<&str>,
        mut stdout: ByteSink,
        mut stderr: ByteSink,
    ) -> SupervisorResult<TraceHandle> {
        let Some(command) = command else {
            return Ok(TraceHandle::none());
        };
        let mut cmd = self.ssh_command(command);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let mut child = cmd.spawn().map_err(SupervisorError::from)?;

        if let Some(mut child_out) = child.stdout.take() {
            tokio::task::spawn_local(async move {
                let _ = tokio::io::copy(&mut child_out, &mut stdout).await;
            });
        }
        if let Some(mut child_err) = child.stderr.take() {
            tokio::task::spawn_local(async move {
                let _ = tokio::io::copy(&mut child_err, &mut stderr).await;
            });
        }

        Ok(TraceHandle::new(child))
    }

    async fn collect_artifacts(&self, test: &Test, destination_dir: &Path) -> SupervisorResult<()> {
        for pattern in &test.artifact_patterns {
            let list_cmd = format!("ls -1 {pattern} 2>/dev/null");
            let listing = tokio::time::timeout(ARTIFACT_TIMEOUT, self.ssh_command(&list_cmd).output()).await;
            let Ok(Ok(listing)) = listing else { continue };
            if !listing.status.success() {
                continue;
            }
            for remote_path in String::from_utf8_lossy(&listing.stdout).lines() {
                let remote_path = remote_path.trim();
                if remote_path.is_empty() {
                    continue;
                }
                let cat_cmd = format!("cat {}", crate::supervisors::shell_quote(remote_path));
                let contents = tokio::time::timeout(ARTIFACT_TIMEOUT, self.ssh_command(&cat_cmd).output()).await;
                let Ok(Ok(contents)) = contents else { continue };
                if !contents.status.success() {
                    continue;
                }
                let file_name = Path::new(remote_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| remote_path.replace('/', "_"));
                if tokio::fs::create_dir_all(destination_dir).await.is_err() {
                    continue;
                }
                let _ = tokio::fs::write(destination_dir.join(file_name), contents.stdout).await;
            }
        }
        Ok(())
    }

    fn exited(&self) -> bool {
        self.exited
    }
}
