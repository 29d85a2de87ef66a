//! Supervisor backed by a host that is already up, reached over plain
//! `ssh`/`scp`, one supervisor per host.
//!
//! Unlike [`crate::supervisors::mkosi`], there is no VM lifecycle to
//! manage: `acquire` just confirms the host answers, and `release` is a
//! no-op. `fstests_path` is the remote checkout the runner `cd`s into
//! before `./check`, matching [`crate::test::Test::command`]'s shape.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::result::{TestResult, TestStatus};
use crate::supervisor::{ByteSink, Supervisor, SupervisorError, SupervisorResult, TraceHandle};
use crate::test::Test;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ARTIFACT_TIMEOUT: Duration = Duration::from_secs(10);

const SSH_OPTS: &[&str] = &[
    "-o",
    "BatchMode=yes",
    "-o",
    "ConnectTimeout=10",
    "-o",
    "StrictHostKeyChecking=accept-new",
];

pub struct SshSupervisor {
    host: String,
    exited: bool,
}

impl SshSupervisor {
    pub fn new(host: String, _fstests_path: String) -> Self {
        SshSupervisor {
            host,
            exited: false,
        }
    }

    fn ssh_command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(SSH_OPTS);
        cmd.arg(&self.host);
        cmd.arg(remote);
        cmd
    }
}

#[async_trait(?Send)]
impl Supervisor for SshSupervisor {
    fn name(&self) -> &str {
        &self.host
    }

    async fn acquire(&mut self, timeout: Duration) -> SupervisorResult<()> {
        let probe = self.ssh_command("echo ready").output();
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            _ => {
                self.exited = true;
                Err(SupervisorError::Timeout)
            }
        }
    }

    async fn release(&mut self) {
        // Hosts outlive the run; nothing to tear down.
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
                if tokio::fs::create_dir_all(destination_dir).await.is_err() {
                    continue;
                }
                let local_path = destination_dir.join(
                    Path::new(remote_path)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| remote_path.replace('/', "_")),
                );
                let remote_spec = format!("{}:{}", self.host, crate::supervisors::shell_quote(remote_path));
                let scp = tokio::time::timeout(
                    ARTIFACT_TIMEOUT,
                    Command::new("scp")
                        .args(SSH_OPTS)
                        .arg("-r")
                        .arg(&remote_spec)
                        .arg(&local_path)
                        .output(),
                )
                .await;
                let _ = scp;
            }
        }
        Ok(())
    }

    fn exited(&self) -> bool {
        self.exited
    }
}
