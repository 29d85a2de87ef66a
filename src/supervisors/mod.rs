//! Concrete Supervisor implementations: `mkosi`-spawned local qemu guests
//! and plain SSH hosts that are already up.

pub mod mkosi;
pub mod ssh;

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::Config;
use crate::supervisor::{Supervisor, SupervisorError, SupervisorResult};

/// Single-quote a string for safe interpolation into a remote shell
/// command.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Spawn `cmd` with piped stdout/stderr and run it to completion, bounded
/// by `timeout` (`None` = unbounded). Returns `Ok(None)` on timeout, having
/// killed the child first — the spec requires a timed-out `run_test` to
/// never leave the remote command running. `cmd.wait_with_output()` would
/// consume the child before a timeout could be detected, so this keeps the
/// child alive (via `&mut`) across the race instead.
pub(crate) async fn run_killable(mut cmd: Command, timeout: Option<Duration>) -> SupervisorResult<Option<std::process::Output>> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    let mut child = cmd.spawn().map_err(|_| SupervisorError::ChannelGone)?;
    let mut child_stdout = child.stdout.take();
    let mut child_stderr = child.stderr.take();

    let wait = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let (_, _, status) = tokio::join!(
            async {
                if let Some(s) = &mut child_stdout {
                    let _ = s.read_to_end(&mut stdout).await;
                }
            },
            async {
                if let Some(s) = &mut child_stderr {
                    let _ = s.read_to_end(&mut stderr).await;
                }
            },
            child.wait(),
        );
        status.map(|status| std::process::Output { status, stdout, stderr })
    };

    match timeout {
        Some(t) => match tokio::time::timeout(t, wait).await {
            Ok(result) => Ok(Some(result.map_err(SupervisorError::from)?)),
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(None)
            }
        },
        None => Ok(Some(wait.await.map_err(SupervisorError::from)?)),
    }
}

/// Materialize the configured set of Supervisors. Keeps the Runner
/// decoupled from which concrete VM driver is in play.
pub fn build_supervisors(config: &Config) -> Vec<Box<dyn Supervisor>> {
    let mut supervisors: Vec<Box<dyn Supervisor>> = Vec::new();

    if config.mkosi.num > 0 {
        for m in mkosi::MkosiSupervisor::from_config(config) {
            supervisors.push(Box::new(m));
        }
    }

    for vm in &config.custom_vm.vms {
        supervisors.push(Box::new(ssh::SshSupervisor::new(
            vm.host.clone(),
            vm.path.clone(),
        )));
    }

    supervisors
}
