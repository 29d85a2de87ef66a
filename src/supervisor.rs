//! The `Supervisor` contract: the core's only view of a VM.
//!
//! Concrete implementations (mkosi-qemu, plain SSH) live under
//! [`crate::supervisors`]. The runner never depends on anything beyond
//! this trait.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::result::TestResult;
use crate::test::Test;

pub type ByteSink = Box<dyn AsyncWrite + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("timed out waiting for supervisor")]
    Timeout,
    #[error("command channel is gone")]
    ChannelGone,
    #[error("supervisor process exited")]
    ProcessExited,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// A running auxiliary trace (`dmesg -W`, `bpftrace ...`) scoped to one
/// test. Dropped without calling [`TraceHandle::stop`] as a last-resort
/// safety net; the primary teardown path is always the explicit call.
pub struct TraceHandle {
    child: Option<tokio::process::Child>,
}

impl TraceHandle {
    pub fn new(child: tokio::process::Child) -> Self {
        TraceHandle { child: Some(child) }
    }

    pub fn none() -> Self {
        TraceHandle { child: None }
    }

    /// Terminate the trace command, if any was started.
    pub async fn stop(mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

impl Drop for TraceHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Abstract handle to one isolated execution environment (typically a
/// VM). Lifecycle: not-acquired -> acquired -> exited. Exactly one
/// worker owns a given Supervisor at a time for `acquire`/`release`;
/// `run_test` and `probe` are deliberately `&self` so a worker can race
/// a liveness probe against an in-flight test (`tokio::select!` over a
/// shared `Rc<RefCell<Box<dyn Supervisor>>>`, see [`crate::executor`]) —
/// concurrent shared borrows are sound, concurrent exclusive ones are
/// not.
///
/// `?Send`: the runner drives all supervisors from a single
/// `tokio::task::LocalSet`, so trait objects never need to cross
/// threads.
#[async_trait(?Send)]
pub trait Supervisor {
    /// Human-readable identity used in Output messages.
    fn name(&self) -> &str;

    /// Bring the VM up and wait until its command channel answers a
    /// trivial command, bounded by `timeout`. Any failure transitions
    /// straight to `exited`.
    async fn acquire(&mut self, timeout: Duration) -> SupervisorResult<()>;

    /// Tear the VM down. Idempotent; must not fail on an already-dead VM.
    async fn release(&mut self);

    /// Run `test.command` inside the VM, streaming stdout/stderr into the
    /// sinks as they arrive, bounded by `timeout` (`None` = unbounded).
    async fn run_test(
        &self,
        test: &Test,
        timeout: Option<Duration>,
        stdout: &mut ByteSink,
        stderr: &mut ByteSink,
    ) -> SupervisorResult<TestResult>;

    /// Cheap liveness check, bounded at ~5s internally by callers.
    async fn probe(&self) -> bool;

    /// Start a scoped auxiliary command (kernel trace, log follower)
    /// running in parallel with tests until the returned handle is
    /// stopped. `command = None` is a no-op scope.
    async fn trace(
        &self,
        command: Option<&str>,
        stdout: ByteSink,
        stderr: ByteSink,
    ) -> SupervisorResult<TraceHandle>;

    /// Copy files matching `test.artifact_patterns` out of the VM into
    /// `destination_dir`. Failure is logged by the caller and non-fatal.
    async fn collect_artifacts(&self, test: &Test, destination_dir: &Path) -> SupervisorResult<()>;

    /// True after first successful release, or after any terminal failure.
    fn exited(&self) -> bool;
}
