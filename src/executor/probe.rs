//! Liveness probing, racing the in-flight test run: every
//! `probe_interval` seconds, probe; on failure retry twice more with a
//! 1s backoff; three consecutive failures signal `SupervisorExited`.

use std::time::Duration;

use crate::supervisor::Supervisor;

/// Distinguished signal: three consecutive probe failures.
pub struct SupervisorExited;

const BACKOFF: Duration = Duration::from_secs(1);
const STRIKES: u32 = 3;

/// Runs until it can declare the supervisor dead. Callers race this
/// against the in-flight test's future via `tokio::select!`; dropping
/// this future (because the test finished first) cancels it cleanly
/// since every suspension point is a plain `sleep`/`probe` await.
pub async fn probe_loop(supervisor: &dyn Supervisor, interval: Duration) -> SupervisorExited {
    loop {
        tokio::time::sleep(interval).await;

        let mut alive = supervisor.probe().await;
        let mut strikes = 1;
        while !alive && strikes < STRIKES {
            tokio::time::sleep(BACKOFF).await;
            alive = supervisor.probe().await;
            strikes += 1;
        }
        if !alive {
            return SupervisorExited;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::Path;

    use async_trait::async_trait;

    use crate::result::TestResult;
    use crate::supervisor::{ByteSink, SupervisorResult, TraceHandle};
    use crate::test::Test;

    /// A supervisor whose `probe()` replays a fixed, queued sequence of
    /// answers, panicking if asked for more than scripted.
    struct ScriptedSupervisor {
        answers: RefCell<VecDeque<bool>>,
    }

    impl ScriptedSupervisor {
        fn new(answers: impl IntoIterator<Item = bool>) -> Self {
            ScriptedSupervisor {
                answers: RefCell::new(answers.into_iter().collect()),
            }
        }
    }

    #[async_trait(?Send)]
    impl Supervisor for ScriptedSupervisor {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn acquire(&mut self, _timeout: Duration) -> SupervisorResult<()> {
            Ok(())
        }

        async fn release(&mut self) {}

        async fn run_test(
            &self,
            _test: &Test,
            _timeout: Option<Duration>,
            _stdout: &mut ByteSink,
            _stderr: &mut ByteSink,
        ) -> SupervisorResult<TestResult> {
            unreachable!("probe_loop never calls run_test")
        }

        async fn probe(&self) -> bool {
            self.answers
                .borrow_mut()
                .pop_front()
                .expect("probe called more times than scripted")
        }

        async fn trace(
            &self,
            _command: Option<&str>,
            _stdout: ByteSink,
            _stderr: ByteSink,
        ) -> SupervisorResult<TraceHandle> {
            Ok(TraceHandle::none())
        }

        async fn collect_artifacts(&self, _test: &Test, _destination_dir: &Path) -> SupervisorResult<()> {
            Ok(())
        }

        fn exited(&self) -> bool {
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_consecutive_failures_signal_exit() {
        let supervisor = ScriptedSupervisor::new([false, false, false]);
        let SupervisorExited = probe_loop(&supervisor, Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn a_single_recovered_failure_resets_the_strike_count() {
        // First outer iteration: fails once, recovers on the first retry.
        // Second outer iteration: fails all three tries and dies. If a
        // lone failure counted against the next iteration's strikes,
        // this would declare death one probe early.
        let supervisor = ScriptedSupervisor::new([false, true, false, false, false]);
        let SupervisorExited = probe_loop(&supervisor, Duration::from_millis(10)).await;
    }
}
