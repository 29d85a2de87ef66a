//! The scheduler: work queue, per-supervisor workers, probe loop, and a
//! Spawning/Serving/Recovering/Exiting crash-recovery state machine with
//! cooperative cancellation.

mod probe;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::output::Output;
use crate::result::TestResult;
use crate::supervisor::Supervisor;
use crate::test::Test;

use probe::{probe_loop, SupervisorExited};

/// The pending work queue: popped from the end, appended to the end.
/// A plain `Rc<RefCell<...>>` — every access happens on the single
/// `LocalSet` thread between `.await` points, never concurrently.
pub type WorkQueue = Rc<RefCell<Vec<Test>>>;

/// test name -> number of times a supervisor has died while running it.
pub type DeathCounters = Rc<RefCell<HashMap<String, u32>>>;

/// Shared handle to one supervisor. `run_test`/`probe`/`trace`/
/// `collect_artifacts` take `&self` precisely so a worker can hold two
/// concurrent shared borrows — one driving the test, one driving the
/// probe loop racing it — without the `RefCell` ever panicking.
/// `acquire`/`release` take `&mut self` and are only ever called while
/// no other borrow of this cell is outstanding (spawn, and recovery
/// after the race has resolved and dropped the losing future).
pub type SharedSupervisor = Rc<RefCell<Box<dyn Supervisor>>>;

pub struct RunOptions {
    pub keep_alive: bool,
    pub test_timeout: Option<Duration>,
    pub probe_interval: Duration,
    pub max_supervisor_restarts: u32,
    pub dmesg: bool,
    pub trace_command: Option<String>,
    pub acquire_timeout: Duration,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        RunOptions {
            keep_alive: config.keep_alive,
            test_timeout: config.test_runner.test_timeout.map(Duration::from_secs),
            probe_interval: Duration::from_secs(config.test_runner.probe_interval),
            max_supervisor_restarts: config.test_runner.max_supervisor_restarts,
            dmesg: config.test_runner.dmesg,
            trace_command: config.test_runner.trace_command(),
            acquire_timeout: Duration::from_secs(config.mkosi.timeout),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("all supervisors failed to spawn")]
    AllSupervisorsFailed,
}

/// Drive `supervisors` to completion over `tests`, reporting every
/// lifecycle event to `output`. Must be called from within a
/// `tokio::task::LocalSet` (workers are `spawn_local`, non-`Send`).
pub async fn run(
    tests: Vec<Test>,
    supervisors: Vec<Box<dyn Supervisor>>,
    output: Rc<dyn Output>,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<(), RunError> {
    let total_tests = tests.len();
    let queue: WorkQueue = Rc::new(RefCell::new(tests));
    let death_counters: DeathCounters = Rc::new(RefCell::new(HashMap::new()));

    let num_supervisors = supervisors.len();
    output.spawning_supervisors(num_supervisors);

    let shared: Vec<SharedSupervisor> = supervisors
        .into_iter()
        .map(|s| Rc::new(RefCell::new(s)))
        .collect();

    let mut spawn_failures = 0usize;
    for supervisor in &shared {
        let name = supervisor.borrow().name().to_string();
        let ok = supervisor.borrow_mut().acquire(options.acquire_timeout).await.is_ok();
        output.spawned_supervisor(&name, ok);
        if !ok {
            spawn_failures += 1;
        }
    }
    if num_supervisors > 0 && spawn_failures == num_supervisors {
        output.print_summary();
        return Err(RunError::AllSupervisorsFailed);
    }

    output.running_tests(total_tests);

    let mut handles = Vec::new();
    for supervisor in shared {
        if supervisor.borrow().exited() {
            continue;
        }
        let worker = Worker {
            supervisor,
            queue: queue.clone(),
            death_counters: death_counters.clone(),
            output: output.clone(),
            test_timeout: options.test_timeout,
            probe_interval: options.probe_interval,
            max_supervisor_restarts: options.max_supervisor_restarts,
            dmesg: options.dmesg,
            trace_command: options.trace_command.clone(),
            acquire_timeout: options.acquire_timeout,
            keep_alive: options.keep_alive,
            cancel: cancel.clone(),
        };
        handles.push(tokio::task::spawn_local(async move { worker.run().await }));
    }
    output.exiting_supervisors(handles.len());
    for handle in handles {
        let _ = handle.await;
    }

    if options.keep_alive {
        output.keeping_alive();
        cancel.cancelled().await;
    }

    output.print_summary();
    Ok(())
}

/// One worker owns exactly one supervisor for the lifetime of the run,
/// driving it through Serving <-> Recovering -> Exiting. Spawning is
/// handled once, up front, by `run`.
struct Worker {
    supervisor: SharedSupervisor,
    queue: WorkQueue,
    death_counters: DeathCounters,
    output: Rc<dyn Output>,
    test_timeout: Option<Duration>,
    probe_interval: Duration,
    max_supervisor_restarts: u32,
    dmesg: bool,
    trace_command: Option<String>,
    acquire_timeout: Duration,
    keep_alive: bool,
    cancel: CancellationToken,
}

enum ServeOutcome {
    QueueEmpty,
    Cancelled,
    SupervisorDied(Option<Test>),
}

impl Worker {
    fn name(&self) -> String {
        self.supervisor.borrow().name().to_string()
    }

    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.serve().await {
                ServeOutcome::QueueEmpty | ServeOutcome::Cancelled => break,
                ServeOutcome::SupervisorDied(in_flight) => {
                    if !self.recover(in_flight).await {
                        return;
                    }
                }
            }
        }
        if !self.keep_alive {
            self.supervisor.borrow_mut().release().await;
        }
        self.output.exited_supervisor(&self.name());
    }

    /// Pop and run tests until the queue empties, the supervisor dies,
    /// or cancellation fires. Races the in-flight `run_test` against a
    /// sibling probe loop via `tokio::select!`: whichever resolves first
    /// determines the outcome, and the other future is dropped. Both
    /// hold only a shared borrow of `self.supervisor`, so racing them is
    /// sound (see [`SharedSupervisor`]).
    async fn serve(&mut self) -> ServeOutcome {
        loop {
            let test = match self.queue.borrow_mut().pop() {
                Some(test) => test,
                None => return ServeOutcome::QueueEmpty,
            };

            if self.probe_interval.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return ServeOutcome::Cancelled,
                    died = self.run_one(test) => {
                        if let Some(test) = died {
                            return ServeOutcome::SupervisorDied(Some(test));
                        }
                    }
                }
            } else {
                let in_flight = test;
                let supervisor = self.supervisor.clone();
                let probe_interval = self.probe_interval;
                let probe = async move {
                    let guard = supervisor.borrow();
                    probe_loop(&**guard, probe_interval).await
                };
                tokio::select! {
                    _ = self.cancel.cancelled() => return ServeOutcome::Cancelled,
                    SupervisorExited = probe => {
                        return ServeOutcome::SupervisorDied(Some(in_flight));
                    }
                    died = self.run_one(in_flight) => {
                        if let Some(test) = died {
                            return ServeOutcome::SupervisorDied(Some(test));
                        }
                    }
                }
            }
        }
    }

    /// Run one test to completion. Returns `Some(test)` if the
    /// supervisor's command channel was lost mid-run (caller should
    /// treat this identically to a probe-detected death); `None` on a
    /// normal (pass/fail/skip/error) completion.
    async fn run_one(&self, test: Test) -> Option<Test> {
        let name = self.name();
        self.output.running_test(&test, &name);

        let (mut stdout, mut stderr) = self.output.test_sinks(&test);

        let dmesg_trace = if self.dmesg {
            let (dmesg_out, dmesg_err) = self.output.dmesg_sinks(&test);
            self.supervisor
                .borrow()
                .trace(Some("dmesg -W"), dmesg_out, dmesg_err)
                .await
                .ok()
        } else {
            None
        };

        let bpftrace_trace = if let Some(command) = &self.trace_command {
            let (bp_out, bp_err) = self.output.bpftrace_sinks(&test);
            self.supervisor.borrow().trace(Some(command), bp_out, bp_err).await.ok()
        } else {
            None
        };

        let result = self
            .supervisor
            .borrow()
            .run_test(&test, self.test_timeout, &mut stdout, &mut stderr)
            .await;

        if let Some(trace) = bpftrace_trace {
            trace.stop().await;
        }
        if let Some(trace) = dmesg_trace {
            trace.stop().await;
        }

        match result {
            Ok(result) => {
                let artifact_dir = self.output.artifact_dir(&test);
                let _ = self.supervisor.borrow().collect_artifacts(&test, &artifact_dir).await;
                self.output.finished_test(&test, &result);
                None
            }
            Err(_) => Some(test),
        }
    }

    /// Re-queue (or finalize) the in-flight test, then release and
    /// re-acquire the supervisor under the same identity. Returns
    /// `false` if re-acquire failed, meaning this worker is done.
    async fn recover(&mut self, in_flight: Option<Test>) -> bool {
        let name = self.name();
        self.output.supervisor_died(&name, in_flight.as_ref().map(|t| t.name.as_str()));

        if let Some(mut test) = in_flight {
            let deaths = {
                let mut counters = self.death_counters.borrow_mut();
                let entry = counters.entry(test.name.clone()).or_insert(0);
                *entry += 1;
                *entry
            };

            let error_result = TestResult::from_error(&test.name, "supervisor died", 0.0, chrono::Utc::now());

            if self.max_supervisor_restarts > 0 && deaths > self.max_supervisor_restarts {
                self.output.finished_test(&test, &error_result);
            } else {
                self.output.record_retry(&test, &error_result);
                test.retry();
                self.queue.borrow_mut().push(test);
            }
        }

        self.supervisor.borrow_mut().release().await;
        self.output.respawning_supervisor(&name);
        let ok = self.supervisor.borrow_mut().acquire(self.acquire_timeout).await.is_ok();
        self.output.respawned_supervisor(&name, ok);
        ok
    }
}
