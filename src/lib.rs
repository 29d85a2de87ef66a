//! # fast-fstests
//!
//! A parallel filesystem-regression test runner: dispatches a large
//! corpus of shell-scriptable tests across a pool of ephemeral virtual
//! machines, survives VM crashes, and persists durable per-test results.
//!
//! ## Architecture
//!
//! Dependency order, leaves first:
//!
//! - [`result`] / [`test`] — the value types a single test attempt
//!   produces ([`result::TestResult`], [`result::TestStatus`]) and the
//!   scheduling handle for one selected check ([`test::Test`]).
//! - [`supervisor`] — the abstract [`supervisor::Supervisor`] contract;
//!   concrete implementations ([`supervisors::mkosi::MkosiSupervisor`],
//!   [`supervisors::ssh::SshSupervisor`]) live under [`supervisors`].
//! - [`selection`] — turns a resolved [`config::Config`] into the ordered
//!   `Vec<Test>` the runner dispatches from.
//! - [`output`] — the [`output::Output`] trait every worker reports
//!   lifecycle events to, plus the concrete terminal/disk implementation
//!   [`output::ConsoleOutput`].
//! - [`recording`] — reads and writes per-run on-disk result snapshots;
//!   backs `--slowest-first`, `record`, and `compare`.
//! - [`executor`] — the scheduler: work queue, per-supervisor workers,
//!   probe loop, crash-recovery state machine.
//! - [`config`] / [`cli`] — TOML + `clap` configuration, merged as
//!   CLI-overrides-TOML-overrides-defaults.
//!
//! See `main.rs` for how the CLI entry point wires these together inside
//! a single-threaded `tokio::task::LocalSet`.

pub mod cli;
pub mod config;
pub mod executor;
pub mod output;
pub mod recording;
pub mod result;
pub mod selection;
pub mod supervisor;
pub mod supervisors;
pub mod test;

pub use config::Config;
pub use result::{TestResult, TestStatus};
pub use supervisor::Supervisor;
pub use test::Test;
