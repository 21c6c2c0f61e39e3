//! # soak-core
//!
//! Core batch-run orchestration for the soak test runner.
//!
//! This crate provides:
//! - The orchestrator loop that cycles through test units
//! - Per-run execution, log capture, and the run-directory artifact contract
//! - The continuation policy and the two-stage graceful-interrupt machinery
//! - Post-run diagnostics, recovery hooks, and best-effort probes
//! - State-change notifications for external listeners

pub mod config;
pub mod diagnostics;
mod error;
pub mod hooks;
pub mod interrupt;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod probes;
#[cfg(unix)]
pub mod process_tree;
pub mod recorder;
pub mod state;
pub mod units;

pub use config::{Collaborators, Config, ConfigFile, Hooks, KeepGoing};
pub use error::{Result, SoakError};
pub use hooks::{Hook, HookRunner};
pub use interrupt::{InterruptController, Phase, spawn_signal_listener};
pub use notify::{ACTIVE_RESULTS_DIRECTORY, Notifier};
pub use orchestrator::run_batch;
pub use recorder::{RunContext, RunRecord};
pub use state::OrchestratorState;
pub use units::{TestUnit, UNIT_SEPARATOR, split_units};
