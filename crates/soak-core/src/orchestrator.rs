//! The batch loop.
//!
//! Cycles through the test units in order, forever by default or for a
//! single pass with run-once, handing each run to the recorder and the
//! finished record to diagnostics. The loop owns all stop decisions;
//! the interrupt path only publishes phase changes it reads here.

use tracing::{info, warn};

use crate::config::Config;
use crate::diagnostics;
use crate::error::{Result, SoakError};
use crate::policy;
use crate::recorder::{self, RunContext};
use crate::state::OrchestratorState;
use crate::units::TestUnit;

/// Runs the batch to completion and returns the process exit code.
pub async fn run_batch(
    units: &[TestUnit],
    config: &Config,
    ctx: &RunContext<'_>,
) -> Result<i32> {
    if units.is_empty() {
        return Err(SoakError::Config("no test units given".to_string()));
    }

    let mut state = OrchestratorState::new();
    let mut last_exit = 0;

    'batch: loop {
        for unit in units {
            if ctx.controller.interrupted() {
                state.stop = true;
                break 'batch;
            }

            let record = recorder::execute(unit, config, ctx).await?;
            state.run_count += 1;
            last_exit = record.exit_status;
            if record.exit_status != 0 {
                state.failure_count += 1;
                warn!(
                    unit = %unit.name(),
                    exit_status = record.exit_status,
                    "test run failed"
                );
            }

            if diagnostics::classify_and_recover(&record, config, ctx.hooks).await {
                state.stop = true;
            }
            if record.interrupted {
                state.stop = true;
            }

            if !policy::should_continue(state.stop, record.exit_status, config.keep_going) {
                break 'batch;
            }
        }
        if config.run_once {
            break;
        }
    }

    info!(
        runs = state.run_count,
        failures = state.failure_count,
        "batch finished"
    );
    Ok(state.aggregate_exit_code(last_exit))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::KeepGoing;
    use crate::hooks::HookRunner;
    use crate::interrupt::InterruptController;
    use crate::notify::Notifier;
    use crate::units::split_units;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn quiet_config(output_dir: &Path) -> Config {
        let mut config = Config::new(output_dir);
        config.collaborators.sensors = "true".to_string();
        config.collaborators.thumbnailer = "true".to_string();
        config
    }

    fn count(counter: &Path) -> usize {
        std::fs::read_to_string(counter).map_or(0, |s| s.lines().count())
    }

    async fn run(units: &[TestUnit], config: &Config) -> i32 {
        let controller = InterruptController::new();
        let notifier = Notifier::disabled();
        let hooks = HookRunner::default();
        let ctx = RunContext {
            controller: &controller,
            notifier: &notifier,
            hooks: &hooks,
        };
        run_batch(units, config, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn no_units_is_a_config_error() {
        let temp = TempDir::new().unwrap();
        let config = quiet_config(temp.path());
        let controller = InterruptController::new();
        let notifier = Notifier::disabled();
        let hooks = HookRunner::default();
        let ctx = RunContext {
            controller: &controller,
            notifier: &notifier,
            hooks: &hooks,
        };
        assert!(matches!(
            run_batch(&[], &config, &ctx).await,
            Err(SoakError::Config(_))
        ));
    }

    #[tokio::test]
    async fn run_once_executes_each_unit_exactly_once() {
        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("count");
        // a.sh sleeps so b.sh lands in a different second-resolution dir.
        let a = write_script(
            temp.path(),
            "a.sh",
            &format!("echo a >> {}\nsleep 1.1", counter.display()),
        );
        let b = write_script(temp.path(), "b.sh", &format!("echo b >> {}", counter.display()));

        let mut config = quiet_config(&temp.path().join("results"));
        config.run_once = true;
        let units = split_units(&[
            a.display().to_string(),
            b.display().to_string(),
        ]);

        assert_eq!(run(&units, &config).await, 0);
        assert_eq!(
            std::fs::read_to_string(&counter).unwrap(),
            "a\nb\n"
        );
    }

    #[tokio::test]
    async fn strict_stops_at_the_first_failure() {
        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("count");
        // Passes twice, fails on the third invocation. The sleep keeps
        // consecutive runs out of the same second-resolution run dir.
        let script = write_script(
            temp.path(),
            "flaky.sh",
            &format!(
                "sleep 1.1\necho run >> {c}\ntest $(wc -l < {c}) -lt 3",
                c = counter.display()
            ),
        );

        let config = quiet_config(&temp.path().join("results"));
        let units = split_units(&[script.display().to_string()]);

        assert_eq!(run(&units, &config).await, 1);
        assert_eq!(count(&counter), 3);
    }

    #[tokio::test]
    async fn permissive_continues_past_failures_in_a_single_pass() {
        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("count");
        // The sleep keeps the second run out of the first run's
        // second-resolution directory name.
        let fail = write_script(
            temp.path(),
            "fail.sh",
            &format!("echo fail >> {}\nsleep 1.1\nexit 1", counter.display()),
        );
        let pass = write_script(
            temp.path(),
            "pass.sh",
            &format!("echo pass >> {}", counter.display()),
        );

        let mut config = quiet_config(&temp.path().join("results"));
        config.run_once = true;
        config.keep_going = KeepGoing::Permissive;
        let units = split_units(&[fail.display().to_string(), pass.display().to_string()]);

        // Multi-run batches coarsen the exit code.
        assert_eq!(run(&units, &config).await, 1);
        assert_eq!(count(&counter), 2);
    }

    #[tokio::test]
    async fn single_failing_run_propagates_its_literal_status() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "t.sh", "exit 5");

        let mut config = quiet_config(&temp.path().join("results"));
        config.run_once = true;
        let units = split_units(&[script.display().to_string()]);

        assert_eq!(run(&units, &config).await, 5);
    }

    #[tokio::test]
    async fn pre_existing_interrupt_starts_nothing() {
        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("count");
        let script = write_script(
            temp.path(),
            "t.sh",
            &format!("echo run >> {}", counter.display()),
        );

        let config = quiet_config(&temp.path().join("results"));
        let units = split_units(&[script.display().to_string()]);

        let controller = InterruptController::new();
        controller.record_signal();
        let notifier = Notifier::disabled();
        let hooks = HookRunner::default();
        let ctx = RunContext {
            controller: &controller,
            notifier: &notifier,
            hooks: &hooks,
        };

        assert_eq!(run_batch(&units, &config, &ctx).await.unwrap(), 0);
        assert_eq!(count(&counter), 0);
    }
}
