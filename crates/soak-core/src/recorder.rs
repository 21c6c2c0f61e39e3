//! Per-run execution and artifact capture.
//!
//! `execute` owns one run from directory allocation to symlink
//! handover: it launches the test unit, pumps both output streams into
//! timestamp-prefixed logs, waits cooperatively for termination (so a
//! second interrupt can kill the tree), and persists the artifact
//! contract other tooling depends on.

use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
#[cfg(unix)]
use nix::sys::signal::Signal;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SoakError};
use crate::hooks::{Hook, HookRunner};
use crate::interrupt::{InterruptController, Phase};
use crate::notify::{ACTIVE_RESULTS_DIRECTORY, Notifier};
use crate::probes;
use crate::units::TestUnit;

/// Run-directory names have second resolution; two runs started within
/// the same second under the same tag collide and abort (known
/// limitation).
const DIR_STAMP: &str = "%Y-%m-%d_%H.%M.%S";
/// Prefix for every captured log line.
const LINE_STAMP: &str = "%Y-%m-%d %H:%M:%S %z";

/// Everything recorded about one finished run. Read-only and durable
/// (addressable by `run_dir`) once `execute` returns.
#[derive(Debug)]
pub struct RunRecord {
    pub run_dir: PathBuf,
    pub start_time: DateTime<Local>,
    pub duration: Duration,
    pub exit_status: i32,
    /// True when an interrupt was observed during this run; the exit
    /// status still reflects how the child actually terminated.
    pub interrupted: bool,
    pub artifacts: BTreeSet<String>,
}

/// Collaborators shared across runs, borrowed by `execute`.
pub struct RunContext<'a> {
    pub controller: &'a InterruptController,
    pub notifier: &'a Notifier,
    pub hooks: &'a HookRunner,
}

#[derive(Debug, Clone, Copy)]
enum Echo {
    None,
    Stdout,
    Stderr,
}

/// Executes one test unit and records everything about it.
pub async fn execute(unit: &TestUnit, config: &Config, ctx: &RunContext<'_>) -> Result<RunRecord> {
    let script = std::fs::canonicalize(&unit.path).unwrap_or_else(|_| unit.path.clone());

    std::fs::create_dir_all(&config.output_dir).map_err(|source| SoakError::ResultsDir {
        path: config.output_dir.clone(),
        source,
    })?;

    let start_time = Local::now();
    let dir_name = format!("{}{}", start_time.format(DIR_STAMP), config.tag_suffix());
    let run_dir = config.output_dir.join(&dir_name);
    std::fs::create_dir(&run_dir).map_err(|source| SoakError::ResultsDir {
        path: run_dir.clone(),
        source,
    })?;
    let run_dir_abs = std::fs::canonicalize(&run_dir).unwrap_or_else(|_| run_dir.clone());

    // Run-started notification strictly precedes the child launch.
    ctx.notifier
        .notify(
            ACTIVE_RESULTS_DIRECTORY,
            Value::String(run_dir_abs.display().to_string()),
        )
        .await;
    let current_link = format!("current{}", config.tag_suffix());
    point_symlink(&config.output_dir, &current_link, &dir_name)?;

    write_metadata(&run_dir, unit, config, &script).await;
    ctx.hooks.run(Hook::PreRun, &run_dir).await;

    info!(unit = %unit.name(), dir = %run_dir.display(), "starting test run");

    let mut command = Command::new(&script);
    command
        .args(&unit.args)
        .current_dir(&run_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if config.debug {
        command.env("SOAK_DEBUG", "1");
    }
    let mut child = command.spawn().map_err(|source| SoakError::Spawn {
        unit: unit.name(),
        source,
    })?;
    ctx.controller.set_child_pid(child.id().map(|pid| pid as i32));

    let started = Instant::now();
    let (echo_out, echo_err) = match config.verbosity {
        0 => (Echo::None, Echo::None),
        1 => (Echo::Stdout, Echo::None),
        _ => (Echo::Stdout, Echo::Stderr),
    };
    let out_pump = child
        .stdout
        .take()
        .map(|stream| spawn_pump(stream, run_dir.join("stdout.log"), echo_out));
    let err_pump = child
        .stderr
        .take()
        .map(|stream| spawn_pump(stream, run_dir.join("stderr.log"), echo_err));

    let status = wait_for_exit(&mut child, ctx.controller).await?;
    ctx.controller.set_child_pid(None);

    // Pumps finish once the pipes' write ends close with the child.
    if let Some(pump) = out_pump {
        let _ = pump.await;
    }
    if let Some(pump) = err_pump {
        let _ = pump.await;
    }

    let duration = started.elapsed();
    let exit_status = exit_code(status);
    let interrupted = ctx.controller.interrupted();

    std::fs::write(run_dir.join("exit-status"), format!("{exit_status}\n"))?;
    std::fs::write(
        run_dir.join("duration"),
        format!("{:.2}\n", duration.as_secs_f64()),
    )?;

    probes::run_post_probes(&run_dir, config, exit_status).await;
    ctx.hooks.run(Hook::PostRun, &run_dir).await;

    // Symlink handover, then the run-ended notification.
    remove_symlink(&config.output_dir, &current_link);
    point_symlink(
        &config.output_dir,
        &format!("latest{}", config.tag_suffix()),
        &dir_name,
    )?;
    ctx.notifier.notify(ACTIVE_RESULTS_DIRECTORY, Value::Null).await;

    info!(
        unit = %unit.name(),
        exit_status,
        secs = duration.as_secs(),
        "test run finished"
    );

    let artifacts = list_artifacts(&run_dir);
    Ok(RunRecord {
        run_dir,
        start_time,
        duration,
        exit_status,
        interrupted,
        artifacts,
    })
}

/// Waits for the child's real termination. A `Stopping` transition is
/// a spurious wake-up here — the child keeps running and we resume the
/// wait; `Killing` terminates the whole process tree first.
async fn wait_for_exit(
    child: &mut Child,
    controller: &InterruptController,
) -> std::io::Result<std::process::ExitStatus> {
    let mut phase_rx = controller.subscribe();
    if *phase_rx.borrow_and_update() == Phase::Killing {
        kill_child_tree(child);
    }
    loop {
        tokio::select! {
            status = child.wait() => return status,
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    return child.wait().await;
                }
                if *phase_rx.borrow_and_update() == Phase::Killing {
                    kill_child_tree(child);
                }
            }
        }
    }
}

fn kill_child_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        warn!(pid, "terminating test process tree");
        #[cfg(unix)]
        crate::process_tree::kill_tree(pid as i32, Signal::SIGTERM);
        #[cfg(not(unix))]
        let _ = child.start_kill();
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

/// Ancillary per-run metadata, all best-effort apart from the unit
/// name and literal arguments.
async fn write_metadata(run_dir: &Path, unit: &TestUnit, config: &Config, script: &Path) {
    let mut args_text = String::new();
    for arg in &unit.args {
        args_text.push_str(arg);
        args_text.push('\n');
    }
    let required = [
        ("test-name", format!("{}\n", unit.name())),
        ("test-args", args_text),
    ];
    for (name, contents) in required {
        if let Err(e) = std::fs::write(run_dir.join(name), contents) {
            warn!(artifact = name, error = %e, "could not write metadata artifact");
        }
    }

    if let Some(tag) = &config.tag {
        let _ = std::fs::write(run_dir.join("extra-columns"), format!("Tag\t{tag}\n"));
    }
    if let Some(commit) = git_commit(script).await {
        let _ = std::fs::write(run_dir.join("git-commit"), format!("{commit}\n"));
    }
}

/// Revision of the tree containing the test script, if it is in git.
async fn git_commit(script: &Path) -> Option<String> {
    let dir = script.parent()?;
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

/// Pumps one child stream into a timestamp-prefixed log file,
/// optionally echoing to the orchestrator's own streams.
fn spawn_pump<R>(stream: R, log_path: PathBuf, echo: Echo) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut file = match std::fs::File::create(&log_path) {
            Ok(file) => file,
            Err(e) => {
                warn!(log = %log_path.display(), error = %e, "cannot create capture log");
                return;
            }
        };
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let stamped = format!("[{}] {line}", Local::now().format(LINE_STAMP));
                    let _ = writeln!(file, "{stamped}");
                    match echo {
                        Echo::Stdout => println!("{stamped}"),
                        Echo::Stderr => eprintln!("{stamped}"),
                        Echo::None => {}
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(log = %log_path.display(), error = %e, "capture stream read failed");
                    break;
                }
            }
        }
    })
}

/// Points `dir/link_name` at `target` (remove-then-link).
fn point_symlink(dir: &Path, link_name: &str, target: &str) -> Result<()> {
    remove_symlink(dir, link_name);
    let link = dir.join(link_name);
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, &link)?;
    #[cfg(not(unix))]
    let _ = (target, link);
    Ok(())
}

fn remove_symlink(dir: &Path, link_name: &str) {
    let link = dir.join(link_name);
    if let Err(e) = std::fs::remove_file(&link) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(link = %link.display(), error = %e, "could not remove symlink");
        }
    }
}

fn list_artifacts(run_dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(run_dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default()
}
