//! # soak-cli
//!
//! Binary entry point for the soak batch test runner.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Logging and configuration initialization
//! - Process group leadership for clean tree termination
//! - Entry point to the batch orchestration loop

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use soak_core::{
    Config, ConfigFile, HookRunner, InterruptController, KeepGoing, Notifier, RunContext,
    UNIT_SEPARATOR, run_batch, spawn_signal_listener, split_units,
};
use tracing::debug;

// Unix-specific process management for process group leadership
#[cfg(unix)]
mod process_management {
    use nix::unistd::{Pid, setpgid};
    use tracing::debug;

    /// Makes this process a process group leader so spawned test trees
    /// belong to our group and no orphan survives a forced stop.
    pub fn setup_process_group() {
        let pid = Pid::this();
        if let Err(e) = setpgid(pid, pid) {
            // EPERM means we already lead a group (e.g. started from a shell)
            if e != nix::errno::Errno::EPERM {
                debug!("could not set process group ({e}), continuing anyway");
            }
        }
        debug!("process group initialized: PID {pid}");
    }
}

#[cfg(not(unix))]
mod process_management {
    /// No-op on non-Unix platforms.
    pub fn setup_process_group() {}
}

/// Run a set of test scripts over and over, recording every run.
#[derive(Debug, Parser)]
#[command(name = "soak", version, about)]
struct Cli {
    /// Run the test sequence once instead of looping
    #[arg(short = '1', long = "run-once")]
    run_once: bool,

    /// Keep going past failures (-k: except test failures, -kk: always)
    #[arg(short = 'k', action = ArgAction::Count)]
    keep_going: u8,

    /// Ask the tests for extra diagnostic capture (sets SOAK_DEBUG=1)
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Echo captured output (-v: stdout, -vv: stdout and stderr)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Directory that receives the per-run result directories
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Tag appended to run-directory names and symlinks
    #[arg(short = 't', long = "tag")]
    tag: Option<String>,

    /// Configuration file naming hooks, collaborators, and the
    /// notification socket
    #[arg(short = 'C', long = "config", default_value = "soak.yml")]
    config: PathBuf,

    /// Test scripts, each run as its own unit. To pass arguments to a
    /// script, wrap `TEST ARGS...` in `--` separators; without any
    /// `--`, every argument is an independent test
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "TEST"
    )]
    units: Vec<String>,
}

/// clap consumes a `--` that precedes the first positional, which would
/// silently flip `split_units` into its one-test-per-argument mode.
/// Restore the separator when the raw argv carried one that clap ate.
fn restore_unit_separator(raw_args_have_separator: bool, units: &mut Vec<String>) {
    if raw_args_have_separator && !units.iter().any(|u| u == UNIT_SEPARATOR) {
        units.insert(0, UNIT_SEPARATOR.to_string());
    }
}

#[tokio::main]
async fn main() {
    let raw_separator = std::env::args_os().skip(1).any(|arg| arg == "--");
    let mut cli = Cli::parse();
    restore_unit_separator(raw_separator, &mut cli.units);

    // SOAK_LOG overrides; logs go to stderr so -v echo owns stdout.
    let default_level = if cli.verbose >= 2 { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("SOAK_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    process_management::setup_process_group();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("soak: {e:#}");
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let file = ConfigFile::load(&cli.config)?;
    debug!(config = %cli.config.display(), "configuration loaded");

    let mut config = Config::new(cli.output_dir);
    config.run_once = cli.run_once;
    config.keep_going = KeepGoing::from_level(cli.keep_going);
    config.verbosity = cli.verbose;
    config.debug = cli.debug;
    config.tag = cli.tag;
    config.notify_socket = file.notify_socket;
    config.hooks = file.hooks;
    config.collaborators = file.collaborators;

    let units = split_units(&cli.units);

    let controller = Arc::new(InterruptController::new());
    let _signals = spawn_signal_listener(Arc::clone(&controller))
        .context("cannot register signal handlers")?;
    let notifier = Notifier::new(config.notify_socket.clone());
    let hooks = HookRunner::new(config.hooks.clone());
    let ctx = RunContext {
        controller: controller.as_ref(),
        notifier: &notifier,
        hooks: &hooks,
    };

    Ok(run_batch(&units, &config, &ctx).await?)
}
