//! Configuration loading and the runtime `Config` record.
//!
//! The CLI surface (run-once, keep-going level, verbosity, output
//! directory, tag) merges with an optional `soak.yml` that names the
//! hook scripts, collaborator commands, and the notification socket.
//! The merged `Config` is immutable for the process lifetime.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Operator tolerance for continuing past failed runs.
///
/// By convention a unit exits 0 on pass, 1 when the test logic itself
/// failed, and 2+ for harness/environment errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum KeepGoing {
    /// Stop on any failure.
    #[default]
    Strict,
    /// Stop only on genuine test failures (exit status 1).
    Lenient,
    /// Never stop on failure; only interrupt or run-once stops the loop.
    Permissive,
}

impl KeepGoing {
    /// Maps a counted `-k` flag (0/1/2+) to a tolerance level.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Strict,
            1 => Self::Lenient,
            _ => Self::Permissive,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Self::Strict => 0,
            Self::Lenient => 1,
            Self::Permissive => 2,
        }
    }
}

/// User-configurable hook scripts, each invoked as an opaque command.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hooks {
    /// Invoked with the argument `start` before each test launch.
    pub pre_run: Option<PathBuf>,
    /// Invoked with the argument `stop` after each run's artifacts are final.
    pub post_run: Option<PathBuf>,
    /// Invoked with no arguments after any failed run; a non-zero exit
    /// stops the batch.
    pub recover: Option<PathBuf>,
}

/// External collaborator commands consumed at their interface boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Collaborators {
    /// Produces `screenshot.png` in its working directory.
    pub screenshot: Option<PathBuf>,
    /// Checks the capture hardware; a non-zero exit means the hardware
    /// is bad and the whole batch must stop. May write `failure-reason`.
    pub hardware_check: Option<PathBuf>,
    /// Dumps hardware sensor readings to stdout.
    pub sensors: String,
    /// Extracts a backtrace from a core dump (gdb-compatible flags).
    pub debugger: String,
    /// Downscales `screenshot.png` into `thumbnail.jpg` (ImageMagick
    /// convert-compatible arguments).
    pub thumbnailer: String,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            screenshot: None,
            hardware_check: None,
            sensors: "sensors".to_string(),
            debugger: "gdb".to_string(),
            thumbnailer: "convert".to_string(),
        }
    }
}

/// The optional `soak.yml` configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub hooks: Hooks,
    pub collaborators: Collaborators,
    pub notify_socket: Option<PathBuf>,
}

impl ConfigFile {
    /// Loads the YAML config file. A missing file yields the defaults;
    /// a malformed file is a fatal setup error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Process-wide configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Execute the unit sequence exactly once instead of looping.
    pub run_once: bool,
    pub keep_going: KeepGoing,
    /// 0 = silent, 1 = echo captured stdout, 2 = echo both streams.
    pub verbosity: u8,
    /// Ask units for richer diagnostic capture (`SOAK_DEBUG=1`).
    pub debug: bool,
    /// Directory that receives per-run result directories.
    pub output_dir: PathBuf,
    /// Tag suffix for run directories and the current/latest symlinks.
    pub tag: Option<String>,
    pub notify_socket: Option<PathBuf>,
    pub hooks: Hooks,
    pub collaborators: Collaborators,
}

impl Config {
    /// A default configuration rooted at `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_once: false,
            keep_going: KeepGoing::Strict,
            verbosity: 0,
            debug: false,
            output_dir: output_dir.into(),
            tag: None,
            notify_socket: None,
            hooks: Hooks::default(),
            collaborators: Collaborators::default(),
        }
    }

    /// `-<tag>` when a tag is configured, empty otherwise.
    pub fn tag_suffix(&self) -> String {
        self.tag
            .as_ref()
            .map(|tag| format!("-{tag}"))
            .unwrap_or_default()
    }
}
