//! User-configurable hook scripts.
//!
//! Hooks are opaque commands: `pre_run` gets the literal argument
//! `start`, `post_run` gets `stop`, `recover` gets none. An absent hook
//! is a no-op. Pre/post failures are ignored by the caller; a failing
//! recover hook stops the batch.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Hooks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PreRun,
    PostRun,
    Recover,
}

impl Hook {
    fn name(self) -> &'static str {
        match self {
            Hook::PreRun => "pre_run",
            Hook::PostRun => "post_run",
            Hook::Recover => "recover",
        }
    }

    fn argument(self) -> Option<&'static str> {
        match self {
            Hook::PreRun => Some("start"),
            Hook::PostRun => Some("stop"),
            Hook::Recover => None,
        }
    }
}

/// Runs configured hooks with the run directory as working directory.
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    hooks: Hooks,
}

impl HookRunner {
    pub fn new(hooks: Hooks) -> Self {
        Self { hooks }
    }

    /// Runs the hook if one is configured. Returns false only when the
    /// hook actually ran and failed (or could not be started).
    pub async fn run(&self, hook: Hook, run_dir: &Path) -> bool {
        let command = match hook {
            Hook::PreRun => &self.hooks.pre_run,
            Hook::PostRun => &self.hooks.post_run,
            Hook::Recover => &self.hooks.recover,
        };
        let Some(command) = command else {
            return true;
        };

        debug!(hook = hook.name(), command = %command.display(), "running hook");
        let mut invocation = Command::new(command);
        if let Some(arg) = hook.argument() {
            invocation.arg(arg);
        }
        match invocation
            .current_dir(run_dir)
            .stdin(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(hook = hook.name(), code = ?status.code(), "hook failed");
                false
            }
            Err(e) => {
                warn!(hook = hook.name(), error = %e, "hook could not be started");
                false
            }
        }
    }
}
