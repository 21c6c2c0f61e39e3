//! Two-stage graceful-interrupt state machine.
//!
//! The first interrupt signal asks the orchestrator to let the current
//! test finish and then stop looping; the second kills the current
//! test's entire process tree. The signal path only advances the phase
//! and reads the published child pid — the tree kill itself happens
//! cooperatively inside the recorder's wait-for-exit cycle.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Interrupt phase. Transitions are one-way:
/// `Running` → `Stopping` → `Killing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No interrupt received.
    Running,
    /// One interrupt: finish the current run, start no more.
    Stopping,
    /// Two interrupts: terminate the current run's process tree.
    Killing,
}

/// Shared interrupt state between the signal task and the orchestrator.
#[derive(Debug)]
pub struct InterruptController {
    phase: watch::Sender<Phase>,
    child_pid: watch::Sender<Option<i32>>,
}

impl InterruptController {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        let (child_pid, _) = watch::channel(None);
        Self { phase, child_pid }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// True once any interrupt signal has been observed.
    pub fn interrupted(&self) -> bool {
        self.phase() != Phase::Running
    }

    /// Receiver the recorder's wait cycle selects on.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Advances the state machine by one signal delivery.
    ///
    /// Returns the phase newly entered, or `None` when already in the
    /// terminal `Killing` phase.
    pub fn record_signal(&self) -> Option<Phase> {
        let mut entered = None;
        self.phase.send_if_modified(|phase| match *phase {
            Phase::Running => {
                *phase = Phase::Stopping;
                entered = Some(Phase::Stopping);
                true
            }
            Phase::Stopping => {
                *phase = Phase::Killing;
                entered = Some(Phase::Killing);
                true
            }
            Phase::Killing => false,
        });
        entered
    }

    /// Published while a child process is active; cleared on its exit.
    /// The signal path may only read this, never act on it directly.
    pub fn set_child_pid(&self, pid: Option<i32>) {
        self.child_pid.send_replace(pid);
    }

    pub fn child_pid(&self) -> Option<i32> {
        *self.child_pid.borrow()
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the task that owns the SIGINT/SIGTERM streams and advances
/// the interrupt state machine on each delivery.
///
/// Handler registration happens before the task is spawned, so a
/// failure surfaces to the caller instead of leaving the process
/// running with interrupts silently disabled.
#[cfg(unix)]
pub fn spawn_signal_listener(
    controller: Arc<InterruptController>,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            announce(&controller);
        }
    }))
}

/// Non-Unix fallback: Ctrl+C only.
#[cfg(not(unix))]
pub fn spawn_signal_listener(
    controller: Arc<InterruptController>,
) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            announce(&controller);
        }
    }))
}

fn announce(controller: &InterruptController) {
    match controller.record_signal() {
        Some(Phase::Stopping) => {
            info!("interrupt received");
            eprintln!(
                "soak: waiting for the current test to finish; interrupt again to kill it"
            );
        }
        Some(Phase::Killing) => {
            info!(pid = ?controller.child_pid(), "second interrupt received");
            eprintln!("soak: killing the current test run");
        }
        _ => {}
    }
}
