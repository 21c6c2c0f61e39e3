//! Continuation policy: decides whether the loop proceeds after a run.

use crate::config::KeepGoing;

/// Returns true when the orchestrator should proceed to the next run.
///
/// `stop` wins unconditionally. Success always continues. `Lenient`
/// additionally tolerates infrastructure-attributable failures (exit
/// status above 1); `Permissive` tolerates any failure.
pub fn should_continue(stop: bool, exit_status: i32, keep_going: KeepGoing) -> bool {
    if stop {
        return false;
    }
    if exit_status == 0 {
        return true;
    }
    match keep_going {
        KeepGoing::Strict => false,
        KeepGoing::Lenient => exit_status > 1,
        KeepGoing::Permissive => true,
    }
}
