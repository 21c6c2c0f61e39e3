//! Orchestrator bookkeeping state.

/// Counters and flags owned by the orchestrator task.
///
/// Only the orchestrator mutates this; the interrupt path communicates
/// through [`crate::interrupt::InterruptController`] instead.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    /// Total runs started, across all loop passes.
    pub run_count: u32,
    /// Runs that finished with a non-zero exit status.
    pub failure_count: u32,
    /// Set by diagnostics, interrupt, or the continuation policy; once
    /// set, no further unit is started.
    pub stop: bool,
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final aggregate exit code: a lone run propagates its literal
    /// status; multi-run batches coarsen to 0 (all passed) or 1.
    pub fn aggregate_exit_code(&self, last_exit: i32) -> i32 {
        if self.run_count == 1 {
            last_exit
        } else if self.failure_count == 0 {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_run_propagates_literal_status() {
        let state = OrchestratorState {
            run_count: 1,
            failure_count: 1,
            stop: true,
        };
        assert_eq!(state.aggregate_exit_code(2), 2);
    }

    #[test]
    fn multi_run_coarsens_to_zero_or_one() {
        let mut state = OrchestratorState {
            run_count: 5,
            failure_count: 0,
            stop: false,
        };
        assert_eq!(state.aggregate_exit_code(0), 0);
        state.failure_count = 3;
        assert_eq!(state.aggregate_exit_code(2), 1);
    }
}
