use tracing::debug;

use crate::utils::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Enumerating,
    Admitting,
    Draining,
    Completed,
    CompletedWithFailures,
}

impl RunPhase {
    /// Allowed edges of the run state machine.
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Enumerating)
                | (Enumerating, Admitting)
                | (Enumerating, Draining)
                | (Admitting, Draining)
                | (Draining, Completed)
                | (Draining, CompletedWithFailures)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::CompletedWithFailures)
    }
}

/// Current phase of a run plus the phases it went through.
#[derive(Debug, Clone)]
pub struct RunState {
    phase: RunPhase,
    history: Vec<RunPhase>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            history: vec![RunPhase::Idle],
        }
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<(), PipelineError> {
        if !self.phase.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!(from = ?self.phase, to = ?next, "run phase");
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}
