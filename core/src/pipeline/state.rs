// sluice/src/pipeline/state.rs

//! Defines the states a pipeline run moves through and the trace recording them.

use tracing::{event, Level};

/// Position of a run in its linear lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
  Start,
  SessionOpen,
  SpecDeclared,
  Realizing,
  /// Realization finished and every exec step succeeded.
  Done,
  /// Session open or realization failed.
  Failed,
  SessionClosed,
  Exit,
}

impl RunState {
  /// Whether `next` may directly follow `self`.
  pub fn can_advance_to(self, next: RunState) -> bool {
    use RunState::*;
    matches!(
      (self, next),
      (Start, SessionOpen)
        | (Start, Failed)
        | (SessionOpen, SpecDeclared)
        | (SpecDeclared, Realizing)
        | (Realizing, Done)
        | (Realizing, Failed)
        | (Done, SessionClosed)
        | (Failed, SessionClosed)
        | (Failed, Exit)
        | (SessionClosed, Exit)
    )
  }
}

/// Ordered record of the states one run visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTrace {
  states: Vec<RunState>,
}

impl RunTrace {
  pub fn new() -> Self {
    Self {
      states: vec![RunState::Start],
    }
  }

  pub fn current(&self) -> RunState {
    *self.states.last().unwrap_or(&RunState::Start)
  }

  pub fn states(&self) -> &[RunState] {
    &self.states
  }

  pub fn visited(&self, state: RunState) -> bool {
    self.states.contains(&state)
  }

  pub(crate) fn advance(&mut self, next: RunState) {
    let current = self.current();
    debug_assert!(
      current.can_advance_to(next),
      "illegal run transition {:?} -> {:?}",
      current,
      next
    );
    event!(Level::DEBUG, from = ?current, to = ?next, "Run state changed.");
    self.states.push(next);
  }
}

impl Default for RunTrace {
  fn default() -> Self {
    Self::new()
  }
}
