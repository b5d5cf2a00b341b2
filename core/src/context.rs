// sluice/src/context.rs

//! Defines `RunContext`, the cancellation and deadline carrier handed to every
//! engine call.
//!
//! A context is done once it is cancelled explicitly or its deadline passes.
//! Child contexts share the parent's cancellation but may carry a tighter
//! deadline; cancelling a child never cancels its parent.

use crate::error::SluiceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
  Cancelled,
  DeadlineExceeded,
}

impl DoneReason {
  pub fn into_error(self) -> SluiceError {
    match self {
      DoneReason::Cancelled => SluiceError::Cancelled,
      DoneReason::DeadlineExceeded => SluiceError::DeadlineExceeded,
    }
  }
}

#[derive(Debug, Clone)]
pub struct RunContext {
  token: CancellationToken,
  deadline: Option<Instant>,
}

impl RunContext {
  /// A context that is never done unless cancelled.
  pub fn background() -> Self {
    Self {
      token: CancellationToken::new(),
      deadline: None,
    }
  }

  pub fn with_timeout(&self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }

  /// Derives a child whose deadline is the earlier of `deadline` and the parent's.
  pub fn with_deadline(&self, deadline: Instant) -> Self {
    let deadline = match self.deadline {
      Some(existing) if existing < deadline => existing,
      _ => deadline,
    };
    Self {
      token: self.token.child_token(),
      deadline: Some(deadline),
    }
  }

  pub fn child(&self) -> Self {
    Self {
      token: self.token.child_token(),
      deadline: self.deadline,
    }
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// Non-blocking check of the context state.
  pub fn done_reason(&self) -> Option<DoneReason> {
    if self.token.is_cancelled() {
      return Some(DoneReason::Cancelled);
    }
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => Some(DoneReason::DeadlineExceeded),
      _ => None,
    }
  }

  pub fn is_done(&self) -> bool {
    self.done_reason().is_some()
  }

  pub fn err(&self) -> Option<SluiceError> {
    self.done_reason().map(DoneReason::into_error)
  }

  /// Resolves once the context is done.
  pub async fn done(&self) -> DoneReason {
    match self.deadline {
      Some(deadline) => {
        tokio::select! {
          _ = self.token.cancelled() => DoneReason::Cancelled,
          _ = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
        }
      }
      None => {
        self.token.cancelled().await;
        DoneReason::Cancelled
      }
    }
  }

  /// Drives `fut` to completion unless the context finishes first.
  ///
  /// A context that is already done fails without polling `fut`.
  pub async fn run<F, T>(&self, fut: F) -> Result<T, SluiceError>
  where
    F: Future<Output = Result<T, SluiceError>>,
  {
    if let Some(err) = self.err() {
      return Err(err);
    }
    tokio::select! {
      biased;
      reason = self.done() => Err(reason.into_error()),
      out = fut => out,
    }
  }
}

impl Default for RunContext {
  fn default() -> Self {
    Self::background()
  }
}
