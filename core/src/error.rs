// sluice/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SluiceError {
  #[error("Container engine '{runtime}' is unavailable: {message}")]
  EngineUnavailable { runtime: String, message: String },

  #[error("No container engine found (tried: {tried})")]
  RuntimeNotFound { tried: String },

  #[error("Engine session is closed")]
  SessionClosed,

  #[error("Container specification is incomplete: {message}")]
  InvalidSpec { message: String },

  #[error("Failed to pull image '{image}': {message}")]
  ImagePull { image: String, message: String },

  #[error("Failed to start container from '{image}': {message}")]
  ContainerStart { image: String, message: String },

  #[error("Exec step {index} `{command}` exited with code {exit_code}: {diagnostic}")]
  ExecFailed {
    index: usize,
    command: String,
    exit_code: i32,
    diagnostic: String,
  },

  #[error("Execution context was cancelled")]
  Cancelled,

  #[error("Execution context deadline exceeded")]
  DeadlineExceeded,

  #[error("I/O error while {context}. Source: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Configuration error: {message}")]
  Configuration { message: String },

  #[error("Backend error. Source: {source}")]
  Backend {
    #[source]
    source: AnyhowError,
  },
}

impl SluiceError {
  /// True for the two ways a `RunContext` ends a run early.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, SluiceError::Cancelled | SluiceError::DeadlineExceeded)
  }

  pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    SluiceError::Io {
      context: context.into(),
      source,
    }
  }
}

// External backends report through anyhow; a SluiceError that was boxed on the
// way through is unwrapped instead of nested.
impl From<AnyhowError> for SluiceError {
  fn from(err: AnyhowError) -> Self {
    match err.downcast::<SluiceError>() {
      Ok(sluice_err) => sluice_err,
      Err(source) => SluiceError::Backend { source },
    }
  }
}

pub type SluiceResult<T, E = SluiceError> = std::result::Result<T, E>;
