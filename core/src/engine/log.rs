// sluice/src/engine/log.rs

//! The session log sink: where container output lines end up.

use std::sync::Arc;
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
  Stdout,
  Stderr,
}

impl LogStream {
  pub fn as_str(&self) -> &'static str {
    match self {
      LogStream::Stdout => "stdout",
      LogStream::Stderr => "stderr",
    }
  }
}

/// One line of output produced by an exec step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
  pub step_index: usize,
  pub stream: LogStream,
  pub line: String,
}

pub type LogCallback = Arc<dyn Fn(LogLine) + Send + Sync + 'static>;

/// Destination for exec output.
#[derive(Clone, Default)]
pub enum LogOutput {
  /// Forward every line as a `tracing` event under `sluice::engine`.
  #[default]
  Tracing,
  /// Hand every line to a callback.
  Callback(LogCallback),
  Discard,
}

impl std::fmt::Debug for LogOutput {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LogOutput::Tracing => f.write_str("Tracing"),
      LogOutput::Callback(_) => f.write_str("Callback(..)"),
      LogOutput::Discard => f.write_str("Discard"),
    }
  }
}

/// Cloneable handle to a session's `LogOutput`, passed to backends.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
  output: LogOutput,
}

impl LogSink {
  pub fn new(output: LogOutput) -> Self {
    Self { output }
  }

  pub fn emit(&self, step_index: usize, stream: LogStream, line: &str) {
    match &self.output {
      LogOutput::Tracing => match stream {
        LogStream::Stdout => {
          event!(target: "sluice::engine", Level::INFO, step = step_index, stream = stream.as_str(), "{}", line)
        }
        LogStream::Stderr => {
          event!(target: "sluice::engine", Level::WARN, step = step_index, stream = stream.as_str(), "{}", line)
        }
      },
      LogOutput::Callback(callback) => callback(LogLine {
        step_index,
        stream,
        line: line.to_string(),
      }),
      LogOutput::Discard => {}
    }
  }
}
