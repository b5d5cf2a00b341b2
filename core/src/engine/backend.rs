// sluice/src/engine/backend.rs

//! Defines the `Backend` trait, the type-erased seam between a `Session` and
//! whatever actually runs containers.

use super::log::LogSink;
use crate::container::ExecStep;
use crate::error::SluiceResult;
use async_trait::async_trait;
use std::path::PathBuf;

/// A mount whose host side has been resolved to an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
  pub host: PathBuf,
  pub target: String,
}

/// Everything a backend needs to start the container a spec describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPlan {
  pub image: String,
  pub mounts: Vec<ResolvedMount>,
  pub workdir: Option<String>,
  pub env: Vec<(String, String)>,
  /// Label attached to the container so a session can find what it owns.
  pub session_label: String,
}

/// A running container started by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
  pub id: String,
}

/// Result of one exec step as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
  pub exit_code: i32,
  /// Trailing output captured for error reporting.
  pub diagnostic: String,
}

impl ExecOutcome {
  pub fn success() -> Self {
    Self {
      exit_code: 0,
      diagnostic: String::new(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.exit_code == 0
  }
}

/// Operations a session drives, in the order a realization uses them:
/// `probe` once at connect, then `pull`, `start`, `exec` per step, and
/// finally `remove` for every started container at close.
///
/// The session races every call except the removals against its
/// `RunContext` and drops the future when the context finishes, so
/// implementations must be cancel-safe. A container whose `start` was
/// dropped mid-flight is reclaimed by `remove_labelled`.
#[async_trait]
pub trait Backend: Send + Sync {
  /// Short engine name used in logs ("docker", "podman", "mock").
  fn name(&self) -> &str;

  /// Verifies the engine is reachable and returns its version string.
  async fn probe(&self) -> SluiceResult<String>;

  async fn pull(&self, image: &str) -> SluiceResult<()>;

  async fn start(&self, plan: &StartPlan) -> SluiceResult<ContainerHandle>;

  async fn exec(&self, container: &ContainerHandle, step: &ExecStep, sink: &LogSink) -> SluiceResult<ExecOutcome>;

  /// Force-removes a container. Called during session release, which does not
  /// observe cancellation.
  async fn remove(&self, container: &ContainerHandle) -> SluiceResult<()>;

  /// Force-removes every container still carrying `session_label` and
  /// returns their ids. Runs at session release after `remove`.
  async fn remove_labelled(&self, session_label: &str) -> SluiceResult<Vec<String>>;
}
