// sluice/src/pipeline/runner.rs

//! Contains `PipelineRunner`, which opens a session, declares the Python
//! container, realizes it and always releases the session afterwards.

use super::config::PipelineConfig;
use super::state::{RunState, RunTrace};
use crate::container::{ContainerSpec, Host};
use crate::context::RunContext;
use crate::engine::{ConnectOptions, Engine, SyncedContainer};
use crate::error::{SluiceError, SluiceResult};
use std::sync::Arc;
use tracing::{event, instrument, Level};

pub const SUCCESS_MESSAGE: &str = "pipeline completed successfully";
pub const FAILURE_MESSAGE: &str = "pipeline failed";

/// Builds the container spec for `config` on top of `base`.
pub fn declare_spec(config: &PipelineConfig, base: ContainerSpec, host: Host) -> ContainerSpec {
  let mut spec = base
    .from(config.image.as_str())
    .with_mounted_directory(config.mount_path.as_str(), host.directory(&config.host_dir))
    .with_workdir(config.mount_path.as_str());
  for (name, value) in &config.env {
    spec = spec.with_env_variable(name.as_str(), value.as_str());
  }
  for command in config.commands() {
    spec = spec.with_exec(command);
  }
  spec
}

pub struct PipelineRunner {
  engine: Arc<dyn Engine>,
  config: PipelineConfig,
  options: ConnectOptions,
}

impl PipelineRunner {
  pub fn new(engine: Arc<dyn Engine>, config: PipelineConfig) -> Self {
    Self {
      engine,
      config,
      options: ConnectOptions::default(),
    }
  }

  pub fn with_connect_options(mut self, options: ConnectOptions) -> Self {
    self.options = options;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub async fn run(&self, ctx: &RunContext) -> SluiceResult<SyncedContainer> {
    self.run_traced(ctx).await.0
  }

  /// Like `run`, also returning the states the run went through.
  #[instrument(
    name = "PipelineRunner::run",
    skip_all,
    fields(image = %self.config.image, manifest = %self.config.manifest, entry_script = %self.config.entry_script)
  )]
  pub async fn run_traced(&self, ctx: &RunContext) -> (SluiceResult<SyncedContainer>, RunTrace) {
    let mut trace = RunTrace::new();

    if let Err(e) = self.config.validate() {
      trace.advance(RunState::Failed);
      trace.advance(RunState::Exit);
      return (Err(e), trace);
    }

    let session = match self.engine.connect(ctx, self.options.clone()).await {
      Ok(session) => session,
      Err(e) => {
        event!(Level::ERROR, error = %e, "Could not open engine session.");
        trace.advance(RunState::Failed);
        trace.advance(RunState::Exit);
        return (Err(e), trace);
      }
    };
    trace.advance(RunState::SessionOpen);

    let spec = declare_spec(&self.config, session.container(), session.host());
    trace.advance(RunState::SpecDeclared);
    event!(Level::DEBUG, steps = spec.execs().len(), "Container spec declared.");

    trace.advance(RunState::Realizing);
    let synced = spec.sync(&session, ctx).await;
    trace.advance(if synced.is_ok() { RunState::Done } else { RunState::Failed });

    let closed = session.close().await;
    trace.advance(RunState::SessionClosed);
    trace.advance(RunState::Exit);

    let result = match (synced, closed) {
      (Ok(synced), Ok(())) => Ok(synced),
      (Ok(_), Err(close_err)) => Err(close_err),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(close_err)) => {
        event!(Level::WARN, error = %close_err, "Session release also failed.");
        Err(e)
      }
    };
    (result, trace)
  }
}

/// What the process reports and exits with for a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
  pub code: i32,
  pub message: String,
}

impl ExitReport {
  pub fn from_result<T>(result: &Result<T, SluiceError>) -> Self {
    match result {
      Ok(_) => Self {
        code: 0,
        message: SUCCESS_MESSAGE.to_string(),
      },
      Err(e) => Self {
        code: 1,
        message: format!("{}: {}", FAILURE_MESSAGE, e),
      },
    }
  }

  pub fn is_success(&self) -> bool {
    self.code == 0
  }
}
