// sluice/src/engine/session.rs

//! Contains the `Session` handle and the realization of a `ContainerSpec`.
//!
//! Realization validates the spec, pulls the image, starts one container and
//! runs the exec queue in order inside it, so filesystem changes made by one
//! step are visible to the next. The first failing step ends the queue.

use super::backend::{Backend, ContainerHandle, ResolvedMount, StartPlan};
use super::log::LogSink;
use super::ConnectOptions;
use crate::container::{ContainerSpec, ExecStep, Host};
use crate::context::RunContext;
use crate::error::{SluiceError, SluiceResult};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{event, instrument, Level};

#[derive(Debug)]
struct SessionState {
  open: bool,
  containers: Vec<ContainerHandle>,
}

/// An open connection to a backend. Owned by exactly one pipeline run.
///
/// `close` consumes the session; dropping an open session only logs, since
/// container removal needs an async backend call.
pub struct Session {
  backend: Arc<dyn Backend>,
  sink: LogSink,
  label: String,
  engine_version: String,
  state: Mutex<SessionState>,
}

/// Terminal success of a realization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedContainer {
  pub container: ContainerHandle,
  pub image: String,
  pub executed: Vec<ExecStep>,
  /// Host directories whose contents now reflect the container's writes.
  pub synced_directories: Vec<PathBuf>,
}

impl Session {
  /// Probes `backend` and opens a session on it.
  #[instrument(name = "Session::open", skip_all, fields(backend = backend.name()), err(Display))]
  pub async fn open(backend: Arc<dyn Backend>, ctx: &RunContext, options: ConnectOptions) -> SluiceResult<Self> {
    let engine_version = ctx.run(backend.probe()).await?;
    let label = session_label();
    event!(Level::INFO, %engine_version, session = %label, "Engine session opened.");
    Ok(Self {
      backend,
      sink: LogSink::new(options.log_output),
      label,
      engine_version,
      state: Mutex::new(SessionState {
        open: true,
        containers: Vec::new(),
      }),
    })
  }

  pub fn engine_version(&self) -> &str {
    &self.engine_version
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn is_open(&self) -> bool {
    self.state.lock().open
  }

  pub fn host(&self) -> Host {
    Host
  }

  /// An empty spec to build on.
  pub fn container(&self) -> ContainerSpec {
    ContainerSpec::new()
  }

  /// Realizes `spec` and waits until every exec step finished or one failed.
  #[instrument(
        name = "Session::sync",
        skip_all,
        fields(
            backend = self.backend.name(),
            image = spec.image().unwrap_or_default(),
            num_steps = spec.execs().len(),
        ),
        err(Display)
    )]
  pub async fn sync(&self, ctx: &RunContext, spec: &ContainerSpec) -> SluiceResult<SyncedContainer> {
    if !self.is_open() {
      return Err(SluiceError::SessionClosed);
    }
    spec.validate()?;
    let plan = self.start_plan(spec)?;

    event!(Level::INFO, image = %plan.image, "Pulling image.");
    ctx.run(self.backend.pull(&plan.image)).await?;

    let container = ctx.run(self.backend.start(&plan)).await?;
    self.state.lock().containers.push(container.clone());
    event!(Level::DEBUG, container = %container.id, "Container started.");

    let mut executed = Vec::with_capacity(spec.execs().len());
    for step in spec.execs() {
      self.run_step(ctx, &container, step).await?;
      executed.push(step.clone());
    }

    event!(Level::INFO, "Container realized.");
    Ok(SyncedContainer {
      container,
      image: plan.image,
      executed,
      synced_directories: plan.mounts.into_iter().map(|m| m.host).collect(),
    })
  }

  #[instrument(
        name = "exec_step",
        skip_all,
        fields(step_index = step.index, command = %step.display_command()),
    )]
  async fn run_step(&self, ctx: &RunContext, container: &ContainerHandle, step: &ExecStep) -> SluiceResult<()> {
    event!(Level::INFO, "Running exec step.");
    let outcome = ctx.run(self.backend.exec(container, step, &self.sink)).await?;
    if !outcome.is_success() {
      event!(Level::ERROR, exit_code = outcome.exit_code, "Exec step failed.");
      return Err(SluiceError::ExecFailed {
        index: step.index,
        command: step.display_command(),
        exit_code: outcome.exit_code,
        diagnostic: outcome.diagnostic,
      });
    }
    event!(Level::DEBUG, "Exec step finished.");
    Ok(())
  }

  /// Releases the session, removing every container it started, including
  /// any the backend created while a cancelled `start` was in flight.
  ///
  /// Removal is attempted for all containers even if one fails; the first
  /// failure is returned.
  #[instrument(name = "Session::close", skip_all, fields(session = %self.label), err(Display))]
  pub async fn close(self) -> SluiceResult<()> {
    let containers = {
      let mut state = self.state.lock();
      state.open = false;
      std::mem::take(&mut state.containers)
    };

    let mut first_err = None;
    for container in &containers {
      if let Err(e) = self.backend.remove(container).await {
        event!(Level::WARN, container = %container.id, error = %e, "Failed to remove container.");
        first_err.get_or_insert(e);
      }
    }

    // Containers whose start was interrupted never reached `containers`.
    let stray = match self.backend.remove_labelled(&self.label).await {
      Ok(ids) => ids,
      Err(e) => {
        event!(Level::WARN, error = %e, "Failed to remove labelled containers.");
        first_err.get_or_insert(e);
        Vec::new()
      }
    };
    if !stray.is_empty() {
      event!(Level::WARN, ids = ?stray, "Removed containers left by an interrupted start.");
    }

    event!(
      Level::INFO,
      removed = containers.len() + stray.len(),
      "Engine session closed."
    );
    first_err.map_or(Ok(()), Err)
  }

  fn start_plan(&self, spec: &ContainerSpec) -> SluiceResult<StartPlan> {
    let mounts = spec
      .mounts()
      .iter()
      .map(|m| {
        Ok(ResolvedMount {
          host: m.source.resolve()?,
          target: m.target.clone(),
        })
      })
      .collect::<SluiceResult<Vec<_>>>()?;

    Ok(StartPlan {
      image: spec.image().unwrap_or_default().to_string(),
      mounts,
      workdir: spec.workdir().map(str::to_string),
      env: spec.env().to_vec(),
      session_label: self.label.clone(),
    })
  }
}

impl ContainerSpec {
  /// Realizes this spec on `session`. See `Session::sync`.
  pub async fn sync(&self, session: &Session, ctx: &RunContext) -> SluiceResult<SyncedContainer> {
    session.sync(ctx, self).await
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    let state = self.state.get_mut();
    if state.open {
      event!(
        Level::WARN,
        session = %self.label,
        leaked = state.containers.len(),
        "Engine session dropped without close."
      );
    }
  }
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("backend", &self.backend.name())
      .field("label", &self.label)
      .field("engine_version", &self.engine_version)
      .field("state", &*self.state.lock())
      .finish()
  }
}

fn session_label() -> String {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or_default();
  format!("sluice-{}-{:x}", std::process::id(), nanos)
}
