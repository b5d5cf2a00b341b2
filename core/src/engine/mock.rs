// sluice/src/engine/mock.rs

//! An in-memory engine for exercising pipelines without a container runtime.
//!
//! `MockBackend` records every call it receives and can be scripted to fail
//! the probe, fail chosen exec steps, or hang `start` or a step until the
//! context ends.

use super::backend::{Backend, ContainerHandle, ExecOutcome, StartPlan};
use super::log::{LogSink, LogStream};
use super::session::Session;
use super::{ConnectOptions, Engine};
use crate::container::ExecStep;
use crate::context::RunContext;
use crate::error::{SluiceError, SluiceResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A call observed by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
  Probe,
  Pull(String),
  Start(StartPlan),
  Exec { index: usize, command: String },
  Remove(String),
}

/// Decides the outcome of an exec step. `None` means success.
pub type ExecScript = Arc<dyn Fn(&ExecStep, &StartPlan) -> Option<ExecOutcome> + Send + Sync + 'static>;

#[derive(Default)]
struct Script {
  probe_error: Option<String>,
  exec: Option<ExecScript>,
  hang_on_step: Option<usize>,
  hang_on_start: bool,
}

#[derive(Default)]
pub struct MockBackend {
  calls: Mutex<Vec<MockCall>>,
  script: Mutex<Script>,
  started: Mutex<Vec<StartPlan>>,
  /// Containers created and not yet removed, as (session label, id).
  live: Mutex<Vec<(String, String)>>,
  next_id: AtomicUsize,
}

impl MockBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes `probe` fail with `EngineUnavailable`.
  pub fn failing_probe(self, message: impl Into<String>) -> Self {
    self.script.lock().probe_error = Some(message.into());
    self
  }

  pub fn with_exec_script(self, script: ExecScript) -> Self {
    self.script.lock().exec = Some(script);
    self
  }

  /// Fails the step at `index` with `exit_code` and `diagnostic`.
  pub fn failing_step(self, index: usize, exit_code: i32, diagnostic: impl Into<String>) -> Self {
    let diagnostic = diagnostic.into();
    self.with_exec_script(Arc::new(move |step: &ExecStep, _plan: &StartPlan| {
      (step.index == index).then(|| ExecOutcome {
        exit_code,
        diagnostic: diagnostic.clone(),
      })
    }))
  }

  /// Makes the step at `index` never finish on its own.
  pub fn hanging_on_step(self, index: usize) -> Self {
    self.script.lock().hang_on_step = Some(index);
    self
  }

  /// Makes `start` create its container and then never return, like an
  /// engine that accepted `run` but has not answered yet.
  pub fn hanging_on_start(self) -> Self {
    self.script.lock().hang_on_start = true;
    self
  }

  pub fn calls(&self) -> Vec<MockCall> {
    self.calls.lock().clone()
  }

  pub fn exec_indices(&self) -> Vec<usize> {
    self
      .calls
      .lock()
      .iter()
      .filter_map(|c| match c {
        MockCall::Exec { index, .. } => Some(*index),
        _ => None,
      })
      .collect()
  }

  pub fn removed(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .iter()
      .filter_map(|c| match c {
        MockCall::Remove(id) => Some(id.clone()),
        _ => None,
      })
      .collect()
  }

  /// Ids of containers created and not yet removed.
  pub fn live_containers(&self) -> Vec<String> {
    self.live.lock().iter().map(|(_, id)| id.clone()).collect()
  }

  fn record(&self, call: MockCall) {
    self.calls.lock().push(call);
  }
}

#[async_trait]
impl Backend for MockBackend {
  fn name(&self) -> &str {
    "mock"
  }

  async fn probe(&self) -> SluiceResult<String> {
    self.record(MockCall::Probe);
    let probe_error = self.script.lock().probe_error.clone();
    match probe_error {
      Some(message) => Err(SluiceError::EngineUnavailable {
        runtime: "mock".to_string(),
        message,
      }),
      None => Ok("mock-1.0".to_string()),
    }
  }

  async fn pull(&self, image: &str) -> SluiceResult<()> {
    self.record(MockCall::Pull(image.to_string()));
    Ok(())
  }

  async fn start(&self, plan: &StartPlan) -> SluiceResult<ContainerHandle> {
    self.record(MockCall::Start(plan.clone()));
    self.started.lock().push(plan.clone());
    let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
    self.live.lock().push((plan.session_label.clone(), id.clone()));

    let hang = self.script.lock().hang_on_start;
    if hang {
      std::future::pending::<()>().await;
    }
    Ok(ContainerHandle { id })
  }

  async fn exec(&self, _container: &ContainerHandle, step: &ExecStep, sink: &LogSink) -> SluiceResult<ExecOutcome> {
    self.record(MockCall::Exec {
      index: step.index,
      command: step.display_command(),
    });

    let (hang, script) = {
      let script = self.script.lock();
      (script.hang_on_step == Some(step.index), script.exec.clone())
    };
    if hang {
      std::future::pending::<()>().await;
    }

    let plan = self.started.lock().last().cloned();
    let outcome = match (script, plan) {
      (Some(script), Some(plan)) => script(step, &plan).unwrap_or_else(ExecOutcome::success),
      _ => ExecOutcome::success(),
    };
    if outcome.is_success() {
      sink.emit(step.index, LogStream::Stdout, &format!("ran {}", step.display_command()));
    } else {
      sink.emit(step.index, LogStream::Stderr, &outcome.diagnostic);
    }
    Ok(outcome)
  }

  async fn remove(&self, container: &ContainerHandle) -> SluiceResult<()> {
    self.record(MockCall::Remove(container.id.clone()));
    self.live.lock().retain(|(_, id)| *id != container.id);
    Ok(())
  }

  async fn remove_labelled(&self, session_label: &str) -> SluiceResult<Vec<String>> {
    let swept: Vec<String> = {
      let mut live = self.live.lock();
      let (swept, kept) = std::mem::take(&mut *live)
        .into_iter()
        .partition::<Vec<_>, _>(|(label, _)| label == session_label);
      *live = kept;
      swept.into_iter().map(|(_, id)| id).collect()
    };
    for id in &swept {
      self.record(MockCall::Remove(id.clone()));
    }
    Ok(swept)
  }
}

/// `Engine` over a shared `MockBackend`, counting connects.
#[derive(Clone, Default)]
pub struct MockEngine {
  backend: Arc<MockBackend>,
  connects: Arc<AtomicUsize>,
}

impl MockEngine {
  pub fn new(backend: MockBackend) -> Self {
    Self {
      backend: Arc::new(backend),
      connects: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn backend(&self) -> &MockBackend {
    &self.backend
  }

  pub fn connect_count(&self) -> usize {
    self.connects.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Engine for MockEngine {
  async fn connect(&self, ctx: &RunContext, options: ConnectOptions) -> SluiceResult<Session> {
    self.connects.fetch_add(1, Ordering::SeqCst);
    let backend: Arc<dyn Backend> = self.backend.clone();
    Session::open(backend, ctx, options).await
  }
}
