// sluice/src/engine/cli.rs

//! A `Backend` that drives an OCI container CLI (`docker` or `podman`) through
//! child processes, and the `CliEngine` that detects which one to use.
//!
//! Host directories are bind-mounted, so whatever the container writes under a
//! mount lands on the host without a separate export step.

use super::backend::{Backend, ContainerHandle, ExecOutcome, StartPlan};
use super::log::{LogSink, LogStream};
use super::session::Session;
use super::{ConnectOptions, Engine};
use crate::container::ExecStep;
use crate::context::RunContext;
use crate::error::{SluiceError, SluiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{event, Level};

/// Number of trailing output lines kept as the diagnostic of a failed step.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Label key identifying containers started by a session.
pub const SESSION_LABEL_KEY: &str = "io.sluice.session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
  Docker,
  Podman,
}

impl RuntimeKind {
  pub fn binary(&self) -> &'static str {
    match self {
      RuntimeKind::Docker => "docker",
      RuntimeKind::Podman => "podman",
    }
  }
}

/// Which runtime a `CliEngine` should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSelection {
  /// Try docker, then podman.
  #[default]
  Auto,
  Docker,
  Podman,
}

impl RuntimeSelection {
  pub fn candidates(&self) -> &'static [RuntimeKind] {
    match self {
      RuntimeSelection::Auto => &[RuntimeKind::Docker, RuntimeKind::Podman],
      RuntimeSelection::Docker => &[RuntimeKind::Docker],
      RuntimeSelection::Podman => &[RuntimeKind::Podman],
    }
  }
}

impl std::str::FromStr for RuntimeSelection {
  type Err = SluiceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(RuntimeSelection::Auto),
      "docker" => Ok(RuntimeSelection::Docker),
      "podman" => Ok(RuntimeSelection::Podman),
      other => Err(SluiceError::Configuration {
        message: format!("unknown runtime '{}' (expected auto, docker or podman)", other),
      }),
    }
  }
}

/// Argument vectors for each backend operation. Kept free of I/O.
pub mod args {
  use super::{RuntimeKind, SESSION_LABEL_KEY};
  use crate::container::ExecStep;
  use crate::engine::backend::{ContainerHandle, StartPlan};

  /// Asks the engine, not just the client, for its version.
  pub fn probe(kind: RuntimeKind) -> Vec<String> {
    match kind {
      RuntimeKind::Docker => vec!["version".into(), "--format".into(), "{{.Server.Version}}".into()],
      RuntimeKind::Podman => vec!["info".into(), "--format".into(), "{{.Version.Version}}".into()],
    }
  }

  pub fn pull(image: &str) -> Vec<String> {
    vec!["pull".into(), "--quiet".into(), image.into()]
  }

  /// Succeeds only when `image` is already in the local store.
  pub fn inspect_image(image: &str) -> Vec<String> {
    vec![
      "image".into(),
      "inspect".into(),
      "--format".into(),
      "{{.Id}}".into(),
      image.into(),
    ]
  }

  /// Starts a detached container that idles until removed, so exec steps
  /// share one filesystem.
  pub fn run(plan: &StartPlan) -> Vec<String> {
    let mut args: Vec<String> = vec![
      "run".into(),
      "--detach".into(),
      "--label".into(),
      format!("{}={}", SESSION_LABEL_KEY, plan.session_label),
    ];
    for mount in &plan.mounts {
      args.push("--volume".into());
      args.push(format!("{}:{}", mount.host.display(), mount.target));
    }
    if let Some(workdir) = &plan.workdir {
      args.push("--workdir".into());
      args.push(workdir.clone());
    }
    for (name, value) in &plan.env {
      args.push("--env".into());
      args.push(format!("{}={}", name, value));
    }
    for arg in ["--entrypoint", "tail", plan.image.as_str(), "-f", "/dev/null"] {
      args.push(arg.to_string());
    }
    args
  }

  pub fn exec(container: &ContainerHandle, step: &ExecStep) -> Vec<String> {
    let mut args = vec!["exec".to_string(), container.id.clone()];
    args.extend(step.args.iter().cloned());
    args
  }

  pub fn remove(container: &ContainerHandle) -> Vec<String> {
    vec!["rm".into(), "--force".into(), container.id.clone()]
  }

  /// Lists the ids of every container, running or not, owned by a session.
  pub fn list_labelled(session_label: &str) -> Vec<String> {
    vec![
      "ps".into(),
      "--all".into(),
      "--quiet".into(),
      "--filter".into(),
      format!("label={}={}", SESSION_LABEL_KEY, session_label),
    ]
  }

  pub fn remove_all(ids: &[String]) -> Vec<String> {
    let mut args = vec!["rm".to_string(), "--force".to_string()];
    args.extend(ids.iter().cloned());
    args
  }
}

/// Backend over one container CLI binary.
#[derive(Debug, Clone)]
pub struct ContainerCli {
  kind: RuntimeKind,
}

struct Captured {
  exit_code: i32,
  stdout: String,
  stderr: String,
}

impl ContainerCli {
  pub fn new(kind: RuntimeKind) -> Self {
    Self { kind }
  }

  pub fn kind(&self) -> RuntimeKind {
    self.kind
  }

  fn command(&self, args: &[String]) -> Command {
    let mut cmd = Command::new(self.kind.binary());
    cmd
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    cmd
  }

  fn spawn_error(&self, e: std::io::Error) -> SluiceError {
    if e.kind() == std::io::ErrorKind::NotFound {
      SluiceError::RuntimeNotFound {
        tried: self.kind.binary().to_string(),
      }
    } else {
      SluiceError::io(format!("spawning {}", self.kind.binary()), e)
    }
  }

  /// Runs a short CLI call to completion and captures its output.
  async fn capture(&self, args: &[String]) -> SluiceResult<Captured> {
    event!(Level::TRACE, binary = self.kind.binary(), args = ?args, "Invoking container CLI.");
    let output = self.command(args).output().await.map_err(|e| self.spawn_error(e))?;
    Ok(Captured {
      exit_code: output.status.code().unwrap_or(-1),
      stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
  }
}

#[async_trait]
impl Backend for ContainerCli {
  fn name(&self) -> &str {
    self.kind.binary()
  }

  async fn probe(&self) -> SluiceResult<String> {
    let out = self.capture(&args::probe(self.kind)).await?;
    if out.exit_code != 0 || out.stdout.is_empty() {
      return Err(SluiceError::EngineUnavailable {
        runtime: self.kind.binary().to_string(),
        message: non_empty_or(out.stderr, "engine did not report a server version"),
      });
    }
    Ok(out.stdout)
  }

  async fn pull(&self, image: &str) -> SluiceResult<()> {
    let pulled = self.capture(&args::pull(image)).await?;
    if pulled.exit_code == 0 {
      return Ok(());
    }
    let cached = self.capture(&args::inspect_image(image)).await?.exit_code == 0;
    pull_result(image, pulled, cached)
  }

  async fn start(&self, plan: &StartPlan) -> SluiceResult<ContainerHandle> {
    let out = self.capture(&args::run(plan)).await?;
    if out.exit_code != 0 || out.stdout.is_empty() {
      return Err(SluiceError::ContainerStart {
        image: plan.image.clone(),
        message: non_empty_or(out.stderr, "engine returned no container id"),
      });
    }
    // Some engines print pull progress before the id.
    let id = out.stdout.lines().last().unwrap_or_default().trim().to_string();
    Ok(ContainerHandle { id })
  }

  async fn exec(&self, container: &ContainerHandle, step: &ExecStep, sink: &LogSink) -> SluiceResult<ExecOutcome> {
    let mut child = self
      .command(&args::exec(container, step))
      .spawn()
      .map_err(|e| self.spawn_error(e))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout_tail, stderr_tail) = tokio::join!(
      forward_lines(stdout, step.index, LogStream::Stdout, sink),
      forward_lines(stderr, step.index, LogStream::Stderr, sink),
    );

    let status = child
      .wait()
      .await
      .map_err(|e| SluiceError::io(format!("waiting for exec step {}", step.index), e))?;

    let tail = if stderr_tail.is_empty() { stdout_tail } else { stderr_tail };
    Ok(ExecOutcome {
      exit_code: status.code().unwrap_or(-1),
      diagnostic: Vec::from(tail).join("\n"),
    })
  }

  async fn remove(&self, container: &ContainerHandle) -> SluiceResult<()> {
    let out = self.capture(&args::remove(container)).await?;
    if out.exit_code != 0 {
      return Err(SluiceError::Backend {
        source: anyhow::anyhow!(
          "removing container {}: {}",
          container.id,
          non_empty_or(out.stderr, "rm failed")
        ),
      });
    }
    Ok(())
  }

  async fn remove_labelled(&self, session_label: &str) -> SluiceResult<Vec<String>> {
    let listed = self.capture(&args::list_labelled(session_label)).await?;
    if listed.exit_code != 0 {
      return Err(SluiceError::Backend {
        source: anyhow::anyhow!(
          "listing containers of session {}: {}",
          session_label,
          non_empty_or(listed.stderr, "ps failed")
        ),
      });
    }
    let ids: Vec<String> = listed
      .stdout
      .lines()
      .map(str::trim)
      .filter(|id| !id.is_empty())
      .map(String::from)
      .collect();
    if ids.is_empty() {
      return Ok(ids);
    }
    let out = self.capture(&args::remove_all(&ids)).await?;
    if out.exit_code != 0 {
      return Err(SluiceError::Backend {
        source: anyhow::anyhow!(
          "removing containers of session {}: {}",
          session_label,
          non_empty_or(out.stderr, "rm failed")
        ),
      });
    }
    Ok(ids)
  }
}

/// A failed pull is tolerated when the image is already cached locally,
/// so runs keep working offline.
fn pull_result(image: &str, pulled: Captured, cached: bool) -> SluiceResult<()> {
  if cached {
    event!(
      Level::WARN,
      image,
      error = %non_empty_or(pulled.stderr, "pull failed"),
      "Pull failed, using the locally cached image."
    );
    return Ok(());
  }
  Err(SluiceError::ImagePull {
    image: image.to_string(),
    message: non_empty_or(pulled.stderr, "pull failed"),
  })
}

/// Forwards each output line to the sink and returns the last few. Bytes that
/// are not UTF-8 are replaced, and the stream is always drained to EOF so the
/// writing process never sees a closed pipe.
async fn forward_lines<R>(reader: Option<R>, step_index: usize, stream: LogStream, sink: &LogSink) -> VecDeque<String>
where
  R: AsyncRead + Unpin,
{
  let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);
  let Some(reader) = reader else {
    return tail;
  };
  let mut reader = BufReader::new(reader);
  let mut buf = Vec::new();
  loop {
    buf.clear();
    match reader.read_until(b'\n', &mut buf).await {
      Ok(0) => break,
      Ok(_) => {
        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw).into_owned();
        sink.emit(step_index, stream, &line);
        if tail.len() == DIAGNOSTIC_TAIL_LINES {
          tail.pop_front();
        }
        tail.push_back(line);
      }
      Err(e) => {
        event!(Level::WARN, step = step_index, stream = stream.as_str(), error = %e, "Exec output unreadable, discarding the rest.");
        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
        break;
      }
    }
  }
  tail
}

fn non_empty_or(text: String, fallback: &str) -> String {
  if text.is_empty() {
    fallback.to_string()
  } else {
    text
  }
}

/// Engine over whichever container CLI is installed and reachable.
#[derive(Debug, Clone, Default)]
pub struct CliEngine {
  selection: RuntimeSelection,
}

impl CliEngine {
  pub fn new(selection: RuntimeSelection) -> Self {
    Self { selection }
  }
}

#[async_trait]
impl Engine for CliEngine {
  async fn connect(&self, ctx: &RunContext, options: ConnectOptions) -> SluiceResult<Session> {
    let mut failures = Vec::new();
    for kind in self.selection.candidates() {
      let backend: Arc<dyn Backend> = Arc::new(ContainerCli::new(*kind));
      match Session::open(backend, ctx, options.clone()).await {
        Ok(session) => return Ok(session),
        Err(e) if e.is_cancellation() => return Err(e),
        Err(e) => {
          event!(Level::DEBUG, runtime = kind.binary(), error = %e, "Runtime not usable.");
          failures.push(e);
        }
      }
    }
    Err(connect_error(self.selection, failures))
  }
}

/// Picks the error to report once every candidate runtime failed. A binary
/// whose engine is down says more than a missing binary, so the first such
/// failure wins; otherwise every candidate is listed as not found.
fn connect_error(selection: RuntimeSelection, failures: Vec<SluiceError>) -> SluiceError {
  failures
    .into_iter()
    .find(|e| !matches!(e, SluiceError::RuntimeNotFound { .. }))
    .unwrap_or_else(|| SluiceError::RuntimeNotFound {
      tried: selection
        .candidates()
        .iter()
        .map(RuntimeKind::binary)
        .collect::<Vec<_>>()
        .join(", "),
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::backend::ResolvedMount;
  use std::path::PathBuf;

  fn plan() -> StartPlan {
    StartPlan {
      image: "python:3.10".to_string(),
      mounts: vec![ResolvedMount {
        host: PathBuf::from("/home/ci/repo"),
        target: "/src".to_string(),
      }],
      workdir: Some("/src".to_string()),
      env: vec![("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string())],
      session_label: "sluice-1-abc".to_string(),
    }
  }

  #[test]
  fn run_args_mount_workdir_env_and_idle_entrypoint() {
    let args = args::run(&plan());
    let joined = args.join(" ");
    assert!(joined.starts_with("run --detach --label io.sluice.session=sluice-1-abc"));
    assert!(joined.contains("--volume /home/ci/repo:/src"));
    assert!(joined.contains("--workdir /src"));
    assert!(joined.contains("--env PIP_DISABLE_PIP_VERSION_CHECK=1"));
    assert!(joined.ends_with("--entrypoint tail python:3.10 -f /dev/null"));
  }

  #[test]
  fn exec_args_pass_the_command_vector_verbatim() {
    let step = ExecStep {
      index: 1,
      args: vec!["pip".into(), "install".into(), "-r".into(), "requirements.txt".into()],
    };
    let handle = ContainerHandle { id: "c0ffee".into() };
    assert_eq!(
      args::exec(&handle, &step),
      vec!["exec", "c0ffee", "pip", "install", "-r", "requirements.txt"]
    );
    assert_eq!(args::remove(&handle), vec!["rm", "--force", "c0ffee"]);
  }

  #[test]
  fn runtime_selection_parses_and_orders_candidates() {
    assert_eq!("Podman".parse::<RuntimeSelection>().unwrap(), RuntimeSelection::Podman);
    assert!("containerd".parse::<RuntimeSelection>().is_err());
    assert_eq!(
      RuntimeSelection::Auto.candidates(),
      &[RuntimeKind::Docker, RuntimeKind::Podman]
    );
  }

  #[test]
  fn session_sweep_args_filter_on_the_label() {
    assert_eq!(
      args::list_labelled("sluice-1-abc"),
      vec!["ps", "--all", "--quiet", "--filter", "label=io.sluice.session=sluice-1-abc"]
    );
    assert_eq!(
      args::remove_all(&["a1".to_string(), "b2".to_string()]),
      vec!["rm", "--force", "a1", "b2"]
    );
    assert_eq!(
      args::inspect_image("python:3.10"),
      vec!["image", "inspect", "--format", "{{.Id}}", "python:3.10"]
    );
  }

  fn failed_pull() -> Captured {
    Captured {
      exit_code: 1,
      stdout: String::new(),
      stderr: "dial tcp: lookup registry-1.docker.io: no such host".to_string(),
    }
  }

  #[test]
  fn failed_pull_falls_back_to_a_cached_image() {
    assert!(pull_result("python:3.10", failed_pull(), true).is_ok());
    match pull_result("python:3.10", failed_pull(), false) {
      Err(SluiceError::ImagePull { image, message }) => {
        assert_eq!(image, "python:3.10");
        assert!(message.contains("no such host"));
      }
      other => panic!("expected ImagePull, got {:?}", other),
    }
  }

  #[test]
  fn connect_error_prefers_an_unreachable_engine_over_a_missing_binary() {
    let missing = || SluiceError::RuntimeNotFound {
      tried: "docker".to_string(),
    };
    let unreachable = || SluiceError::EngineUnavailable {
      runtime: "podman".to_string(),
      message: "cannot connect to podman socket".to_string(),
    };

    match connect_error(RuntimeSelection::Auto, vec![missing(), unreachable()]) {
      SluiceError::EngineUnavailable { runtime, .. } => assert_eq!(runtime, "podman"),
      other => panic!("expected EngineUnavailable, got {:?}", other),
    }
    match connect_error(RuntimeSelection::Auto, vec![unreachable(), missing()]) {
      SluiceError::EngineUnavailable { runtime, .. } => assert_eq!(runtime, "podman"),
      other => panic!("expected EngineUnavailable, got {:?}", other),
    }
    match connect_error(RuntimeSelection::Auto, vec![missing(), missing()]) {
      SluiceError::RuntimeNotFound { tried } => assert_eq!(tried, "docker, podman"),
      other => panic!("expected RuntimeNotFound, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn forward_lines_survives_output_that_is_not_utf8() {
    let mut bytes = b"line a\n".to_vec();
    bytes.extend_from_slice(b"caf\xe9\n");
    bytes.extend_from_slice(b"Traceback: real error\r\n");
    bytes.extend_from_slice(b"no trailing newline");
    let sink = LogSink::new(crate::engine::LogOutput::Discard);

    let tail = forward_lines(Some(bytes.as_slice()), 2, LogStream::Stderr, &sink).await;

    assert_eq!(
      Vec::from(tail),
      vec!["line a", "caf\u{FFFD}", "Traceback: real error", "no trailing newline"]
    );
  }

  #[tokio::test]
  async fn forward_lines_keeps_only_the_tail() {
    let text: String = (0..30).map(|i| format!("line {}\n", i)).collect();
    let sink = LogSink::new(crate::engine::LogOutput::Discard);
    let tail = forward_lines(Some(text.as_bytes()), 0, LogStream::Stderr, &sink).await;
    assert_eq!(tail.len(), DIAGNOSTIC_TAIL_LINES);
    assert_eq!(tail.front().map(String::as_str), Some("line 10"));
    assert_eq!(tail.back().map(String::as_str), Some("line 29"));
  }
}
