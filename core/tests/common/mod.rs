// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sluice::engine::mock::{MockBackend, MockEngine};
use sluice::engine::{ExecOutcome, LogLine, LogOutput, StartPlan};
use sluice::{ConnectOptions, ExecStep, PipelineConfig, PipelineRunner};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::Level;

// --- Helper for Tracing Setup (call once per test run if needed) ---
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Scratch host directories ---
static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A fresh, empty directory standing in for the repository being built.
/// Removed on drop.
pub struct ScratchDir {
  path: PathBuf,
}

impl ScratchDir {
  pub fn new(label: &str) -> Self {
    let path = std::env::temp_dir().join(format!(
      "sluice-test-{}-{}-{}",
      label,
      std::process::id(),
      SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&path).unwrap();
    Self { path }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn write(&self, relative: &str, contents: &str) -> &Self {
    let file = self.path.join(relative);
    if let Some(parent) = file.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(file, contents).unwrap();
    self
  }
}

impl Drop for ScratchDir {
  fn drop(&mut self) {
    let _ = std::fs::remove_dir_all(&self.path);
  }
}

/// Config pointing at `dir` with every other field at its default.
pub fn config_for(dir: &ScratchDir) -> PipelineConfig {
  PipelineConfig {
    host_dir: dir.path().to_path_buf(),
    ..PipelineConfig::default()
  }
}

/// Mock whose `pip install -r <manifest>` fails like pip does when the
/// manifest is absent from the mounted host directory.
pub fn backend_checking_manifests() -> MockBackend {
  MockBackend::new().with_exec_script(Arc::new(|step: &ExecStep, plan: &StartPlan| {
    let is_requirements_install = step.args.len() == 4 && step.args[0] == "pip" && step.args[2] == "-r";
    if !is_requirements_install {
      return None;
    }
    let mount = plan.mounts.first()?;
    if mount.host.join(&step.args[3]).exists() {
      None
    } else {
      Some(ExecOutcome {
        exit_code: 1,
        diagnostic: format!(
          "ERROR: Could not open requirements file: [Errno 2] No such file or directory: '{}'",
          step.args[3]
        ),
      })
    }
  }))
}

pub fn runner_on(engine: &MockEngine, config: PipelineConfig) -> PipelineRunner {
  PipelineRunner::new(Arc::new(engine.clone()), config)
    .with_connect_options(ConnectOptions::default().with_log_output(LogOutput::Discard))
}

/// Log output that collects lines for later inspection.
pub fn collecting_output() -> (LogOutput, Arc<Mutex<Vec<LogLine>>>) {
  let lines = Arc::new(Mutex::new(Vec::new()));
  let sink_lines = lines.clone();
  (
    LogOutput::Callback(Arc::new(move |line| sink_lines.lock().push(line))),
    lines,
  )
}
