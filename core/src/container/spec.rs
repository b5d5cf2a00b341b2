// sluice/src/container/spec.rs

//! Contains the `ContainerSpec` value and its chained transformations.
//!
//! Every `with_*` method borrows the current spec and returns a new one, so a
//! partially built spec held elsewhere never changes underneath its owner.

use super::exec::ExecStep;
use super::host::HostDirectory;
use crate::error::{SluiceError, SluiceResult};

/// A host directory mounted at an absolute path inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
  pub target: String,
  pub source: HostDirectory,
}

/// Declarative description of a container: image, mounts, working directory,
/// environment and ordered exec queue. Nothing runs until the spec is synced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
  image: Option<String>,
  mounts: Vec<Mount>,
  workdir: Option<String>,
  env: Vec<(String, String)>,
  execs: Vec<ExecStep>,
}

impl ContainerSpec {
  pub fn new() -> Self {
    Self::default()
  }

  /// Selects the base image. A later call replaces the earlier image.
  pub fn from(&self, image: impl Into<String>) -> Self {
    let mut next = self.clone();
    next.image = Some(image.into());
    next
  }

  /// Mounts `source` at `target`. Mounting onto an existing target replaces it.
  pub fn with_mounted_directory(&self, target: impl Into<String>, source: HostDirectory) -> Self {
    let target = target.into();
    let mut next = self.clone();
    next.mounts.retain(|m| m.target != target);
    next.mounts.push(Mount { target, source });
    next
  }

  pub fn with_workdir(&self, path: impl Into<String>) -> Self {
    let mut next = self.clone();
    next.workdir = Some(path.into());
    next
  }

  pub fn with_env_variable(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
    let name = name.into();
    let mut next = self.clone();
    next.env.retain(|(existing, _)| *existing != name);
    next.env.push((name, value.into()));
    next
  }

  /// Appends a command to the exec queue.
  pub fn with_exec<I, S>(&self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut next = self.clone();
    next.execs.push(ExecStep {
      index: next.execs.len(),
      args: args.into_iter().map(Into::into).collect(),
    });
    next
  }

  pub fn image(&self) -> Option<&str> {
    self.image.as_deref()
  }

  pub fn mounts(&self) -> &[Mount] {
    &self.mounts
  }

  pub fn workdir(&self) -> Option<&str> {
    self.workdir.as_deref()
  }

  pub fn env(&self) -> &[(String, String)] {
    &self.env
  }

  pub fn execs(&self) -> &[ExecStep] {
    &self.execs
  }

  /// Checks that the spec is complete enough to hand to an engine.
  pub fn validate(&self) -> SluiceResult<()> {
    match self.image.as_deref() {
      None => return Err(invalid("no base image selected")),
      Some(image) if image.trim().is_empty() => return Err(invalid("base image is empty")),
      Some(_) => {}
    }
    for mount in &self.mounts {
      if !mount.target.starts_with('/') {
        return Err(invalid(format!("mount target '{}' is not absolute", mount.target)));
      }
    }
    if let Some(workdir) = &self.workdir {
      if !workdir.starts_with('/') {
        return Err(invalid(format!("workdir '{}' is not absolute", workdir)));
      }
    }
    if let Some(step) = self.execs.iter().find(|s| s.args.is_empty()) {
      return Err(invalid(format!("exec step {} has no command", step.index)));
    }
    Ok(())
  }
}

fn invalid(message: impl Into<String>) -> SluiceError {
  SluiceError::InvalidSpec {
    message: message.into(),
  }
}
