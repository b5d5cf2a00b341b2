// sluice/src/pipeline/config.rs

//! Pipeline configuration: what image to use, what to mount, which manifest to
//! install and which script to run.
//!
//! Defaults reproduce the root-level pipeline. The notebooks pipeline differs
//! only in its manifest path and is selected with `Variant::Notebooks`.

use crate::engine::RuntimeSelection;
use crate::error::{SluiceError, SluiceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "python:3.10";
pub const DEFAULT_HOST_DIR: &str = ".";
pub const DEFAULT_MOUNT_PATH: &str = "/src";
pub const DEFAULT_MANIFEST: &str = "requirements.txt";
pub const NOTEBOOKS_MANIFEST: &str = "notebooks/requirements.txt";
pub const DEFAULT_ENTRY_SCRIPT: &str = "main.py";

/// The two known pipeline layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
  /// Dependency manifest at the repository root.
  Root,
  /// Dependency manifest under `notebooks/`.
  Notebooks,
}

impl Variant {
  pub fn manifest(&self) -> &'static str {
    match self {
      Variant::Root => DEFAULT_MANIFEST,
      Variant::Notebooks => NOTEBOOKS_MANIFEST,
    }
  }
}

impl std::str::FromStr for Variant {
  type Err = SluiceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "root" => Ok(Variant::Root),
      "notebooks" => Ok(Variant::Notebooks),
      other => Err(config_error(format!(
        "unknown variant '{}' (expected root or notebooks)",
        other
      ))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  /// Base image tag.
  pub image: String,
  /// Host directory mounted into the container.
  pub host_dir: PathBuf,
  /// Absolute mount point inside the container; also the working directory.
  pub mount_path: String,
  /// Dependency manifest, relative to the mount point.
  pub manifest: String,
  /// Script run last, relative to the mount point.
  pub entry_script: String,
  /// Run `python -m pip install --upgrade pip` before installing dependencies.
  pub upgrade_pip: bool,
  pub runtime: RuntimeSelection,
  /// Extra environment for every exec step.
  pub env: BTreeMap<String, String>,
  /// Overall deadline for the run, in seconds.
  pub timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      image: DEFAULT_IMAGE.to_string(),
      host_dir: PathBuf::from(DEFAULT_HOST_DIR),
      mount_path: DEFAULT_MOUNT_PATH.to_string(),
      manifest: DEFAULT_MANIFEST.to_string(),
      entry_script: DEFAULT_ENTRY_SCRIPT.to_string(),
      upgrade_pip: true,
      runtime: RuntimeSelection::Auto,
      env: BTreeMap::new(),
      timeout_secs: None,
    }
  }
}

impl PipelineConfig {
  pub fn for_variant(variant: Variant) -> Self {
    let mut config = Self::default();
    config.apply_variant(variant);
    config
  }

  pub fn apply_variant(&mut self, variant: Variant) {
    self.manifest = variant.manifest().to_string();
  }

  pub fn from_yaml_str(text: &str) -> SluiceResult<Self> {
    serde_yaml::from_str(text).map_err(|e| config_error(format!("invalid pipeline file: {}", e)))
  }

  pub fn load(path: &Path) -> SluiceResult<Self> {
    let text = std::fs::read_to_string(path)
      .map_err(|e| SluiceError::io(format!("reading pipeline file '{}'", path.display()), e))?;
    Self::from_yaml_str(&text)
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }

  pub fn validate(&self) -> SluiceResult<()> {
    if self.image.trim().is_empty() {
      return Err(config_error("image must not be empty"));
    }
    if !self.mount_path.starts_with('/') {
      return Err(config_error(format!(
        "mount_path '{}' must be an absolute container path",
        self.mount_path
      )));
    }
    if self.host_dir.as_os_str().is_empty() {
      return Err(config_error("host_dir must not be empty"));
    }
    check_relative("manifest", &self.manifest)?;
    check_relative("entry_script", &self.entry_script)?;
    if self.timeout_secs == Some(0) {
      return Err(config_error("timeout_secs must be greater than zero"));
    }
    if let Some(name) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
      return Err(config_error(format!("invalid environment variable name '{}'", name)));
    }
    Ok(())
  }

  /// Exec queue in run order.
  pub fn commands(&self) -> Vec<Vec<String>> {
    let mut commands = Vec::with_capacity(3);
    if self.upgrade_pip {
      commands.push(argv(&["python", "-m", "pip", "install", "--upgrade", "pip"]));
    }
    commands.push(argv(&["pip", "install", "-r", &self.manifest]));
    commands.push(argv(&["python", &self.entry_script]));
    commands
  }
}

fn check_relative(field: &str, value: &str) -> SluiceResult<()> {
  if value.trim().is_empty() {
    return Err(config_error(format!("{} must not be empty", field)));
  }
  if value.starts_with('/') {
    return Err(config_error(format!(
      "{} '{}' must be relative to the mount path",
      field, value
    )));
  }
  Ok(())
}

fn argv(parts: &[&str]) -> Vec<String> {
  parts.iter().map(|p| p.to_string()).collect()
}

fn config_error(message: impl Into<String>) -> SluiceError {
  SluiceError::Configuration {
    message: message.into(),
  }
}
