// sluice-cli/src/cli.rs

use clap::Parser;
use sluice::{PipelineConfig, RuntimeSelection, Variant};
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "sluice")]
#[command(about = "Run the Python container pipeline against docker or podman")]
#[command(version)]
pub struct Cli {
  /// YAML pipeline file; flags and environment override its values
  #[arg(short, long, env = "SLUICE_CONFIG")]
  pub config: Option<PathBuf>,

  /// Preset manifest layout: root or notebooks
  #[arg(long, env = "SLUICE_VARIANT", value_parser = parse_variant)]
  pub variant: Option<Variant>,

  /// Base image tag
  #[arg(long, env = "SLUICE_IMAGE")]
  pub image: Option<String>,

  /// Host directory to mount
  #[arg(long, env = "SLUICE_HOST_DIR")]
  pub host_dir: Option<PathBuf>,

  /// Mount point and working directory inside the container
  #[arg(long, env = "SLUICE_MOUNT_PATH")]
  pub mount_path: Option<String>,

  /// Dependency manifest, relative to the mount point
  #[arg(short, long, env = "SLUICE_MANIFEST")]
  pub manifest: Option<String>,

  /// Script to run, relative to the mount point
  #[arg(short, long, env = "SLUICE_ENTRY_SCRIPT")]
  pub entry_script: Option<String>,

  /// Container runtime: auto, docker or podman
  #[arg(long, env = "SLUICE_RUNTIME", value_parser = parse_runtime)]
  pub runtime: Option<RuntimeSelection>,

  /// Skip upgrading pip before installing dependencies
  #[arg(long)]
  pub no_pip_upgrade: bool,

  /// Extra environment for the container, as NAME=VALUE (repeatable)
  #[arg(long = "env", value_parser = parse_env_pair)]
  pub env: Vec<(String, String)>,

  /// Abort the run after this many seconds
  #[arg(long, env = "SLUICE_TIMEOUT_SECS")]
  pub timeout_secs: Option<u64>,
}

impl Cli {
  /// Layers file, variant and explicit options over the defaults.
  pub fn resolve_config(&self) -> anyhow::Result<PipelineConfig> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::load(path)?,
      None => PipelineConfig::default(),
    };
    if let Some(variant) = self.variant {
      config.apply_variant(variant);
    }
    if let Some(image) = &self.image {
      config.image = image.clone();
    }
    if let Some(host_dir) = &self.host_dir {
      config.host_dir = host_dir.clone();
    }
    if let Some(mount_path) = &self.mount_path {
      config.mount_path = mount_path.clone();
    }
    if let Some(manifest) = &self.manifest {
      config.manifest = manifest.clone();
    }
    if let Some(entry_script) = &self.entry_script {
      config.entry_script = entry_script.clone();
    }
    if let Some(runtime) = self.runtime {
      config.runtime = runtime;
    }
    if self.no_pip_upgrade {
      config.upgrade_pip = false;
    }
    for (name, value) in &self.env {
      config.env.insert(name.clone(), value.clone());
    }
    if let Some(timeout_secs) = self.timeout_secs {
      config.timeout_secs = Some(timeout_secs);
    }
    config.validate()?;
    Ok(config)
  }
}

fn parse_variant(s: &str) -> Result<Variant, String> {
  s.parse().map_err(|e: sluice::SluiceError| e.to_string())
}

fn parse_runtime(s: &str) -> Result<RuntimeSelection, String> {
  s.parse().map_err(|e: sluice::SluiceError| e.to_string())
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
    _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
  }
}
