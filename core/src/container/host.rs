// sluice/src/container/host.rs

//! References to the invoking machine's filesystem.

use crate::error::{SluiceError, SluiceResult};
use std::path::{Path, PathBuf};

/// Entry point for host resources, handed out by a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Host;

impl Host {
  /// References a host directory by path. Nothing is read or copied.
  pub fn directory(&self, path: impl Into<PathBuf>) -> HostDirectory {
    HostDirectory { path: path.into() }
  }
}

/// A directory on the host, passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDirectory {
  path: PathBuf,
}

impl HostDirectory {
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Absolute, canonical form of the directory. Relative paths resolve against
  /// the current process working directory.
  pub fn resolve(&self) -> SluiceResult<PathBuf> {
    std::fs::canonicalize(&self.path)
      .map_err(|e| SluiceError::io(format!("resolving host directory '{}'", self.path.display()), e))
  }
}
