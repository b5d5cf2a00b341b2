// sluice/src/container/exec.rs

//! Defines a single queued command within a container specification.

/// One entry of a container's exec queue.
///
/// `index` is the zero-based position in the queue. Steps are realized in
/// index order and a failing step ends the queue.
#[derive(Clone, PartialEq, Eq)]
pub struct ExecStep {
  pub index: usize,
  pub args: Vec<String>,
}

impl ExecStep {
  pub fn program(&self) -> Option<&str> {
    self.args.first().map(String::as_str)
  }

  /// Space-joined command line, used in logs and error messages.
  pub fn display_command(&self) -> String {
    self.args.join(" ")
  }
}

impl std::fmt::Debug for ExecStep {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecStep")
      .field("index", &self.index)
      .field("command", &self.display_command())
      .finish()
  }
}
