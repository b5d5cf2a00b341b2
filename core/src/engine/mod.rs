// sluice/src/engine/mod.rs

//! Engine sessions and the backends that realize container specifications.
//!
//! An `Engine` opens a `Session`; the session drives a type-erased `Backend`
//! and owns every container it starts until `Session::close`.

pub mod backend;
pub mod cli;
pub mod log;
pub mod mock;
pub mod session;

pub use backend::{Backend, ContainerHandle, ExecOutcome, ResolvedMount, StartPlan};
pub use cli::{CliEngine, ContainerCli, RuntimeKind, RuntimeSelection};
pub use log::{LogLine, LogOutput, LogSink, LogStream};
pub use session::{Session, SyncedContainer};

use crate::context::RunContext;
use crate::error::SluiceResult;
use async_trait::async_trait;

/// Options applied when a session is opened.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
  /// Where exec output is forwarded.
  pub log_output: LogOutput,
}

impl ConnectOptions {
  pub fn with_log_output(mut self, log_output: LogOutput) -> Self {
    self.log_output = log_output;
    self
  }
}

/// Something a pipeline can open a session against.
#[async_trait]
pub trait Engine: Send + Sync {
  /// Opens a session. Fails without side effects when the engine is unreachable.
  async fn connect(&self, ctx: &RunContext, options: ConnectOptions) -> SluiceResult<Session>;
}
