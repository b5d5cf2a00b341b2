// src/lib.rs

//! Sluice: realize a small, declarative Python container pipeline against a
//! container engine.
//!
//! A run:
//!  - opens an engine `Session` (docker or podman through `CliEngine`),
//!  - declares an immutable `ContainerSpec`: base image, mounted host
//!    directory, working directory and an ordered exec queue,
//!  - syncs the spec, waiting until every step succeeded or one failed,
//!  - releases the session on every path.
//!
//! Every engine call honors a `RunContext`, so cancellation or an expired
//! deadline fails the run instead of letting it finish.

pub mod container;
pub mod context;
pub mod engine;
pub mod error;
pub mod pipeline;

// --- Re-exports for the Public API ---

pub use crate::container::{ContainerSpec, ExecStep, Host, HostDirectory, Mount};
pub use crate::context::{DoneReason, RunContext};
pub use crate::engine::{
  Backend, CliEngine, ConnectOptions, Engine, LogOutput, RuntimeSelection, Session, SyncedContainer,
};
pub use crate::error::{SluiceError, SluiceResult};
pub use crate::pipeline::{ExitReport, PipelineConfig, PipelineRunner, RunState, Variant};

/*
    Typical use:
    1. Build a `PipelineConfig` (defaults, YAML file, or `PipelineConfig::for_variant`).
    2. Pick an engine: `CliEngine::new(config.runtime)` for a real runtime,
       `engine::mock::MockEngine` in tests.
    3. `PipelineRunner::new(Arc::new(engine), config).run(&RunContext::background()).await`.
    4. Turn the result into an exit code with `ExitReport::from_result`.
*/
