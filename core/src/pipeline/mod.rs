// sluice/src/pipeline/mod.rs

//! The pipeline runner, its configuration and its run states.

pub mod config;
pub mod runner;
pub mod state;

pub use config::{PipelineConfig, Variant};
pub use runner::{declare_spec, ExitReport, PipelineRunner, FAILURE_MESSAGE, SUCCESS_MESSAGE};
pub use state::{RunState, RunTrace};
