// sluice-cli/src/main.rs

mod cli;
mod interrupt;

use clap::Parser;
use sluice::pipeline::ExitReport;
use sluice::{CliEngine, ConnectOptions, LogOutput, PipelineRunner, RunContext};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
  tracing_subscriber::registry()
    .with(
      fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    )
    .init();

  let args = Cli::parse();
  let config = match args.resolve_config() {
    Ok(config) => config,
    Err(e) => {
      error!("invalid configuration: {:#}", e);
      std::process::exit(2);
    }
  };

  let mut ctx = RunContext::background();
  if let Some(timeout) = config.timeout() {
    ctx = ctx.with_timeout(timeout);
  }

  let on_signal = ctx.clone();
  tokio::spawn(async move {
    if interrupt::watch(on_signal, tokio::signal::ctrl_c).await {
      std::process::exit(interrupt::FORCED_EXIT_CODE);
    }
  });

  let engine = CliEngine::new(config.runtime);
  let runner = PipelineRunner::new(Arc::new(engine), config)
    .with_connect_options(ConnectOptions::default().with_log_output(LogOutput::Tracing));

  let result = runner.run(&ctx).await;
  let report = ExitReport::from_result(&result);
  if report.is_success() {
    info!("{}", report.message);
  } else {
    error!("{}", report.message);
  }
  std::process::exit(report.code);
}
