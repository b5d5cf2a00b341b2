// tests/runner_tests.rs
mod common;

use common::*;
use serial_test::serial;
use sluice::engine::mock::{MockBackend, MockCall, MockEngine};
use sluice::pipeline::{ExitReport, RunState, Variant};
use sluice::{PipelineConfig, RunContext, SluiceError};

#[tokio::test]
#[serial]
async fn test_all_steps_succeed_and_report_success() {
  setup_tracing();
  let repo = ScratchDir::new("success");
  repo.write("requirements.txt", "pandas\n").write("main.py", "print('hi')\n");

  let engine = MockEngine::new(backend_checking_manifests());
  let runner = runner_on(&engine, config_for(&repo));

  let (result, trace) = runner.run_traced(&RunContext::background()).await;
  let report = ExitReport::from_result(&result);

  assert_eq!(report.code, 0);
  assert_eq!(report.message, "pipeline completed successfully");
  let synced = result.unwrap();
  assert_eq!(synced.executed.len(), 3);
  assert_eq!(synced.image, "python:3.10");
  assert_eq!(synced.synced_directories, vec![repo.path().canonicalize().unwrap()]);
  assert_eq!(engine.backend().exec_indices(), vec![0, 1, 2]);
  assert_eq!(
    trace.states(),
    &[
      RunState::Start,
      RunState::SessionOpen,
      RunState::SpecDeclared,
      RunState::Realizing,
      RunState::Done,
      RunState::SessionClosed,
      RunState::Exit,
    ]
  );
}

#[tokio::test]
#[serial]
async fn test_commands_reach_the_engine_in_declared_order() {
  setup_tracing();
  let repo = ScratchDir::new("order");
  repo.write("requirements.txt", "");

  let engine = MockEngine::new(MockBackend::new());
  runner_on(&engine, config_for(&repo))
    .run(&RunContext::background())
    .await
    .unwrap();

  let calls = engine.backend().calls();
  assert_eq!(calls[0], MockCall::Probe);
  assert_eq!(calls[1], MockCall::Pull("python:3.10".to_string()));
  match &calls[2] {
    MockCall::Start(plan) => {
      assert_eq!(plan.workdir.as_deref(), Some("/src"));
      assert_eq!(plan.mounts[0].target, "/src");
      assert_eq!(plan.mounts[0].host, repo.path().canonicalize().unwrap());
    }
    other => panic!("Expected Start, got {:?}", other),
  }
  let commands: Vec<&str> = calls
    .iter()
    .filter_map(|c| match c {
      MockCall::Exec { command, .. } => Some(command.as_str()),
      _ => None,
    })
    .collect();
  assert_eq!(
    commands,
    vec![
      "python -m pip install --upgrade pip",
      "pip install -r requirements.txt",
      "python main.py",
    ]
  );
  assert!(matches!(calls.last(), Some(MockCall::Remove(_))));
}

#[tokio::test]
#[serial]
async fn test_session_open_failure_does_no_further_work() {
  setup_tracing();
  let repo = ScratchDir::new("unreachable");
  let engine = MockEngine::new(MockBackend::new().failing_probe("Cannot connect to the Docker daemon"));

  let (result, trace) = runner_on(&engine, config_for(&repo))
    .run_traced(&RunContext::background())
    .await;

  match result {
    Err(SluiceError::EngineUnavailable { message, .. }) => assert!(message.contains("Docker daemon")),
    other => panic!("Expected EngineUnavailable, got {:?}", other),
  }
  assert_eq!(engine.connect_count(), 1);
  assert_eq!(engine.backend().calls(), vec![MockCall::Probe]);
  assert_eq!(trace.states(), &[RunState::Start, RunState::Failed, RunState::Exit]);
  assert!(!trace.visited(RunState::SpecDeclared));
}

#[tokio::test]
#[serial]
async fn test_session_released_exactly_once_on_success_and_failure() {
  setup_tracing();
  let repo = ScratchDir::new("release");
  repo.write("requirements.txt", "");

  let ok_engine = MockEngine::new(MockBackend::new());
  let ok = runner_on(&ok_engine, config_for(&repo)).run(&RunContext::background()).await;
  assert!(ok.is_ok());
  assert_eq!(ok_engine.backend().removed(), vec!["mock-0".to_string()]);

  let failing_engine = MockEngine::new(MockBackend::new().failing_step(2, 1, "Traceback (most recent call last)"));
  let (failed, trace) = runner_on(&failing_engine, config_for(&repo))
    .run_traced(&RunContext::background())
    .await;
  assert!(failed.is_err());
  assert_eq!(failing_engine.backend().removed(), vec!["mock-0".to_string()]);
  assert_eq!(
    trace.states().iter().filter(|s| **s == RunState::SessionClosed).count(),
    1
  );
}

#[tokio::test]
#[serial]
async fn test_failed_step_stops_the_queue() {
  setup_tracing();
  let repo = ScratchDir::new("stop");
  repo.write("requirements.txt", "");
  let engine = MockEngine::new(MockBackend::new().failing_step(0, 2, "pip: network unreachable"));

  let result = runner_on(&engine, config_for(&repo)).run(&RunContext::background()).await;

  match result {
    Err(SluiceError::ExecFailed {
      index,
      exit_code,
      diagnostic,
      ..
    }) => {
      assert_eq!(index, 0);
      assert_eq!(exit_code, 2);
      assert_eq!(diagnostic, "pip: network unreachable");
    }
    other => panic!("Expected ExecFailed, got {:?}", other),
  }
  assert_eq!(engine.backend().exec_indices(), vec![0]);
}

#[tokio::test]
#[serial]
async fn test_missing_notebooks_manifest_fails_before_main_runs() {
  setup_tracing();
  let repo = ScratchDir::new("notebooks");
  repo.write("requirements.txt", "pandas\n").write("main.py", "print('hi')\n");

  let engine = MockEngine::new(backend_checking_manifests());
  let config = PipelineConfig {
    host_dir: repo.path().to_path_buf(),
    ..PipelineConfig::for_variant(Variant::Notebooks)
  };

  let result = runner_on(&engine, config).run(&RunContext::background()).await;
  let report = ExitReport::from_result(&result);

  assert_ne!(report.code, 0);
  assert!(report.message.contains("pipeline failed"));
  assert!(report.message.contains("notebooks/requirements.txt"));
  assert_eq!(engine.backend().exec_indices(), vec![0, 1]);
  assert!(!engine
    .backend()
    .calls()
    .iter()
    .any(|c| matches!(c, MockCall::Exec { command, .. } if command == "python main.py")));
}

#[tokio::test]
#[serial]
async fn test_invalid_config_never_connects() {
  setup_tracing();
  let engine = MockEngine::new(MockBackend::new());
  let config = PipelineConfig {
    mount_path: "src".to_string(),
    ..PipelineConfig::default()
  };

  let result = runner_on(&engine, config).run(&RunContext::background()).await;

  assert!(matches!(result, Err(SluiceError::Configuration { .. })));
  assert_eq!(engine.connect_count(), 0);
}

#[tokio::test]
#[serial]
async fn test_missing_host_directory_fails_before_pull() {
  setup_tracing();
  let engine = MockEngine::new(MockBackend::new());
  let config = PipelineConfig {
    host_dir: "/definitely/not/a/sluice/repo".into(),
    ..PipelineConfig::default()
  };

  let result = runner_on(&engine, config).run(&RunContext::background()).await;

  assert!(matches!(result, Err(SluiceError::Io { .. })));
  assert_eq!(engine.backend().calls(), vec![MockCall::Probe]);
}

#[tokio::test]
#[serial]
async fn test_env_from_config_reaches_the_container() {
  setup_tracing();
  let repo = ScratchDir::new("env");
  repo.write("requirements.txt", "");
  let engine = MockEngine::new(MockBackend::new());
  let mut config = config_for(&repo);
  config.env.insert("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string());

  runner_on(&engine, config).run(&RunContext::background()).await.unwrap();

  let plan = engine
    .backend()
    .calls()
    .into_iter()
    .find_map(|c| match c {
      MockCall::Start(plan) => Some(plan),
      _ => None,
    })
    .unwrap();
  assert_eq!(
    plan.env,
    vec![("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string())]
  );
}
