//! End-to-end controller scenarios for both branches.
//!
//! Every collaborator is a recording double, so these tests observe the
//! decisions the controller makes (which stages ran, whether cleanup ran, the
//! exit codes it requested) without leaving the test process.

use std::fs;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conductor::controller::{Collaborators, Controller};
use conductor::exit_codes;
use conductor::io::environment::NON_INTERACTIVE_ENV;
use conductor::io::marker::write_marker;
use conductor::test_support::{
    CommandScript, FakeDriver, RecordingCommands, RecordingExit, ScriptedResolver,
    ScriptedStages, TempRoot, fast_policy,
};

struct Harness {
    root: TempRoot,
    exit: Arc<RecordingExit>,
    driver: Arc<FakeDriver>,
    resolver: ScriptedResolver,
    stages: Arc<ScriptedStages>,
    commands: Arc<RecordingCommands>,
    deadline: Duration,
}

impl Harness {
    fn host(stages: ScriptedStages, commands: RecordingCommands) -> Self {
        Self {
            root: TempRoot::new(),
            exit: Arc::new(RecordingExit::default()),
            driver: Arc::new(FakeDriver::serving(false)),
            resolver: ScriptedResolver::default(),
            stages: Arc::new(stages),
            commands: Arc::new(commands),
            deadline: Duration::from_secs(1),
        }
    }

    fn container(driver: FakeDriver, resolver: ScriptedResolver) -> Self {
        Self {
            root: TempRoot::new().into_container(),
            driver: Arc::new(driver),
            resolver,
            ..Self::host(ScriptedStages::nothing(), RecordingCommands::default())
        }
    }

    fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn mark_ready(&self) {
        write_marker(&self.root.paths.ready_marker).expect("write readiness marker");
    }

    fn controller(&self) -> Controller {
        Controller::new(
            self.root.paths.clone(),
            fast_policy(self.deadline),
            Collaborators {
                config_stages: self.stages.clone(),
                driver: self.driver.clone(),
                resolvers: Arc::new(self.resolver.clone()),
                commands: self.commands.clone(),
                terminate: self.exit.clone(),
            },
        )
    }

    async fn run(&self) -> i32 {
        self.run_with_signal(std::future::pending()).await
    }

    async fn run_with_signal<S>(&self, signal: S) -> i32
    where
        S: Future<Output = ()> + Send + 'static,
    {
        tokio::time::timeout(Duration::from_secs(10), self.controller().run(signal))
            .await
            .expect("controller finished")
    }
}

/// A signal future that fires after `delay`.
fn signal_after(delay: Duration) -> impl Future<Output = ()> + Send + 'static {
    tokio::time::sleep(delay)
}

#[tokio::test]
async fn host_branch_executes_command_and_exits_cleanly() {
    let harness = Harness::host(
        ScriptedStages::found("config.yaml"),
        RecordingCommands::default(),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::OK);
    assert_eq!(harness.commands.executed(), 1);
    let built = harness.commands.built();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].path.to_str(), Some("config.yaml"));
    assert!(harness.exit.codes().iter().all(|code| *code == exit_codes::OK));
    assert_eq!(harness.driver.bootstraps(), 0);
}

#[tokio::test]
async fn host_config_failure_exits_non_zero_without_command() {
    let harness = Harness::host(
        ScriptedStages::found("config.toml").failing("validate"),
        RecordingCommands::default(),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
    assert!(harness.commands.built().is_empty());
    assert_eq!(harness.driver.teardowns(), 1);
}

#[tokio::test]
async fn host_command_failure_exits_non_zero() {
    let harness = Harness::host(
        ScriptedStages::found("config.toml"),
        RecordingCommands::scripted(CommandScript::Fail),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
}

#[tokio::test]
async fn bootstrap_failure_skips_graph_and_exits_non_zero() {
    let harness = Harness::container(
        FakeDriver::failing("runtime unavailable"),
        ScriptedResolver::default(),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
    assert!(harness.resolver.calls().is_empty());
}

#[tokio::test]
async fn preparation_failure_never_runs_actions() {
    let harness = Harness::container(
        FakeDriver::serving(false),
        ScriptedResolver::default().failing_workflow_dir("read-only filesystem"),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.resolver.calls(), vec!["prepare_workflow_dir"]);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
}

#[tokio::test]
async fn import_failure_never_runs_actions() {
    let harness = Harness::container(
        FakeDriver::serving(false),
        ScriptedResolver::default().failing_imports("no space left"),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert!(!harness.resolver.calls().contains(&"handle_run_action"));
}

#[tokio::test]
async fn fatal_run_without_error_still_terminates() {
    let harness = Harness::container(
        FakeDriver::serving(false),
        ScriptedResolver::default().with_run(true, None),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FATAL_RUN);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FATAL_RUN]);
}

#[tokio::test]
async fn fatal_run_with_error_terminates_even_in_server_mode() {
    let harness = Harness::container(
        FakeDriver::serving(true),
        ScriptedResolver::default().with_run(true, Some("cycle in graph")),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FATAL_RUN);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FATAL_RUN]);
}

#[tokio::test]
async fn non_fatal_run_error_waits_for_readiness_then_fails() {
    let harness = Harness::container(
        FakeDriver::serving(false),
        ScriptedResolver::default().with_run(false, Some("action exited 1")),
    );
    harness.mark_ready();

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
    assert!(!harness.root.paths.ready_marker.exists());
}

#[tokio::test]
async fn container_success_consumes_marker_and_exits_zero() {
    let harness = Harness::container(FakeDriver::serving(false), ScriptedResolver::default());
    harness.mark_ready();

    let code = harness.run().await;

    assert_eq!(code, exit_codes::OK);
    assert_eq!(harness.exit.codes(), vec![exit_codes::OK]);
    assert_eq!(harness.driver.teardowns(), 1);
    assert!(!harness.root.paths.ready_marker.exists());
    assert_eq!(
        harness.resolver.calls(),
        vec!["prepare_workflow_dir", "prepare_import_files", "handle_run_action"]
    );
}

#[tokio::test]
async fn readiness_timeout_is_a_failure() {
    let harness = Harness::container(FakeDriver::serving(false), ScriptedResolver::default())
        .with_deadline(Duration::from_millis(50));

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
}

#[tokio::test]
async fn signal_during_readiness_wait_cleans_up_once_and_returns_promptly() {
    let harness = Harness::container(FakeDriver::serving(false), ScriptedResolver::default())
        .with_deadline(Duration::from_secs(30));

    let started = Instant::now();
    let code = harness
        .run_with_signal(signal_after(Duration::from_millis(50)))
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(code, exit_codes::OK);
    assert_eq!(harness.exit.codes(), vec![exit_codes::OK]);
    assert_eq!(harness.driver.teardowns(), 1);
}

#[tokio::test]
async fn server_mode_stays_up_until_signal_and_never_self_exits() {
    let harness = Harness::container(FakeDriver::serving(true), ScriptedResolver::default());
    harness.mark_ready();

    let started = Instant::now();
    let code = harness
        .run_with_signal(signal_after(Duration::from_millis(100)))
        .await;

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(code, exit_codes::OK);
    assert!(harness.exit.codes().is_empty());
    assert_eq!(harness.driver.teardowns(), 1);
}

#[tokio::test]
async fn signal_during_host_command_cancels_it() {
    let harness = Harness::host(
        ScriptedStages::found("config.toml"),
        RecordingCommands::scripted(CommandScript::BlockUntilCancelled),
    );

    let code = harness
        .run_with_signal(signal_after(Duration::from_millis(50)))
        .await;

    assert_eq!(code, exit_codes::OK);
    assert_eq!(harness.exit.codes(), vec![exit_codes::OK]);
}

#[tokio::test]
async fn stale_marker_from_previous_run_is_removed_by_cleanup() {
    let harness = Harness::host(
        ScriptedStages::found("config.toml"),
        RecordingCommands::default(),
    );
    fs::write(&harness.root.paths.ready_marker, "stale").expect("stale marker");

    harness.run().await;

    assert!(!harness.root.paths.ready_marker.exists());
}

#[tokio::test]
async fn signal_during_configuration_returns_without_waiting_for_the_stage() {
    let harness = Harness::host(
        ScriptedStages::found("config.toml").blocking("find"),
        RecordingCommands::default(),
    );

    let started = Instant::now();
    let code = harness
        .run_with_signal(signal_after(Duration::from_millis(50)))
        .await;
    let elapsed = started.elapsed();
    harness.stages.release();

    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    assert_eq!(code, exit_codes::OK);
    assert_eq!(harness.exit.codes(), vec![exit_codes::OK]);
    assert!(harness.commands.built().is_empty());
    assert_eq!(harness.driver.teardowns(), 1);
}

#[tokio::test]
async fn generate_failure_exits_non_zero_without_command() {
    let harness = Harness::host(
        ScriptedStages::nothing().failing("generate"),
        RecordingCommands::default(),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
    assert_eq!(harness.stages.calls(), vec!["find", "generate"]);
    assert!(harness.commands.built().is_empty());
}

#[tokio::test]
async fn edit_failure_exits_non_zero_without_command() {
    // Edit only runs in an interactive session.
    if std::env::var_os(NON_INTERACTIVE_ENV).is_some() {
        return;
    }
    let harness = Harness::host(
        ScriptedStages::generated("conductor.toml").failing("edit"),
        RecordingCommands::default(),
    );

    let code = harness.run().await;

    assert_eq!(code, exit_codes::FAILURE);
    assert_eq!(harness.exit.codes(), vec![exit_codes::FAILURE]);
    assert_eq!(harness.stages.calls(), vec!["find", "generate", "edit"]);
    assert!(harness.commands.built().is_empty());
}

#[tokio::test]
async fn signal_during_bootstrap_cleans_up_and_exits_zero() {
    let harness = Harness::container(FakeDriver::blocking(), ScriptedResolver::default());

    let code = harness
        .run_with_signal(signal_after(Duration::from_millis(50)))
        .await;

    assert_eq!(code, exit_codes::OK);
    assert_eq!(harness.exit.codes(), vec![exit_codes::OK]);
    assert_eq!(harness.driver.bootstraps(), 1);
    assert_eq!(harness.driver.teardowns(), 1);
    assert!(harness.resolver.calls().is_empty());
}
