//! Recording and scripted collaborators for lifecycle tests.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;

use crate::cleanup::Terminate;
use crate::core::backoff::WaitPolicy;
use crate::core::errors::Cancelled;
use crate::core::types::Stage;
use crate::io::commands::{CommandBuilder, RootCommand};
use crate::io::config::{Config, ConfigStages, ResolvedConfig, RunConfig};
use crate::io::driver::ContainerDriver;
use crate::io::environment::Environment;
use crate::io::paths::{AgentPaths, SystemPaths};
use crate::io::resolver::{GraphResolver, ResolverFactory, RunOutcome};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A temp directory standing in for `/`.
pub struct TempRoot {
    _dir: tempfile::TempDir,
    pub paths: SystemPaths,
}

impl TempRoot {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = SystemPaths::new(dir.path());
        Self { _dir: dir, paths }
    }

    /// Make environment detection report container mode.
    pub fn into_container(self) -> Self {
        fs::write(&self.paths.container_marker, "").expect("write container marker");
        self
    }

    pub fn path(&self) -> &Path {
        &self.paths.root
    }
}

impl Default for TempRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Readiness policy with millisecond polls.
pub fn fast_policy(deadline: Duration) -> WaitPolicy {
    WaitPolicy {
        initial_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(20),
        deadline,
    }
}

/// Exit hook that records codes instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingExit {
    codes: Mutex<Vec<i32>>,
}

impl RecordingExit {
    pub fn codes(&self) -> Vec<i32> {
        lock(&self.codes).clone()
    }
}

impl Terminate for RecordingExit {
    fn terminate(&self, code: i32) {
        lock(&self.codes).push(code);
    }
}

/// Container driver with a scripted bootstrap result.
#[derive(Debug, Default)]
pub struct FakeDriver {
    api_server_mode: bool,
    bootstrap_error: Option<String>,
    block_until_cancelled: bool,
    bootstraps: AtomicUsize,
    teardowns: AtomicUsize,
}

impl FakeDriver {
    pub fn serving(api_server_mode: bool) -> Self {
        Self {
            api_server_mode,
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            bootstrap_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Bootstrap that only returns once the token is cancelled.
    pub fn blocking() -> Self {
        Self {
            block_until_cancelled: true,
            ..Self::default()
        }
    }

    pub fn bootstraps(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

impl ContainerDriver for FakeDriver {
    fn bootstrap(
        &self,
        _env: &Environment,
        cancel: &CancellationToken,
        _resolver: &dyn GraphResolver,
    ) -> Result<bool> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        if self.block_until_cancelled {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            return Err(Cancelled {
                during: Stage::Bootstrap,
            }
            .into());
        }
        match &self.bootstrap_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(self.api_server_mode),
        }
    }

    fn teardown(&self, _env: &Environment) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolver whose three operations return scripted results.
///
/// Clones share one call log, so a clone handed to the controller as a
/// [`ResolverFactory`] can be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResolver {
    calls: Arc<Mutex<Vec<&'static str>>>,
    project_dir: PathBuf,
    workflow_dir_error: Option<String>,
    imports_error: Option<String>,
    run_fatal: bool,
    run_error: Option<String>,
}

impl ScriptedResolver {
    pub fn failing_workflow_dir(mut self, message: &str) -> Self {
        self.workflow_dir_error = Some(message.to_string());
        self
    }

    pub fn failing_imports(mut self, message: &str) -> Self {
        self.imports_error = Some(message.to_string());
        self
    }

    pub fn with_run(mut self, fatal: bool, error: Option<&str>) -> Self {
        self.run_fatal = fatal;
        self.run_error = error.map(str::to_string);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }
}

impl GraphResolver for ScriptedResolver {
    fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn prepare_workflow_dir(&self) -> Result<()> {
        self.record("prepare_workflow_dir");
        match &self.workflow_dir_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    fn prepare_import_files(&self) -> Result<()> {
        self.record("prepare_import_files");
        match &self.imports_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    fn handle_run_action(&self) -> RunOutcome {
        self.record("handle_run_action");
        RunOutcome {
            fatal: self.run_fatal,
            error: self.run_error.as_ref().map(|message| anyhow!("{message}")),
        }
    }
}

impl ResolverFactory for ScriptedResolver {
    fn create(
        &self,
        _env: &Environment,
        agent: AgentPaths,
        _run: &RunConfig,
        _cancel: CancellationToken,
    ) -> Result<Arc<dyn GraphResolver>> {
        let mut resolver = self.clone();
        resolver.project_dir = agent.project_dir;
        Ok(Arc::new(resolver))
    }
}

/// Configuration stages with scripted paths and an optional failing stage.
#[derive(Debug, Default)]
pub struct ScriptedStages {
    found: Option<PathBuf>,
    generated: Option<PathBuf>,
    failing: Option<&'static str>,
    blocking: Option<&'static str>,
    released: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedStages {
    /// Find succeeds immediately.
    pub fn found(path: impl Into<PathBuf>) -> Self {
        Self {
            found: Some(path.into()),
            ..Self::default()
        }
    }

    /// Find comes back empty and Generate produces `path`.
    pub fn generated(path: impl Into<PathBuf>) -> Self {
        Self {
            generated: Some(path.into()),
            ..Self::default()
        }
    }

    /// Neither Find nor Generate produce a path.
    pub fn nothing() -> Self {
        Self::default()
    }

    /// Make the stage named `stage` (its method name) return an error.
    pub fn failing(mut self, stage: &'static str) -> Self {
        self.failing = Some(stage);
        self
    }

    /// Make the stage named `stage` block until [`Self::release`] is called.
    ///
    /// Stages never see the shared token, so this stands in for a prompt or
    /// an editor session the user has not finished.
    pub fn blocking(mut self, stage: &'static str) -> Self {
        self.blocking = Some(stage);
        self
    }

    /// Unblock a stage set up with [`Self::blocking`].
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn enter(&self, stage: &'static str) -> Result<()> {
        lock(&self.calls).push(stage);
        if self.blocking == Some(stage) {
            let started = Instant::now();
            while !self.released.load(Ordering::SeqCst)
                && started.elapsed() < Duration::from_secs(10)
            {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if self.failing == Some(stage) {
            return Err(anyhow!("scripted {stage} failure"));
        }
        Ok(())
    }
}

impl ConfigStages for ScriptedStages {
    fn find(&self, _env: &Environment) -> Result<Option<PathBuf>> {
        self.enter("find")?;
        Ok(self.found.clone())
    }

    fn generate(&self, _env: &Environment) -> Result<Option<PathBuf>> {
        self.enter("generate")?;
        Ok(self.generated.clone())
    }

    fn edit(&self, _env: &Environment, _path: &Path) -> Result<Option<PathBuf>> {
        self.enter("edit")?;
        Ok(None)
    }

    fn validate(&self, _env: &Environment, path: &Path) -> Result<PathBuf> {
        self.enter("validate")?;
        Ok(path.to_path_buf())
    }

    fn load(&self, _path: &Path) -> Result<Config> {
        self.enter("load")?;
        Ok(Config::default())
    }

    fn workspace_root(&self, env: &Environment, config: &Config) -> Result<PathBuf> {
        self.enter("workspace_root")?;
        Ok(env.home.join(&config.workspace_dir))
    }
}

/// What a [`RecordingCommands`] command does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandScript {
    #[default]
    Succeed,
    Fail,
    /// Run until the token is cancelled.
    BlockUntilCancelled,
}

/// Command builder that records what it built and executed.
#[derive(Debug, Default)]
pub struct RecordingCommands {
    script: CommandScript,
    built: Mutex<Vec<ResolvedConfig>>,
    executed: Arc<AtomicUsize>,
}

impl RecordingCommands {
    pub fn scripted(script: CommandScript) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn built(&self) -> Vec<ResolvedConfig> {
        lock(&self.built).clone()
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

impl CommandBuilder for RecordingCommands {
    fn build(&self, _env: &Environment, resolved: &ResolvedConfig) -> Result<Box<dyn RootCommand>> {
        lock(&self.built).push(resolved.clone());
        Ok(Box::new(RecordedCommand {
            script: self.script,
            executed: Arc::clone(&self.executed),
        }))
    }
}

struct RecordedCommand {
    script: CommandScript,
    executed: Arc<AtomicUsize>,
}

impl RootCommand for RecordedCommand {
    fn name(&self) -> &'static str {
        "recorded"
    }

    fn execute(&self, cancel: &CancellationToken) -> Result<()> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        match self.script {
            CommandScript::Succeed => Ok(()),
            CommandScript::Fail => Err(anyhow!("scripted command failure")),
            CommandScript::BlockUntilCancelled => {
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(Cancelled {
                    during: Stage::ExecuteCommand,
                }
                .into())
            }
        }
    }
}
