//! Dependency graph resolver: the three ordered operations for one agent run.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::{Rng, distributions::Alphanumeric};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::errors::{Cancelled, FatalRunError, StageError};
use crate::core::graph::dependency_stack;
use crate::core::types::Stage;
use crate::io::config::RunConfig;
use crate::io::environment::Environment;
use crate::io::paths::AgentPaths;
use crate::io::process::run_command;
use crate::io::tree_copy::replace_tree;
use crate::io::workflow::{Action, load_manifest};

/// Output kinds that get an import directory and stub file per request.
pub const IMPORT_KINDS: [&str; 5] = ["llm", "client", "exec", "python", "data"];

/// Result of executing the action graph.
///
/// `fatal` means the process, not just this run, cannot continue. It is
/// meaningful even without an accompanying error.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub fatal: bool,
    pub error: Option<anyhow::Error>,
}

impl RunOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(error: anyhow::Error) -> Self {
        Self {
            fatal: false,
            error: Some(error),
        }
    }

    pub fn fatal(error: Option<anyhow::Error>) -> Self {
        Self { fatal: true, error }
    }

    /// Collapse into a classified error: [`FatalRunError`] when fatal,
    /// otherwise a run-action [`StageError`].
    pub fn into_result(self) -> Result<()> {
        match (self.fatal, self.error) {
            (true, source) => Err(FatalRunError { source }.into()),
            (false, Some(err)) => Err(StageError::new(Stage::RunAction, err).into()),
            (false, None) => Ok(()),
        }
    }
}

/// One agent execution attempt. Callers invoke the operations in order and
/// stop at the first failure.
pub trait GraphResolver: Send + Sync {
    /// Pristine agent sources, read by the container driver during bootstrap.
    fn project_dir(&self) -> &Path;
    fn prepare_workflow_dir(&self) -> Result<()>;
    fn prepare_import_files(&self) -> Result<()>;
    fn handle_run_action(&self) -> RunOutcome;
}

/// Run the two preparation operations in order, stopping at the first failure.
pub fn prepare(resolver: &dyn GraphResolver) -> Result<()> {
    resolver
        .prepare_workflow_dir()
        .map_err(|err| StageError::new(Stage::PrepareWorkflowDir, err))?;
    resolver
        .prepare_import_files()
        .map_err(|err| StageError::new(Stage::PrepareImports, err))?;
    Ok(())
}

/// Creates a fresh resolver per invocation; resolvers are never reused.
pub trait ResolverFactory: Send + Sync {
    fn create(
        &self,
        env: &Environment,
        agent: AgentPaths,
        run: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn GraphResolver>>;
}

/// Builds [`WorkflowResolver`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowResolverFactory;

impl ResolverFactory for WorkflowResolverFactory {
    fn create(
        &self,
        env: &Environment,
        agent: AgentPaths,
        run: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn GraphResolver>> {
        Ok(Arc::new(WorkflowResolver::new(
            env.clone(),
            agent,
            run.clone(),
            cancel,
        )))
    }
}

/// Resolver backed by an agent's `workflow.toml`.
#[derive(Debug)]
pub struct WorkflowResolver {
    env: Environment,
    paths: AgentPaths,
    run: RunConfig,
    cancel: CancellationToken,
    request_id: String,
}

impl WorkflowResolver {
    pub fn new(
        env: Environment,
        paths: AgentPaths,
        run: RunConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            env,
            paths,
            run,
            cancel,
            request_id: generate_request_id(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    fn import_stub_path(&self, kind: &str) -> PathBuf {
        self.paths
            .action_dir
            .join(kind)
            .join(format!("{}__{kind}_output.toml", self.request_id))
    }

    fn run_one(&self, action: &Action) -> Result<()> {
        let (program, args) = action
            .run
            .split_first()
            .ok_or_else(|| anyhow!("action '{}' has an empty run command", action.id))?;
        let timeout = Duration::from_secs(
            action
                .timeout_secs
                .unwrap_or(self.run.action_timeout_secs),
        );
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.paths.workflow_dir)
            .env("CONDUCTOR_REQUEST_ID", &self.request_id)
            .env("CONDUCTOR_ACTION_DIR", &self.paths.action_dir)
            .env("CONDUCTOR_CONTAINER_MODE", self.env.container_mode.as_str());

        let output = run_command(cmd, timeout, self.run.output_limit_bytes, &self.cancel)
            .with_context(|| format!("run action '{}'", action.id))?;

        let log_path = self
            .paths
            .action_dir
            .join("exec")
            .join(format!("{}__{}.log", self.request_id, action.id));
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&log_path, output.render_log(&action.id))
            .with_context(|| format!("write {}", log_path.display()))?;

        if output.cancelled {
            return Err(Cancelled {
                during: Stage::RunAction,
            })
            .with_context(|| format!("action '{}'", action.id));
        }
        if output.timed_out {
            return Err(anyhow!(
                "action '{}' timed out after {}s",
                action.id,
                timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "action '{}' exited with {:?} (log: {})",
                action.id,
                output.status.code(),
                log_path.display()
            ));
        }
        Ok(())
    }
}

impl GraphResolver for WorkflowResolver {
    fn project_dir(&self) -> &Path {
        &self.paths.project_dir
    }

    #[instrument(skip_all, fields(workflow_dir = %self.paths.workflow_dir.display()))]
    fn prepare_workflow_dir(&self) -> Result<()> {
        replace_tree(&self.paths.project_dir, &self.paths.workflow_dir).with_context(|| {
            format!(
                "copy {} into {}",
                self.paths.project_dir.display(),
                self.paths.workflow_dir.display()
            )
        })?;
        info!("workflow directory prepared");
        Ok(())
    }

    #[instrument(skip_all, fields(request_id = %self.request_id))]
    fn prepare_import_files(&self) -> Result<()> {
        for kind in IMPORT_KINDS {
            let stub = self.import_stub_path(kind);
            if let Some(dir) = stub.parent() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("create directory {}", dir.display()))?;
            }
            if stub.exists() {
                continue;
            }
            let body = format!(
                "# {kind} outputs for request {}\n[resources]\n",
                self.request_id
            );
            fs::write(&stub, body).with_context(|| format!("write {}", stub.display()))?;
        }
        info!("import files prepared");
        Ok(())
    }

    #[instrument(skip_all, fields(request_id = %self.request_id))]
    fn handle_run_action(&self) -> RunOutcome {
        // Anything wrong with the graph itself cannot be fixed by re-running.
        let manifest = match load_manifest(&self.paths.workflow_dir) {
            Ok(manifest) => manifest,
            Err(err) => return RunOutcome::fatal(Some(err)),
        };
        let stack = match dependency_stack(&manifest.nodes(), &manifest.target) {
            Ok(stack) => stack,
            Err(err) => {
                return RunOutcome::fatal(Some(
                    anyhow::Error::new(err).context(format!("agent '{}'", manifest.name)),
                ));
            }
        };
        info!(agent = %manifest.name, actions = ?stack, "running action stack");

        for id in &stack {
            let Some(action) = manifest.action(id) else {
                return RunOutcome::fatal(Some(anyhow!("action '{id}' vanished from manifest")));
            };
            if let Err(err) = self.run_one(action) {
                warn!(action = %id, err = %format!("{err:#}"), "action failed");
                return RunOutcome::failed(err);
            }
            info!(action = %id, "action finished");
        }
        RunOutcome::ok()
    }
}

fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(12)
        .collect::<String>()
        .to_lowercase()
}
