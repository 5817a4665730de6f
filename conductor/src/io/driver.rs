//! Container runtime driver: bootstrap before the graph runs, teardown after.

use std::fs;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::errors::Cancelled;
use crate::core::types::Stage;
use crate::io::environment::Environment;
use crate::io::paths::SystemPaths;
use crate::io::process::run_command;
use crate::io::resolver::GraphResolver;
use crate::io::tree_copy::{remove_tree, replace_tree};
use crate::io::workflow::load_manifest;

pub trait ContainerDriver: Send + Sync {
    /// Prepare the container environment for `resolver`'s agent.
    ///
    /// Returns whether this run should stay alive as a long-running server.
    fn bootstrap(
        &self,
        env: &Environment,
        cancel: &CancellationToken,
        resolver: &dyn GraphResolver,
    ) -> Result<bool>;

    /// Best-effort teardown. Failures are logged, never returned.
    fn teardown(&self, env: &Environment);
}

/// Driver for the single agent baked into a container image.
#[derive(Debug, Clone)]
pub struct AgentContainerDriver {
    pub paths: SystemPaths,
    pub model_pull_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl AgentContainerDriver {
    pub fn new(paths: SystemPaths) -> Self {
        Self {
            paths,
            model_pull_timeout: Duration::from_secs(30 * 60),
            output_limit_bytes: 100_000,
        }
    }
}

impl ContainerDriver for AgentContainerDriver {
    #[instrument(skip_all, fields(container_mode = %env.container_mode))]
    fn bootstrap(
        &self,
        env: &Environment,
        cancel: &CancellationToken,
        resolver: &dyn GraphResolver,
    ) -> Result<bool> {
        if !env.container_mode.is_on() {
            return Ok(false);
        }
        let manifest = load_manifest(resolver.project_dir())?;
        let settings = &manifest.settings;

        for model in settings.models.iter().filter(|m| !m.trim().is_empty()) {
            if cancel.is_cancelled() {
                return Err(Cancelled {
                    during: Stage::Bootstrap,
                }
                .into());
            }
            let Some((program, args)) = settings.model_pull_command.split_first() else {
                warn!(model = %model, "no model_pull_command configured, skipping pull");
                continue;
            };
            let mut cmd = Command::new(program);
            cmd.args(args).arg(model);
            let output = run_command(cmd, self.model_pull_timeout, self.output_limit_bytes, cancel)
                .with_context(|| format!("pull model {model}"))?;
            if output.success() {
                info!(model = %model, "model pulled");
            } else {
                warn!(
                    model = %model,
                    exit_code = ?output.status.code(),
                    timed_out = output.timed_out,
                    "model pull failed, continuing"
                );
            }
        }

        let api_dir = self.paths.action_dir.join("api");
        fs::create_dir_all(&api_dir)
            .with_context(|| format!("create directory {}", api_dir.display()))?;
        info!(
            agent = %manifest.name,
            api_server_mode = settings.api_server_mode,
            "container bootstrapped"
        );
        Ok(settings.api_server_mode)
    }

    #[instrument(skip_all)]
    fn teardown(&self, env: &Environment) {
        if !env.container_mode.is_on() {
            return;
        }
        for dir in [&self.paths.action_dir, &self.paths.workflow_dir] {
            if let Err(err) = remove_tree(dir) {
                warn!(dir = %dir.display(), err = %format!("{err:#}"), "teardown: remove failed");
            }
        }
        if let Err(err) = replace_tree(&self.paths.project_dir, &self.paths.workflow_dir) {
            warn!(err = %format!("{err:#}"), "teardown: restore workflow directory failed");
        }
        info!("container teardown finished");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::types::ContainerMode;
    use crate::io::config::RunConfig;
    use crate::io::resolver::WorkflowResolver;
    use crate::io::workflow::MANIFEST_FILE_NAME;

    fn container_env(paths: &SystemPaths, mode: ContainerMode) -> Environment {
        Environment {
            container_mode: mode,
            pwd: paths.root.clone(),
            home: paths.root.clone(),
            non_interactive: true,
        }
    }

    fn setup(manifest: &str) -> (tempfile::TempDir, SystemPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SystemPaths::new(temp.path());
        fs::create_dir_all(&paths.project_dir).expect("project");
        fs::write(paths.project_dir.join(MANIFEST_FILE_NAME), manifest).expect("manifest");
        (temp, paths)
    }

    #[test]
    fn bootstrap_reports_api_server_mode_and_pulls_models() {
        let (_temp, paths) = setup(
            r#"
name = "echo"
target = "a"
[settings]
api_server_mode = true
models = ["tiny", ""]
model_pull_command = ["sh", "-c", "exit 0", "pull"]
"#,
        );
        let env = container_env(&paths, ContainerMode::On);
        let cancel = CancellationToken::new();
        let resolver = WorkflowResolver::new(
            env.clone(),
            paths.container_agent(),
            RunConfig::default(),
            cancel.clone(),
        );
        let driver = AgentContainerDriver::new(paths.clone());
        assert!(driver.bootstrap(&env, &cancel, &resolver).expect("bootstrap"));
        assert!(paths.action_dir.join("api").is_dir());
    }

    #[test]
    fn missing_pull_binary_fails_bootstrap() {
        let (_temp, paths) = setup(
            r#"
name = "echo"
target = "a"
[settings]
models = ["tiny"]
model_pull_command = ["definitely-not-a-real-binary-xyz"]
"#,
        );
        let env = container_env(&paths, ContainerMode::On);
        let cancel = CancellationToken::new();
        let resolver = WorkflowResolver::new(
            env.clone(),
            paths.container_agent(),
            RunConfig::default(),
            cancel.clone(),
        );
        let driver = AgentContainerDriver::new(paths);
        assert!(driver.bootstrap(&env, &cancel, &resolver).is_err());
    }

    #[test]
    fn cancelled_bootstrap_pulls_nothing() {
        let (_temp, paths) = setup(
            r#"
name = "echo"
target = "a"
[settings]
models = ["tiny", "small"]
model_pull_command = ["definitely-not-a-real-binary-xyz"]
"#,
        );
        let env = container_env(&paths, ContainerMode::On);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let resolver = WorkflowResolver::new(
            env.clone(),
            paths.container_agent(),
            RunConfig::default(),
            cancel.clone(),
        );
        let driver = AgentContainerDriver::new(paths.clone());

        let err = driver.bootstrap(&env, &cancel, &resolver).unwrap_err();
        assert!(crate::core::errors::is_cancelled(&err), "{err:#}");
        assert!(!paths.action_dir.join("api").exists());
    }

    #[test]
    fn teardown_restores_workflow_from_project() {
        let (_temp, paths) = setup("name = \"echo\"\ntarget = \"a\"\n");
        fs::create_dir_all(&paths.workflow_dir).expect("workflow");
        fs::write(paths.workflow_dir.join("scratch.txt"), "x").expect("scratch");
        fs::create_dir_all(paths.action_dir.join("exec")).expect("action");

        let driver = AgentContainerDriver::new(paths.clone());
        driver.teardown(&container_env(&paths, ContainerMode::On));

        assert!(!paths.action_dir.exists());
        assert!(!paths.workflow_dir.join("scratch.txt").exists());
        assert!(paths.workflow_dir.join(MANIFEST_FILE_NAME).exists());
    }

    #[test]
    fn host_mode_skips_container_work() {
        let (_temp, paths) = setup("name = \"echo\"\ntarget = \"a\"\n");
        fs::create_dir_all(&paths.action_dir).expect("action");
        let driver = AgentContainerDriver::new(paths.clone());
        driver.teardown(&container_env(&paths, ContainerMode::Off));
        assert!(paths.action_dir.exists());
    }
}
