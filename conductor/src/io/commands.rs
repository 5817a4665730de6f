//! Host command surface built from the resolved configuration.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::CommandFactory;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cli::{Cli, Command};
use crate::io::archiver::Archiver;
use crate::io::config::ResolvedConfig;
use crate::io::environment::Environment;
use crate::io::paths::AgentPaths;
use crate::io::resolver::{ResolverFactory, prepare};
use crate::io::workflow::validate_agent_name;

/// An executable host command. Runs on a blocking thread.
pub trait RootCommand: Send {
    fn name(&self) -> &'static str;
    fn execute(&self, cancel: &CancellationToken) -> Result<()>;
}

pub trait CommandBuilder: Send + Sync {
    fn build(&self, env: &Environment, resolved: &ResolvedConfig) -> Result<Box<dyn RootCommand>>;
}

/// Builds commands for the subcommand parsed from the process arguments.
pub struct CliCommandBuilder {
    pub command: Option<Command>,
    pub archiver: Arc<dyn Archiver>,
    pub resolvers: Arc<dyn ResolverFactory>,
}

impl CommandBuilder for CliCommandBuilder {
    fn build(&self, env: &Environment, resolved: &ResolvedConfig) -> Result<Box<dyn RootCommand>> {
        let action = match &self.command {
            None => HostAction::Help,
            Some(Command::List) => HostAction::List,
            Some(Command::Install { package }) => HostAction::Install {
                package: package.clone(),
            },
            Some(Command::Run { agent }) => {
                validate_agent_name(agent)?;
                HostAction::Run {
                    agent: agent.clone(),
                }
            }
            Some(Command::Config) => HostAction::ShowConfig,
            Some(Command::MarkReady) => {
                bail!("mark-ready is handled before configuration is resolved")
            }
        };
        Ok(Box::new(HostCommand {
            action,
            env: env.clone(),
            resolved: resolved.clone(),
            archiver: Arc::clone(&self.archiver),
            resolvers: Arc::clone(&self.resolvers),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostAction {
    Help,
    List,
    Install { package: PathBuf },
    Run { agent: String },
    ShowConfig,
}

struct HostCommand {
    action: HostAction,
    env: Environment,
    resolved: ResolvedConfig,
    archiver: Arc<dyn Archiver>,
    resolvers: Arc<dyn ResolverFactory>,
}

impl HostCommand {
    fn agents_dir(&self) -> PathBuf {
        self.resolved.workspace_root.join("agents")
    }

    fn run_agent(&self, agent: &str, cancel: &CancellationToken) -> Result<()> {
        let paths = AgentPaths::installed(&self.resolved.workspace_root, agent);
        if !paths.project_dir.is_dir() {
            bail!(
                "agent '{agent}' is not installed under {}",
                self.agents_dir().display()
            );
        }
        let resolver =
            self.resolvers
                .create(&self.env, paths, &self.resolved.config.run, cancel.clone())?;
        prepare(resolver.as_ref())?;
        resolver.handle_run_action().into_result()?;
        info!(agent, "agent run finished");
        Ok(())
    }
}

impl RootCommand for HostCommand {
    fn name(&self) -> &'static str {
        match self.action {
            HostAction::Help => "help",
            HostAction::List => "list",
            HostAction::Install { .. } => "install",
            HostAction::Run { .. } => "run",
            HostAction::ShowConfig => "config",
        }
    }

    #[instrument(skip_all, fields(command = self.name()))]
    fn execute(&self, cancel: &CancellationToken) -> Result<()> {
        match &self.action {
            HostAction::Help => {
                Cli::command().print_help().context("print help")?;
                println!();
                Ok(())
            }
            HostAction::List => {
                for name in installed_agents(&self.agents_dir())? {
                    println!("{name}");
                }
                Ok(())
            }
            HostAction::Install { package } => {
                let installed = self.archiver.extract(cancel, &self.agents_dir(), package)?;
                println!("{}", installed.display());
                Ok(())
            }
            HostAction::Run { agent } => self.run_agent(agent, cancel),
            HostAction::ShowConfig => {
                println!("config: {}", self.resolved.path.display());
                println!("workspace: {}", self.resolved.workspace_root.display());
                Ok(())
            }
        }
    }
}

/// Sorted names of the agent directories under `agents_dir`.
pub fn installed_agents(agents_dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(agents_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", agents_dir.display())),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", agents_dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // Dot directories are installs still being staged.
        if entry.file_type().context("read entry type")?.is_dir() && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::FatalRunError;
    use crate::core::types::ContainerMode;
    use crate::io::archiver::DirectoryArchiver;
    use crate::io::config::Config;
    use crate::io::resolver::WorkflowResolverFactory;
    use crate::io::workflow::MANIFEST_FILE_NAME;

    fn fixture(root: &Path, command: Command) -> (Environment, ResolvedConfig, CliCommandBuilder) {
        let env = Environment {
            container_mode: ContainerMode::Off,
            pwd: root.to_path_buf(),
            home: root.to_path_buf(),
            non_interactive: true,
        };
        let resolved = ResolvedConfig {
            path: root.join("conductor.toml"),
            config: Config::default(),
            workspace_root: root.join("ws"),
        };
        let builder = CliCommandBuilder {
            command: Some(command),
            archiver: Arc::new(DirectoryArchiver),
            resolvers: Arc::new(WorkflowResolverFactory),
        };
        (env, resolved, builder)
    }

    fn write_package(dir: &Path, manifest: &str) {
        fs::create_dir_all(dir).expect("package dir");
        fs::write(dir.join(MANIFEST_FILE_NAME), manifest).expect("manifest");
    }

    #[test]
    fn install_then_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        let package = temp.path().join("pkg");
        write_package(&package, "name = \"echo\"\ntarget = \"a\"\n");
        let cancel = CancellationToken::new();

        let (env, resolved, builder) = fixture(temp.path(), Command::Install { package });
        builder
            .build(&env, &resolved)
            .expect("build")
            .execute(&cancel)
            .expect("install");

        let agents = resolved.workspace_root.join("agents");
        fs::create_dir_all(agents.join(".other.installing")).expect("staging dir");
        let names = installed_agents(&agents).expect("list");
        assert_eq!(names, vec!["echo".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_fatal_graph_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (env, resolved, builder) = fixture(
            temp.path(),
            Command::Run {
                agent: "echo".to_string(),
            },
        );
        write_package(
            &resolved.workspace_root.join("agents/echo"),
            "name = \"echo\"\ntarget = \"missing\"\n",
        );
        let err = builder
            .build(&env, &resolved)
            .expect("build")
            .execute(&CancellationToken::new())
            .unwrap_err();
        assert!(err.downcast_ref::<FatalRunError>().is_some(), "{err:#}");
    }

    #[test]
    fn run_requires_installed_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (env, resolved, builder) = fixture(
            temp.path(),
            Command::Run {
                agent: "ghost".to_string(),
            },
        );
        let err = builder
            .build(&env, &resolved)
            .expect("build")
            .execute(&CancellationToken::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("not installed"));
    }

    #[test]
    fn mark_ready_is_not_a_host_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (env, resolved, builder) = fixture(temp.path(), Command::MarkReady);
        assert!(builder.build(&env, &resolved).is_err());
    }
}
