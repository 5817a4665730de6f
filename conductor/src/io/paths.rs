//! Well-known filesystem locations shared with the container lifecycle.

use std::path::{Path, PathBuf};

/// Root prefix override, used by tests and local development.
pub const ROOT_ENV: &str = "CONDUCTOR_ROOT";

/// All canonical system paths for a filesystem root.
///
/// Production uses `/`. Every path the orchestrator and its sibling lifecycle
/// process agree on is derived here, so a temp directory can stand in for the
/// whole filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    pub root: PathBuf,
    /// Present only inside a managed container.
    pub container_marker: PathBuf,
    /// Written by the sibling lifecycle process once teardown is safe.
    pub ready_marker: PathBuf,
    pub agent_dir: PathBuf,
    pub project_dir: PathBuf,
    pub workflow_dir: PathBuf,
    pub action_dir: PathBuf,
}

impl SystemPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let agent_dir = root.join("agent");
        Self {
            container_marker: root.join(".dockerenv"),
            ready_marker: root.join(".dockercleanup"),
            project_dir: agent_dir.join("project"),
            workflow_dir: agent_dir.join("workflow"),
            action_dir: agent_dir.join("action"),
            agent_dir,
            root,
        }
    }

    /// Paths rooted at `$CONDUCTOR_ROOT`, or `/` when unset.
    pub fn from_env() -> Self {
        match std::env::var_os(ROOT_ENV) {
            Some(root) if !root.is_empty() => Self::new(root),
            _ => Self::new("/"),
        }
    }

    /// Agent layout for the single agent baked into a container.
    pub fn container_agent(&self) -> AgentPaths {
        AgentPaths {
            project_dir: self.project_dir.clone(),
            workflow_dir: self.workflow_dir.clone(),
            action_dir: self.action_dir.clone(),
        }
    }
}

/// Directory layout for one agent execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    /// Pristine installed agent sources.
    pub project_dir: PathBuf,
    /// Per-run working copy of the project.
    pub workflow_dir: PathBuf,
    /// Action outputs and import stubs.
    pub action_dir: PathBuf,
}

impl AgentPaths {
    /// Layout for an agent installed on the host under `<workspace_root>/agents/<name>`.
    pub fn installed(workspace_root: &Path, name: &str) -> Self {
        let base = workspace_root.join("agents").join(name);
        let run_dir = workspace_root.join("runs").join(name);
        Self {
            project_dir: base,
            workflow_dir: run_dir.join("workflow"),
            action_dir: run_dir.join("action"),
        }
    }
}
