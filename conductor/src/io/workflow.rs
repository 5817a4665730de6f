//! `workflow.toml`: the agent manifest read by the resolver, driver and archiver.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::graph::ActionNode;

pub const MANIFEST_FILE_NAME: &str = "workflow.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub name: String,
    /// Action whose dependency stack a run executes.
    pub target: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Keep the container alive as a long-running server after the run.
    pub api_server_mode: bool,
    pub models: Vec<String>,
    /// Argv prefix; the model name is appended.
    pub model_pull_command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Action {
    pub id: String,
    #[serde(default)]
    pub requires: Vec<String>,
    pub run: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Manifest {
    pub fn validate(&self) -> Result<()> {
        validate_agent_name(&self.name)?;
        if self.target.trim().is_empty() {
            return Err(anyhow!("target must not be empty"));
        }
        for action in &self.actions {
            if action.id.trim().is_empty() {
                return Err(anyhow!("action id must not be empty"));
            }
            if action.run.first().is_none_or(|prog| prog.trim().is_empty()) {
                return Err(anyhow!("action '{}' has an empty run command", action.id));
            }
            if action.timeout_secs == Some(0) {
                return Err(anyhow!("action '{}' timeout_secs must be > 0", action.id));
            }
        }
        Ok(())
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Graph view consumed by [`crate::core::graph::dependency_stack`].
    pub fn nodes(&self) -> Vec<ActionNode> {
        self.actions
            .iter()
            .map(|a| ActionNode {
                id: a.id.clone(),
                requires: a.requires.clone(),
            })
            .collect()
    }
}

/// Read and validate `<dir>/workflow.toml`.
pub fn load_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE_NAME);
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let manifest: Manifest =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    manifest
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(manifest)
}

static AGENT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").unwrap());

/// Agent names double as directory names under the workspace.
pub fn validate_agent_name(name: &str) -> Result<()> {
    if !AGENT_NAME_RE.is_match(name) {
        return Err(anyhow!(
            "invalid agent name '{name}': expected lowercase letters, digits, '.', '_' or '-'"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name = "echo-agent"
target = "respond"

[settings]
api_server_mode = true
models = ["llama3"]
model_pull_command = ["ollama", "pull"]

[[actions]]
id = "fetch"
run = ["sh", "-c", "echo fetch"]

[[actions]]
id = "respond"
requires = ["fetch"]
run = ["sh", "-c", "echo done"]
timeout_secs = 60
"#;

    #[test]
    fn parses_manifest_with_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(MANIFEST_FILE_NAME), MANIFEST).expect("write");
        let manifest = load_manifest(temp.path()).expect("load");
        assert!(manifest.settings.api_server_mode);
        assert_eq!(manifest.action("respond").and_then(|a| a.timeout_secs), Some(60));
        assert_eq!(manifest.nodes()[1].requires, vec!["fetch".to_string()]);
    }

    #[test]
    fn rejects_bad_names_and_empty_commands() {
        assert!(validate_agent_name("Echo").is_err());
        assert!(validate_agent_name("../evil").is_err());
        assert!(validate_agent_name("echo-agent.v2").is_ok());

        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join(MANIFEST_FILE_NAME),
            "name = \"a\"\ntarget = \"x\"\n[[actions]]\nid = \"x\"\nrun = []\n",
        )
        .expect("write");
        let err = load_manifest(temp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("empty run command"));
    }
}
