//! Host configuration stored in `conductor.toml`, and the file-backed stages
//! that find, generate, edit, validate and load it.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use minijinja::{Environment as Templates, context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::io::environment::Environment;

pub const CONFIG_FILE_NAME: &str = "conductor.toml";

const CONFIG_SCHEMA: &str = include_str!("../../schemas/config.schema.json");
const CONFIG_TEMPLATE: &str = include_str!("templates/config.toml.jinja");

/// Resolved host configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory name of the agent workspace, relative to `workspace_path`.
    pub workspace_dir: String,
    pub workspace_path: WorkspacePath,
    #[serde(default)]
    pub run: RunConfig,
}

/// Base directory that `workspace_dir` is joined onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspacePath {
    User,
    Project,
    Xdg,
}

impl WorkspacePath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Xdg => "xdg",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Per-action wall-clock limit in seconds.
    pub action_timeout_secs: u64,
    /// Truncate action stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: ".conductor".to_string(),
            workspace_path: WorkspacePath::User,
            run: RunConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.workspace_dir.trim().is_empty() {
            return Err(anyhow!("workspace_dir must not be empty"));
        }
        if self.run.action_timeout_secs == 0 {
            return Err(anyhow!("run.action_timeout_secs must be > 0"));
        }
        if self.run.output_limit_bytes == 0 {
            return Err(anyhow!("run.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Output of the resolution chain, owned by the controller for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub path: PathBuf,
    pub config: Config,
    pub workspace_root: PathBuf,
}

/// The five configuration stages plus workspace derivation.
///
/// Each stage is replaceable on its own; the resolution chain that sequences
/// them lives in [`crate::pipeline`].
pub trait ConfigStages: Send + Sync {
    /// Look for an existing configuration. `Ok(None)` means "not found".
    fn find(&self, env: &Environment) -> Result<Option<PathBuf>>;
    /// Materialize a default configuration. `Ok(None)` means "nothing to do".
    fn generate(&self, env: &Environment) -> Result<Option<PathBuf>>;
    /// Offer interactive editing. `Ok(None)` keeps `path`.
    fn edit(&self, env: &Environment, path: &Path) -> Result<Option<PathBuf>>;
    /// Check that `path` holds a structurally valid configuration.
    fn validate(&self, env: &Environment, path: &Path) -> Result<PathBuf>;
    fn load(&self, path: &Path) -> Result<Config>;
    /// Compute the workspace root a loaded configuration points at.
    fn workspace_root(&self, env: &Environment, config: &Config) -> Result<PathBuf>;
}

/// Stages backed by `conductor.toml` on the real filesystem.
#[derive(Debug, Clone, Default)]
pub struct FileConfigStages {
    /// `$XDG_CONFIG_HOME`, when set.
    pub xdg_config_home: Option<PathBuf>,
    /// Editor command for the edit stage (`$EDITOR`, default `vi`).
    pub editor: Option<String>,
}

impl FileConfigStages {
    pub fn from_env() -> Self {
        Self {
            xdg_config_home: std::env::var_os("XDG_CONFIG_HOME")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            editor: std::env::var("EDITOR").ok().filter(|v| !v.trim().is_empty()),
        }
    }
}

impl ConfigStages for FileConfigStages {
    fn find(&self, env: &Environment) -> Result<Option<PathBuf>> {
        for dir in [&env.pwd, &env.home] {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate
                .try_exists()
                .with_context(|| format!("probe {}", candidate.display()))?
            {
                debug!(path = %candidate.display(), "configuration found");
                return Ok(Some(candidate));
            }
        }
        warn!(file = CONFIG_FILE_NAME, "configuration file not found");
        Ok(None)
    }

    fn generate(&self, env: &Environment) -> Result<Option<PathBuf>> {
        let path = env.home.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Ok(Some(path));
        }
        let rendered = render_default_config(&Config::default())?;
        write_atomic(&path, &rendered)?;
        info!(path = %path.display(), "default configuration generated");
        Ok(Some(path))
    }

    fn edit(&self, env: &Environment, path: &Path) -> Result<Option<PathBuf>> {
        if !path.exists() {
            warn!(path = %path.display(), "configuration file does not exist, skipping edit");
            return Ok(None);
        }
        if env.non_interactive {
            return Ok(None);
        }
        let stdin = std::io::stdin();
        let confirmed = confirm(
            &mut stdin.lock(),
            &mut std::io::stdout(),
            "Do you want to edit the configuration file now?",
        )?;
        if !confirmed {
            return Ok(None);
        }
        let editor = self.editor.as_deref().unwrap_or("vi");
        let status = Command::new(editor)
            .arg(path)
            .status()
            .with_context(|| format!("spawn editor {editor}"))?;
        if !status.success() {
            return Err(anyhow!("editor {editor} exited with {:?}", status.code()));
        }
        Ok(Some(path.to_path_buf()))
    }

    fn validate(&self, _env: &Environment, path: &Path) -> Result<PathBuf> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        validate_config_str(&contents).with_context(|| format!("validate {}", path.display()))?;
        debug!(path = %path.display(), "configuration validated");
        Ok(path.to_path_buf())
    }

    fn load(&self, path: &Path) -> Result<Config> {
        load_config(path)
    }

    fn workspace_root(&self, env: &Environment, config: &Config) -> Result<PathBuf> {
        let base = match config.workspace_path {
            WorkspacePath::User => env.home.clone(),
            WorkspacePath::Project => env.pwd.clone(),
            WorkspacePath::Xdg => self
                .xdg_config_home
                .clone()
                .unwrap_or_else(|| env.home.join(".config")),
        };
        derive_workspace_root(&base, &config.workspace_dir)
    }
}

/// Join `workspace_dir` onto `base`, rejecting values that escape it.
pub fn derive_workspace_root(base: &Path, workspace_dir: &str) -> Result<PathBuf> {
    let dir = Path::new(workspace_dir.trim());
    if dir.as_os_str().is_empty() {
        return Err(anyhow!("workspace_dir is empty"));
    }
    if dir
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(anyhow!(
            "workspace_dir '{workspace_dir}' must be a relative path without '..'"
        ));
    }
    let root = base.join(dir);
    if root.is_file() {
        return Err(anyhow!(
            "workspace root {} exists and is not a directory",
            root.display()
        ));
    }
    Ok(root)
}

/// Load, schema-check and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Schema conformance plus semantic checks.
pub fn validate_config_str(contents: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(contents).context("parse toml")?;
    let instance = serde_json::to_value(&raw).context("convert toml to json")?;
    validate_schema(&instance)?;
    let cfg: Config = toml::from_str(contents).context("deserialize config")?;
    cfg.validate()?;
    Ok(cfg)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(CONFIG_SCHEMA).context("parse config schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "config schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

/// Render the commented default configuration.
pub fn render_default_config(cfg: &Config) -> Result<String> {
    let mut templates = Templates::new();
    templates
        .add_template("config", CONFIG_TEMPLATE)
        .context("load config template")?;
    let rendered = templates.get_template("config")?.render(context! {
        generated_at => chrono::Utc::now().to_rfc3339(),
        workspace_dir => cfg.workspace_dir,
        workspace_path => cfg.workspace_path.as_str(),
        action_timeout_secs => cfg.run.action_timeout_secs,
        output_limit_bytes => cfg.run.output_limit_bytes,
    })?;
    Ok(rendered)
}

/// Ask a yes/no question; anything but `y`/`yes` is a no.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<bool> {
    write!(output, "\n{question}\nDo you want to continue? (y/N): ").context("write prompt")?;
    output.flush().context("flush prompt")?;
    let mut response = String::new();
    input.read_line(&mut response).context("read answer")?;
    let response = response.trim().to_lowercase();
    Ok(response == "y" || response == "yes")
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
