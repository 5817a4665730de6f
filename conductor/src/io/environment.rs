//! Host/container detection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::ContainerMode;
use crate::io::paths::SystemPaths;

pub const NON_INTERACTIVE_ENV: &str = "CONDUCTOR_NON_INTERACTIVE";

/// Immutable snapshot of where and how the process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub container_mode: ContainerMode,
    pub pwd: PathBuf,
    pub home: PathBuf,
    /// Skip interactive prompts (CI, containers, scripted installs).
    pub non_interactive: bool,
}

impl Environment {
    /// Probe the real process environment.
    pub fn detect(paths: &SystemPaths) -> Result<Self> {
        let pwd = std::env::current_dir().context("read current directory")?;
        detect_with(paths, pwd, |key| std::env::var(key).ok())
    }

    pub fn interactive(&self) -> bool {
        !self.non_interactive
    }
}

/// Build an [`Environment`] from explicit inputs.
///
/// The container marker is probed fresh on every call. Absence is a normal
/// negative result; any other I/O error is returned.
pub fn detect_with<F>(paths: &SystemPaths, pwd: PathBuf, var: F) -> Result<Environment>
where
    F: Fn(&str) -> Option<String>,
{
    let present = paths
        .container_marker
        .try_exists()
        .with_context(|| format!("probe {}", paths.container_marker.display()))?;
    let container_mode = ContainerMode::from_marker(present);

    // Without HOME the working directory doubles as home.
    let home = var("HOME")
        .filter(|h| !h.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| pwd.clone());
    let non_interactive = var(NON_INTERACTIVE_ENV)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    debug!(container_mode = %container_mode, non_interactive, "environment detected");
    Ok(Environment {
        container_mode,
        pwd,
        home,
        non_interactive,
    })
}
