//! Package archiver: installs an agent package into the workspace.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::core::errors::Cancelled;
use crate::core::types::Stage;
use crate::io::tree_copy::{copy_tree, remove_tree};
use crate::io::workflow::load_manifest;

pub trait Archiver: Send + Sync {
    /// Extract `package` under `destination_dir`, returning the installed path.
    fn extract(
        &self,
        cancel: &CancellationToken,
        destination_dir: &Path,
        package: &Path,
    ) -> Result<PathBuf>;
}

/// Installs unpacked package directories (a tree holding `workflow.toml`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryArchiver;

impl Archiver for DirectoryArchiver {
    #[instrument(skip_all, fields(package = %package.display()))]
    fn extract(
        &self,
        cancel: &CancellationToken,
        destination_dir: &Path,
        package: &Path,
    ) -> Result<PathBuf> {
        if !package.is_dir() {
            bail!("package {} is not a directory", package.display());
        }
        let manifest = load_manifest(package)
            .with_context(|| format!("read package {}", package.display()))?;
        if cancel.is_cancelled() {
            return Err(Cancelled {
                during: Stage::ExecuteCommand,
            }
            .into());
        }
        fs::create_dir_all(destination_dir)
            .with_context(|| format!("create directory {}", destination_dir.display()))?;
        let source = package
            .canonicalize()
            .with_context(|| format!("resolve {}", package.display()))?;
        let installed = destination_dir
            .canonicalize()
            .with_context(|| format!("resolve {}", destination_dir.display()))?
            .join(&manifest.name);
        if source.starts_with(&installed) || installed.starts_with(&source) {
            bail!(
                "package {} overlaps install target {}",
                source.display(),
                installed.display()
            );
        }

        // Copy beside the target first so a failed copy leaves the installed
        // agent untouched.
        let staging = installed.with_file_name(format!(".{}.installing", manifest.name));
        remove_tree(&staging)?;
        copy_tree(&source, &staging)
            .with_context(|| format!("stage package into {}", staging.display()))?;
        remove_tree(&installed)?;
        fs::rename(&staging, &installed)
            .with_context(|| format!("install into {}", installed.display()))?;
        info!(agent = %manifest.name, path = %installed.display(), "package installed");
        Ok(installed)
    }
}
