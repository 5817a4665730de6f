//! Configuration resolution chain: find, generate, edit, validate, load, derive.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::errors::StageError;
use crate::core::types::Stage;
use crate::io::config::{ConfigStages, ResolvedConfig};
use crate::io::environment::Environment;

/// Run every stage in order and return the loaded configuration with its
/// derived workspace root.
///
/// Find and Generate may come back empty without failing the chain. Every
/// failure is a [`StageError`] naming the stage. An empty path reaching
/// Validate is always a validation failure, and Validate is not called.
#[instrument(skip_all)]
pub fn resolve_configuration(
    stages: &dyn ConfigStages,
    env: &Environment,
) -> Result<ResolvedConfig> {
    let mut path = stages
        .find(env)
        .map_err(|err| StageError::new(Stage::FindConfig, err))?;
    let mut generated = false;

    if path.is_none() {
        path = stages
            .generate(env)
            .map_err(|err| StageError::new(Stage::GenerateConfig, err))?;
        generated = path.is_some();
        if !generated {
            debug!("generate produced nothing, continuing");
        }
    }

    // A freshly generated file is the only one not yet reviewed by a human.
    if generated
        && env.interactive()
        && let Some(current) = path.as_deref()
    {
        let edited = stages
            .edit(env, current)
            .map_err(|err| StageError::new(Stage::EditConfig, err))?;
        if edited.is_some() {
            path = edited;
        }
    }

    let Some(candidate) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return Err(StageError::new(
            Stage::ValidateConfig,
            anyhow!("no configuration file found or generated"),
        )
        .into());
    };
    let validated: PathBuf = stages
        .validate(env, &candidate)
        .map_err(|err| StageError::new(Stage::ValidateConfig, err))?;
    let config = stages
        .load(&validated)
        .map_err(|err| StageError::new(Stage::LoadConfig, err))?;
    let workspace_root = stages
        .workspace_root(env, &config)
        .map_err(|err| StageError::new(Stage::DeriveWorkspace, err))?;

    info!(
        path = %validated.display(),
        workspace_root = %workspace_root.display(),
        "configuration resolved"
    );
    Ok(ResolvedConfig {
        path: validated,
        config,
        workspace_root,
    })
}
