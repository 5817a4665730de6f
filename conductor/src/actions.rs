//! Containerized action sequence: prepare, run, then wait for the sibling
//! lifecycle process to signal readiness.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::core::backoff::WaitPolicy;
use crate::core::errors::{Cancelled, StageError, is_cancelled};
use crate::core::types::Stage;
use crate::io::marker::wait_for_ready;
use crate::io::resolver::{GraphResolver, RunOutcome, prepare};

/// Run blocking `work` on the blocking pool, returning early with
/// [`Cancelled`] if `cancel` fires first.
///
/// The blocking task is detached on cancellation; collaborators observe the
/// same token and wind down on their own.
pub async fn run_blocking<T, F>(stage: Stage, cancel: &CancellationToken, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    tokio::select! {
        _ = cancel.cancelled() => Err(Cancelled { during: stage }.into()),
        joined = handle => joined.map_err(|err| anyhow!("{stage} task failed: {err}"))?,
    }
}

/// Drive `resolver` through its three operations, then wait for the
/// readiness marker.
///
/// Preparation failures and fatal run results return immediately. A
/// non-fatal run failure still waits for readiness before it is returned,
/// so the sibling process can finish its side of the shutdown.
#[instrument(skip_all, fields(marker = %ready_marker.display()))]
pub async fn run_graph_actions(
    resolver: Arc<dyn GraphResolver>,
    ready_marker: &Path,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcome: RunOutcome = run_blocking(Stage::RunAction, cancel, move || {
        prepare(resolver.as_ref())?;
        Ok(resolver.handle_run_action())
    })
    .await?;

    if outcome.fatal {
        error!("action graph reported a fatal error");
        return outcome.into_result();
    }
    let run_error = match outcome.error {
        Some(err) if is_cancelled(&err) => {
            return Err(StageError::new(Stage::RunAction, err).into());
        }
        Some(err) => {
            warn!(err = %format!("{err:#}"), "action failed, waiting for readiness before reporting");
            Some(StageError::new(Stage::RunAction, err))
        }
        None => None,
    };

    wait_for_ready(ready_marker, policy, cancel)
        .await
        .map_err(|err| StageError::new(Stage::WaitForReady, err))?;
    info!("sibling lifecycle process signalled readiness");

    match run_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
