//! Readiness marker: the filesystem handshake with the sibling lifecycle process.
//!
//! The marker's existence is the whole signal. The producer writes it once
//! ([`write_marker`]); the orchestrator waits for it ([`wait_for_ready`]) and
//! deletes it during cleanup ([`remove_marker`]). It is never edited.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::core::backoff::{WaitPolicy, next_sleep};
use crate::core::errors::{Cancelled, ReadyTimeoutError};
use crate::core::types::Stage;

pub const READY_TIMEOUT_ENV: &str = "CONDUCTOR_READY_TIMEOUT_MS";
pub const READY_POLL_ENV: &str = "CONDUCTOR_READY_POLL_MS";

/// Default policy with `$CONDUCTOR_READY_TIMEOUT_MS` / `$CONDUCTOR_READY_POLL_MS` applied.
pub fn policy_from_env() -> WaitPolicy {
    policy_with(|key| std::env::var(key).ok())
}

pub fn policy_with<F>(var: F) -> WaitPolicy
where
    F: Fn(&str) -> Option<String>,
{
    let millis = |key: &str| {
        var(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    };
    let mut policy = WaitPolicy::default();
    if let Some(deadline) = millis(READY_TIMEOUT_ENV) {
        policy.deadline = deadline;
    }
    if let Some(interval) = millis(READY_POLL_ENV) {
        policy.initial_interval = interval;
        policy.max_interval = policy.max_interval.max(interval);
    }
    policy
}

/// Poll for `path` until it exists, the deadline passes, or `cancel` fires.
///
/// Errors are [`ReadyTimeoutError`] on deadline, [`Cancelled`] on
/// cancellation, or the underlying I/O error from probing the path.
#[instrument(skip_all, fields(path = %path.display(), deadline_ms = policy.deadline.as_millis() as u64))]
pub async fn wait_for_ready(
    path: &Path,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    let deadline = started + policy.deadline;
    let mut interval = policy.initial_interval;

    loop {
        if cancel.is_cancelled() {
            return Err(Cancelled {
                during: Stage::WaitForReady,
            }
            .into());
        }
        if path
            .try_exists()
            .with_context(|| format!("probe {}", path.display()))?
        {
            info!(waited_ms = started.elapsed().as_millis() as u64, "readiness marker present");
            return Ok(());
        }

        let now = Instant::now();
        let Some(sleep) = next_sleep(deadline.into_std(), now.into_std(), interval) else {
            return Err(ReadyTimeoutError {
                path: path.to_path_buf(),
                waited: now.duration_since(started),
            }
            .into());
        };
        debug!(sleep_ms = sleep.as_millis() as u64, "readiness marker absent");
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Cancelled { during: Stage::WaitForReady }.into());
            }
            _ = tokio::time::sleep(sleep) => {}
        }
        interval = policy.next_interval(interval);
    }
}

/// Create the marker with an RFC 3339 timestamp body.
pub fn write_marker(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let body = format!("{}\n", chrono::Utc::now().to_rfc3339());
    fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "readiness marker written");
    Ok(())
}

/// Delete the marker. Returns whether it was present; "already gone" is success.
pub fn remove_marker(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}
