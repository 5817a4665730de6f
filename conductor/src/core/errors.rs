//! Classified failures recovered by callers through `anyhow::Error::downcast_ref`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::types::{ErrorClass, Stage};

/// A lifecycle stage failed and aborted its branch.
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(stage: Stage, source: anyhow::Error) -> Self {
        Self { stage, source }
    }

    pub fn class(&self) -> ErrorClass {
        self.stage.class()
    }
}

// The cause is reached through `source()`, so `{:#}` prints it once.
impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.stage)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// The action graph reported a failure that must end the process.
///
/// `source` may be absent: a fatal flag without an accompanying error still
/// terminates.
#[derive(Debug)]
pub struct FatalRunError {
    pub source: Option<anyhow::Error>,
}

impl fmt::Display for FatalRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(err) => write!(f, "fatal run error: {err:#}"),
            None => f.write_str("fatal run error"),
        }
    }
}

impl std::error::Error for FatalRunError {}

/// The readiness marker never appeared before the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyTimeoutError {
    pub path: PathBuf,
    pub waited: Duration,
}

impl fmt::Display for ReadyTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out after {}ms waiting for {}",
            self.waited.as_millis(),
            self.path.display()
        )
    }
}

impl std::error::Error for ReadyTimeoutError {}

/// A wait or command gave up because the shared token was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancelled {
    pub during: Stage,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cancelled", self.during)
    }
}

impl std::error::Error for Cancelled {}

/// Returns true when `err` (or any error it wraps) is a cancellation.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

/// Returns true when `err` carries a [`FatalRunError`] anywhere in its chain.
pub fn is_fatal_run(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<FatalRunError>())
}

/// The outermost stage named by `err`, if any.
pub fn failed_stage(err: &anyhow::Error) -> Option<Stage> {
    err.chain().find_map(|cause| {
        if let Some(stage_err) = cause.downcast_ref::<StageError>() {
            Some(stage_err.stage)
        } else if cause.is::<FatalRunError>() {
            Some(Stage::RunAction)
        } else {
            None
        }
    })
}
