//! Process exit authority and the idempotent cleanup routine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info, warn};

use crate::exit_codes;
use crate::io::driver::ContainerDriver;
use crate::io::environment::Environment;
use crate::io::marker::remove_marker;

/// Process-exit hook. Test doubles record the code instead of exiting.
pub trait Terminate: Send + Sync {
    fn terminate(&self, code: i32);
}

/// Ends the OS process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl Terminate for ProcessExit {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Single owner of the decision to exit.
///
/// Only the first request reaches the hook; later requests are logged and
/// dropped, whichever task makes them.
pub struct ExitAuthority {
    hook: Arc<dyn Terminate>,
    code: OnceLock<i32>,
}

impl ExitAuthority {
    pub fn new(hook: Arc<dyn Terminate>) -> Self {
        Self {
            hook,
            code: OnceLock::new(),
        }
    }

    /// Request process exit with `code`. Returns whether this call won.
    pub fn exit(&self, code: i32) -> bool {
        if self.code.set(code).is_err() {
            warn!(code, first = ?self.requested(), "exit already requested, ignoring");
            return false;
        }
        info!(code, "exiting");
        self.hook.terminate(code);
        true
    }

    /// Code of the winning request, if one was made.
    pub fn requested(&self) -> Option<i32> {
        self.code.get().copied()
    }
}

/// Removes the readiness marker, tears the container down once, and exits
/// unless the process is a long-running server.
pub struct Cleanup {
    env: Environment,
    ready_marker: PathBuf,
    driver: Arc<dyn ContainerDriver>,
    exit: Arc<ExitAuthority>,
    torn_down: AtomicBool,
}

impl Cleanup {
    pub fn new(
        env: Environment,
        ready_marker: PathBuf,
        driver: Arc<dyn ContainerDriver>,
        exit: Arc<ExitAuthority>,
    ) -> Self {
        Self {
            env,
            ready_marker,
            driver,
            exit,
            torn_down: AtomicBool::new(false),
        }
    }

    /// Full cleanup. Safe to call any number of times from any task.
    pub fn run(&self, api_server_mode: bool) {
        self.teardown();
        if api_server_mode {
            debug!("api server mode, cleanup does not exit");
            return;
        }
        self.exit.exit(exit_codes::OK);
    }

    /// Marker removal and driver teardown, without the exit.
    ///
    /// The marker is re-checked on every call; the driver runs only once.
    pub fn teardown(&self) {
        match remove_marker(&self.ready_marker) {
            Ok(true) => debug!(path = %self.ready_marker.display(), "readiness marker removed"),
            Ok(false) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "failed to remove readiness marker"),
        }
        if self.torn_down.swap(true, Ordering::SeqCst) {
            debug!("teardown already performed");
            return;
        }
        self.driver.teardown(&self.env);
    }

    /// [`Cleanup::run`] on a blocking thread.
    pub async fn finish(self: Arc<Self>, api_server_mode: bool) {
        if let Err(err) = tokio::task::spawn_blocking(move || self.run(api_server_mode)).await {
            error!(err = %err, "cleanup task failed");
        }
    }

    /// [`Cleanup::teardown`] on a blocking thread.
    pub async fn finish_teardown(self: Arc<Self>) {
        if let Err(err) = tokio::task::spawn_blocking(move || self.teardown()).await {
            error!(err = %err, "teardown task failed");
        }
    }
}
