//! Shutdown signal listener shared by both controller branches.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cleanup::Cleanup;

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
///
/// A handler that fails to install is logged and never fires, so the other
/// one still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(err = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(err = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Spawn the listener.
///
/// When `signal` fires first, the token is cancelled and cleanup runs with
/// the current server mode (exiting 0 unless serving). When the token is
/// cancelled first, the listener returns without touching cleanup. The task
/// result says whether a signal was handled.
pub fn spawn_listener<S>(
    signal: S,
    cancel: CancellationToken,
    cleanup: Arc<Cleanup>,
    api_server_mode: Arc<AtomicBool>,
) -> JoinHandle<bool>
where
    S: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("listener stopping, context already done");
                false
            }
            _ = signal => {
                let api_server_mode = api_server_mode.load(Ordering::SeqCst);
                info!(api_server_mode, "shutdown signal received");
                cancel.cancel();
                cleanup.finish(api_server_mode).await;
                true
            }
        }
    })
}
