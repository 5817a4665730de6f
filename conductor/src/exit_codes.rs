//! Stable process exit codes for the orchestrator.

/// Clean completion or signal-triggered graceful shutdown.
pub const OK: i32 = 0;
/// A configuration, bootstrap, preparation, synchronization or command stage failed,
/// or an action failed without being fatal.
pub const FAILURE: i32 = 1;
/// The action graph reported a fatal (process-level) failure.
pub const FATAL_RUN: i32 = 2;
