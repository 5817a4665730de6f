//! Lifecycle orchestrator for packaged AI agents.
//!
//! The orchestrator decides whether it runs inside a managed container or on
//! a bare host, resolves configuration on the host, drives an agent's action
//! graph in the container, and funnels every shutdown path (completion,
//! signal, failure) through one cleanup routine and one exit authority.
//!
//! - **[`core`]**: Pure, deterministic logic (stage taxonomy, classified
//!   errors, dependency stacks, readiness backoff). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem, child processes, the
//!   external collaborators). Each collaborator sits behind a trait so tests
//!   substitute it.
//!
//! Orchestration modules ([`pipeline`], [`actions`], [`cleanup`], [`signals`],
//! [`controller`]) compose core logic with I/O.

pub mod actions;
pub mod cleanup;
pub mod cli;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod signals;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
