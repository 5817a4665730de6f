//! Side-effecting adapters: filesystem, child processes, external collaborators.

pub mod archiver;
pub mod commands;
pub mod config;
pub mod driver;
pub mod environment;
pub mod marker;
pub mod paths;
pub mod process;
pub mod resolver;
pub mod tree_copy;
pub mod workflow;
