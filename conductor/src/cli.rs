//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "conductor",
    version,
    about = "Lifecycle orchestrator for packaged AI agents"
)]
pub struct Cli {
    /// Ignored inside a container, where the baked-in agent always runs.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List installed agents.
    List,
    /// Install an agent package directory into the workspace.
    Install {
        /// Directory containing `workflow.toml`.
        package: PathBuf,
    },
    /// Prepare and run an installed agent's action graph.
    Run {
        /// Installed agent name.
        agent: String,
    },
    /// Print the resolved configuration path and workspace root.
    Config,
    /// Write the readiness marker so a waiting orchestrator can clean up.
    MarkReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from(["conductor", "run", "echo"]);
        assert_eq!(
            cli.command,
            Some(Command::Run {
                agent: "echo".to_string()
            })
        );
    }

    #[test]
    fn parse_without_subcommand() {
        let cli = Cli::parse_from(["conductor"]);
        assert_eq!(cli.command, None);
    }

    #[test]
    fn parse_mark_ready() {
        let cli = Cli::parse_from(["conductor", "mark-ready"]);
        assert_eq!(cli.command, Some(Command::MarkReady));
    }
}
