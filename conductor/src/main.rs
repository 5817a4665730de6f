//! `conductor` binary: parse arguments, install logging, hand off to the controller.

use std::sync::Arc;

use clap::Parser;
use conductor::cleanup::ProcessExit;
use conductor::cli::{Cli, Command};
use conductor::controller::{Collaborators, Controller};
use conductor::exit_codes;
use conductor::io::archiver::DirectoryArchiver;
use conductor::io::commands::CliCommandBuilder;
use conductor::io::config::FileConfigStages;
use conductor::io::driver::AgentContainerDriver;
use conductor::io::marker::{policy_from_env, write_marker};
use conductor::io::paths::SystemPaths;
use conductor::io::resolver::WorkflowResolverFactory;
use conductor::logging;
use conductor::signals::shutdown_signal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init();
    let paths = SystemPaths::from_env();

    if cli.command == Some(Command::MarkReady) {
        if let Err(err) = write_marker(&paths.ready_marker) {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILURE);
        }
        return;
    }

    let resolvers = Arc::new(WorkflowResolverFactory);
    let collaborators = Collaborators {
        config_stages: Arc::new(FileConfigStages::from_env()),
        driver: Arc::new(AgentContainerDriver::new(paths.clone())),
        resolvers: resolvers.clone(),
        commands: Arc::new(CliCommandBuilder {
            command: cli.command,
            archiver: Arc::new(DirectoryArchiver),
            resolvers,
        }),
        terminate: Arc::new(ProcessExit),
    };
    let controller = Controller::new(paths, policy_from_env(), collaborators);
    let code = controller.run(shutdown_signal()).await;
    std::process::exit(code);
}
