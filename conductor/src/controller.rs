//! Mode controller: container branch vs. host branch, one shared signal
//! listener, one exit authority.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::actions::{run_blocking, run_graph_actions};
use crate::cleanup::{Cleanup, ExitAuthority, Terminate};
use crate::core::backoff::WaitPolicy;
use crate::core::errors::{StageError, failed_stage, is_cancelled, is_fatal_run};
use crate::core::types::Stage;
use crate::exit_codes;
use crate::io::commands::CommandBuilder;
use crate::io::config::{ConfigStages, ResolvedConfig, RunConfig};
use crate::io::driver::ContainerDriver;
use crate::io::environment::Environment;
use crate::io::paths::SystemPaths;
use crate::io::resolver::ResolverFactory;
use crate::pipeline::resolve_configuration;
use crate::signals::spawn_listener;

/// External collaborators, injected at construction.
pub struct Collaborators {
    pub config_stages: Arc<dyn ConfigStages>,
    pub driver: Arc<dyn ContainerDriver>,
    pub resolvers: Arc<dyn ResolverFactory>,
    pub commands: Arc<dyn CommandBuilder>,
    pub terminate: Arc<dyn Terminate>,
}

pub struct Controller {
    paths: SystemPaths,
    policy: WaitPolicy,
    collaborators: Collaborators,
    exit: Arc<ExitAuthority>,
    api_server_mode: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(paths: SystemPaths, policy: WaitPolicy, collaborators: Collaborators) -> Self {
        let exit = Arc::new(ExitAuthority::new(Arc::clone(&collaborators.terminate)));
        Self {
            paths,
            policy,
            collaborators,
            exit,
            api_server_mode: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// The shared cancellation token. Cancelling it ends every wait.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Detect the environment, run the matching branch, and return the exit
    /// code. Every exit request also goes through the injected hook, so with
    /// the production hook this only returns when no exit was requested.
    #[instrument(skip_all)]
    pub async fn run<S>(&self, signal: S) -> i32
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let env = match Environment::detect(&self.paths) {
            Ok(env) => env,
            Err(err) => {
                error!(err = %format!("{err:#}"), "environment detection failed");
                self.exit.exit(exit_codes::FAILURE);
                return exit_codes::FAILURE;
            }
        };
        info!(container_mode = %env.container_mode, "environment detected");

        let cleanup = Arc::new(Cleanup::new(
            env.clone(),
            self.paths.ready_marker.clone(),
            Arc::clone(&self.collaborators.driver),
            Arc::clone(&self.exit),
        ));
        let listener = spawn_listener(
            signal,
            self.cancel.clone(),
            Arc::clone(&cleanup),
            Arc::clone(&self.api_server_mode),
        );

        let code = if env.container_mode.is_on() {
            self.run_container(&env, &cleanup).await
        } else {
            self.run_host(&env, &cleanup).await
        };

        self.cancel.cancel();
        if let Err(err) = listener.await {
            error!(err = %err, "signal listener failed");
        }
        self.exit.requested().unwrap_or(code)
    }

    async fn run_container(&self, env: &Environment, cleanup: &Arc<Cleanup>) -> i32 {
        let resolver = match self.collaborators.resolvers.create(
            env,
            self.paths.container_agent(),
            &RunConfig::default(),
            self.cancel.clone(),
        ) {
            Ok(resolver) => resolver,
            Err(err) => {
                return self
                    .abort(StageError::new(Stage::Bootstrap, err).into(), cleanup)
                    .await;
            }
        };

        let driver = Arc::clone(&self.collaborators.driver);
        let boot_env = env.clone();
        let boot_cancel = self.cancel.clone();
        let boot_resolver = Arc::clone(&resolver);
        let bootstrap = run_blocking(Stage::Bootstrap, &self.cancel, move || {
            driver.bootstrap(&boot_env, &boot_cancel, boot_resolver.as_ref())
        })
        .await;
        let api_server_mode = match bootstrap {
            Ok(api_server_mode) => api_server_mode,
            Err(err) => {
                return self
                    .abort(StageError::new(Stage::Bootstrap, err).into(), cleanup)
                    .await;
            }
        };
        self.api_server_mode.store(api_server_mode, Ordering::SeqCst);
        info!(api_server_mode, "container bootstrapped");

        if let Err(err) =
            run_graph_actions(resolver, &self.paths.ready_marker, &self.policy, &self.cancel).await
        {
            return self.abort(err, cleanup).await;
        }

        if api_server_mode {
            info!("serving until a shutdown signal arrives");
            self.cancel.cancelled().await;
            return self.exit.requested().unwrap_or(exit_codes::OK);
        }
        Arc::clone(cleanup).finish(false).await;
        exit_codes::OK
    }

    async fn run_host(&self, env: &Environment, cleanup: &Arc<Cleanup>) -> i32 {
        let stages = Arc::clone(&self.collaborators.config_stages);
        let pipeline_env = env.clone();
        // Edit may sit on a prompt or an editor session, so the chain races
        // the token like any other blocking work.
        let resolved = match run_blocking(Stage::FindConfig, &self.cancel, move || {
            resolve_configuration(stages.as_ref(), &pipeline_env)
        })
        .await
        {
            Ok(resolved) => resolved,
            Err(err) => return self.abort(err, cleanup).await,
        };

        if let Err(err) = self.execute_command(env, &resolved).await {
            return self.abort(err, cleanup).await;
        }
        Arc::clone(cleanup).finish(false).await;
        exit_codes::OK
    }

    async fn execute_command(
        &self,
        env: &Environment,
        resolved: &ResolvedConfig,
    ) -> Result<()> {
        let command = self
            .collaborators
            .commands
            .build(env, resolved)
            .map_err(|err| StageError::new(Stage::ExecuteCommand, err))?;
        let name = command.name();
        let command_cancel = self.cancel.clone();
        run_blocking(Stage::ExecuteCommand, &self.cancel, move || {
            command.execute(&command_cancel)
        })
        .await
        .map_err(|err| StageError::new(Stage::ExecuteCommand, err))?;
        info!(command = name, "command finished");
        Ok(())
    }

    /// Shared failure path: log the stage, tear down, exit non-zero.
    ///
    /// A failure caused by cancellation means a signal-driven shutdown is
    /// already underway, so nothing is logged or requested here.
    async fn abort(&self, err: anyhow::Error, cleanup: &Arc<Cleanup>) -> i32 {
        if is_cancelled(&err) || self.cancel.is_cancelled() {
            info!("shutdown in progress");
            return self.exit.requested().unwrap_or(exit_codes::OK);
        }
        let code = if is_fatal_run(&err) {
            exit_codes::FATAL_RUN
        } else {
            exit_codes::FAILURE
        };
        let stage = failed_stage(&err).map_or("unknown", Stage::as_str);
        error!(stage, code, err = %format!("{err:#}"), "lifecycle aborted");
        Arc::clone(cleanup).finish_teardown().await;
        self.exit.exit(code);
        self.exit.requested().unwrap_or(code)
    }
}
