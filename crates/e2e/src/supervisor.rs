//! Launcher: precondition check, static server, headless runner, Ctrl-C

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::LaunchConfig;
use crate::error::{exit_code, E2eError, E2eResult};
use crate::server::{ensure_server_running, ServerConfig, ServerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl SupervisorState {
    fn can_move_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Idle, Stopping)
                | (Starting, Stopping)
                | (Idle, Stopped)
                | (Starting, Stopped)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Command line of the headless runner process
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RunnerCommand {
    /// This executable's `run` subcommand, forwarding the config file if one was given.
    pub fn current(config_path: Option<&std::path::Path>) -> E2eResult<Self> {
        let program = std::env::current_exe()?;
        let mut args = Vec::new();
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args.push("run".to_string());
        Ok(Self { program, args })
    }
}

pub struct Supervisor {
    launch: LaunchConfig,
    runner: RunnerCommand,
    state: SupervisorState,
    /// Only set when this supervisor spawned the server
    server: Option<ServerHandle>,
}

impl Supervisor {
    pub fn new(launch: LaunchConfig, runner: RunnerCommand) -> Self {
        Self {
            launch,
            runner,
            state: SupervisorState::Idle,
            server: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn owns_server(&self) -> bool {
        self.server.is_some()
    }

    fn transition(&mut self, next: SupervisorState) -> E2eResult<()> {
        if !self.state.can_move_to(next) {
            return Err(E2eError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!("supervisor: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// The app page must exist before anything is started.
    pub fn check_app_asset(&self) -> E2eResult<()> {
        if self.launch.app_asset.is_file() {
            Ok(())
        } else {
            Err(E2eError::PreconditionMissing(format!(
                "app asset {} not found",
                self.launch.app_asset.display()
            )))
        }
    }

    /// Start the static server unless one already listens on the port.
    pub async fn ensure_server(&mut self) -> E2eResult<()> {
        self.transition(SupervisorState::Starting)?;
        let config = ServerConfig::from_launch(&self.launch);
        self.server = ensure_server_running(&config).await?;
        Ok(())
    }

    /// Spawn the runner and forward its exit code. The child is killed if
    /// this future is dropped.
    pub async fn run_test_suite(&mut self) -> E2eResult<i32> {
        let mut child = Command::new(&self.runner.program)
            .args(&self.runner.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::ProcessSpawnFailed {
                what: self.runner.program.display().to_string(),
                reason: e.to_string(),
            })?;
        self.transition(SupervisorState::Running)?;
        info!("Runner started (pid: {:?})", child.id());

        let status = child.wait().await?;
        // A signal-terminated child has no code
        let code = status.code().unwrap_or(exit_code::SCENARIOS_FAILED);
        info!("Runner exited with {}", code);
        Ok(code)
    }

    fn interrupt(&mut self) {
        if matches!(self.state, SupervisorState::Stopping | SupervisorState::Stopped) {
            return;
        }
        let _ = self.transition(SupervisorState::Stopping);
    }

    /// Stop an owned server; an adopted one is left alone.
    pub fn shutdown(&mut self) {
        if self.state == SupervisorState::Stopped {
            return;
        }
        self.interrupt();
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.stop() {
                warn!("Failed to stop static server: {}", e);
            }
        }
        let _ = self.transition(SupervisorState::Stopped);
    }

    async fn run_sequence(&mut self) -> E2eResult<i32> {
        self.check_app_asset()?;
        self.ensure_server().await?;
        self.run_test_suite().await
    }

    /// Full launch sequence, interruptible by Ctrl-C; returns the process exit code.
    pub async fn launch(mut self) -> i32 {
        self.launch_until(ctrl_c()).await
    }

    /// Full launch sequence raced against `interrupt`. Whatever stage is in
    /// flight when `interrupt` resolves is dropped: a server still starting
    /// is stopped with its handle and a running runner is killed.
    pub async fn launch_until<F>(&mut self, interrupt: F) -> i32
    where
        F: Future<Output = ()>,
    {
        let outcome = {
            let sequence = self.run_sequence();
            tokio::pin!(sequence);
            tokio::select! {
                result = &mut sequence => Some(result),
                _ = interrupt => None,
            }
        };

        let code = match outcome {
            Some(Ok(code)) => code,
            Some(Err(e)) => {
                error!("{}", e);
                e.exit_code()
            }
            None => {
                warn!("Interrupted during {}, stopping", self.state);
                self.interrupt();
                exit_code::INTERRUPTED
            }
        };
        self.shutdown();
        code
    }
}

/// Resolves on the first Ctrl-C. If the handler cannot be installed it never resolves.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
