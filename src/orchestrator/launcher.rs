//! Launch orchestrator: start and close one client per account.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::codec::script::client_arguments;
use crate::config::{GlobalConfig, LaunchConfig, DEFAULT_CLIENT_EXECUTABLE};
use crate::models::account::Account;
use crate::models::session::{ExitReason, Session};
use crate::orchestrator::host::{LaunchCommand, Probe, ProcessHost, Termination};
use crate::orchestrator::registry::SessionRegistry;
use crate::{AppError, Result};

/// Launcher tuning derived from [`GlobalConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    /// Client executable name inside the game directory.
    pub client_executable: String,
    /// How long to wait for a client to exit after each termination request.
    pub close_grace: Duration,
    /// Re-check cadence while waiting for the exit.
    pub close_poll: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        let launch = LaunchConfig::default();
        Self {
            client_executable: DEFAULT_CLIENT_EXECUTABLE.into(),
            close_grace: launch.close_grace(),
            close_poll: launch.close_poll(),
        }
    }
}

impl LaunchSettings {
    /// Extract launcher settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            client_executable: config.client_executable.clone(),
            close_grace: config.launch.close_grace(),
            close_poll: config.launch.close_poll(),
        }
    }
}

/// Outcome of a successful close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStatus {
    /// Exit confirmed; the session has left the registry.
    Exited,
    /// Termination was requested but the process is still visible. The
    /// monitor removes the session once the exit is observed.
    Pending,
}

/// Starts client processes and records them in the registry.
#[derive(Clone)]
pub struct Launcher {
    registry: SessionRegistry,
    host: Arc<dyn ProcessHost>,
    settings: LaunchSettings,
}

impl Launcher {
    /// Create a launcher over a shared registry and process host.
    #[must_use]
    pub fn new(
        registry: SessionRegistry,
        host: Arc<dyn ProcessHost>,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            registry,
            host,
            settings,
        }
    }

    /// Registry this launcher writes to.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    /// Resolve the client invocation for `account`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::GameClientNotFound` if `game_directory` does not
    /// contain the client executable, or `AppError::Validation` for an
    /// account without a login.
    pub fn command_for(&self, account: &Account, game_directory: &Path) -> Result<LaunchCommand> {
        if account.login.is_empty() {
            return Err(AppError::Validation("login is required".into()));
        }

        let program = game_directory.join(&self.settings.client_executable);
        if !program.is_file() {
            return Err(AppError::GameClientNotFound(format!(
                "{} does not exist",
                program.display()
            )));
        }

        Ok(LaunchCommand {
            program,
            args: client_arguments(account),
            working_dir: game_directory.to_path_buf(),
        })
    }

    /// Launch the client for `account` from `game_directory`.
    ///
    /// Spawn failures are reported, never retried.
    ///
    /// # Errors
    ///
    /// - `AppError::GameClientNotFound`: client executable missing.
    /// - `AppError::AlreadyRunning`: the login is live or being launched.
    /// - `AppError::SpawnFailed`: the OS refused to start the process.
    pub async fn launch(&self, account: &Account, game_directory: &Path) -> Result<Session> {
        let span = info_span!("launch", login = %account.login);
        async move {
            let command = self.command_for(account, game_directory)?;
            let reservation = self.registry.reserve(&account.login)?;

            let host = Arc::clone(&self.host);
            let spawned = tokio::task::spawn_blocking(move || host.spawn(&command))
                .await
                .map_err(|err| AppError::SpawnFailed(format!("spawn task failed: {err}")))?
                .map_err(|err| {
                    warn!(%err, "client spawn failed");
                    err
                })?;

            let session = reservation.commit(Session::new(
                account.login.clone(),
                spawned.pid,
                spawned.start_time,
            ));
            info!(pid = session.process_id, "client launched");
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Close the client tracked for `login`.
    ///
    /// Sends a graceful termination, waits up to the close grace for the
    /// exit, then forces it. The session is removed only once the exit is
    /// observed; otherwise [`CloseStatus::Pending`] is returned and the
    /// monitor finishes the job.
    ///
    /// # Errors
    ///
    /// - `AppError::NotRunning`: no session for `login`.
    /// - `AppError::TerminationFailed`: the OS denied the request; the
    ///   session stays in the registry so the close can be retried.
    pub async fn close(&self, login: &str) -> Result<CloseStatus> {
        let span = info_span!("close", login);
        async move {
            let session = self
                .registry
                .get(login)
                .ok_or_else(|| AppError::NotRunning(login.to_owned()))?;
            let pid = session.process_id;

            // Never signal a pid that no longer belongs to our client.
            match self.probe(pid).await {
                Probe::Gone => {
                    self.registry.retire(login, pid, ExitReason::Exited);
                    return Ok(CloseStatus::Exited);
                }
                Probe::Alive { start_time } if !session.matches_start(start_time) => {
                    self.registry.retire(login, pid, ExitReason::Replaced);
                    return Ok(CloseStatus::Exited);
                }
                Probe::Alive { .. } | Probe::Unknown(_) => {}
            }

            self.terminate(pid, Termination::Graceful).await?;
            if self.await_exit(&session).await {
                self.registry.retire(login, pid, ExitReason::Closed);
                info!(pid, "client closed");
                return Ok(CloseStatus::Exited);
            }

            warn!(
                pid,
                grace_ms = self.settings.close_grace.as_millis(),
                "client ignored termination request, forcing"
            );
            self.terminate(pid, Termination::Forced).await?;
            if self.await_exit(&session).await {
                self.registry.retire(login, pid, ExitReason::Closed);
                info!(pid, "client killed");
                return Ok(CloseStatus::Exited);
            }

            warn!(pid, "client exit not yet observed, leaving it to the monitor");
            Ok(CloseStatus::Pending)
        }
        .instrument(span)
        .await
    }

    /// Poll until the session's process is gone or the grace elapses.
    async fn await_exit(&self, session: &Session) -> bool {
        let deadline = Instant::now() + self.settings.close_grace;
        loop {
            match self.probe(session.process_id).await {
                Probe::Gone => return true,
                Probe::Alive { start_time } if !session.matches_start(start_time) => return true,
                Probe::Alive { .. } | Probe::Unknown(_) => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.settings.close_poll).await;
        }
    }

    async fn probe(&self, pid: u32) -> Probe {
        let host = Arc::clone(&self.host);
        tokio::task::spawn_blocking(move || host.probe(pid))
            .await
            .unwrap_or_else(|err| Probe::Unknown(format!("probe task failed: {err}")))
    }

    async fn terminate(&self, pid: u32, mode: Termination) -> Result<()> {
        let host = Arc::clone(&self.host);
        tokio::task::spawn_blocking(move || host.terminate(pid, mode))
            .await
            .map_err(|err| AppError::TerminationFailed(format!("termination task failed: {err}")))?
            .map_err(|err| {
                warn!(pid, %err, "termination request denied");
                err
            })
    }
}
