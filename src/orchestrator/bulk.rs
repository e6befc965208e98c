//! Bulk launch/close over many accounts.
//!
//! Each target runs as its own task, gated by a semaphore so a large
//! selection does not spawn dozens of clients at once. Failures are kept
//! as per-login outcomes; one failing account never stops the others.
//! Results come back in input order regardless of completion order.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::info;

use crate::config::GlobalConfig;
use crate::models::account::Account;
use crate::models::session::Session;
use crate::orchestrator::launcher::{CloseStatus, Launcher};
use crate::{AppError, Result};

/// Result for one target of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome<T> {
    /// Login the outcome belongs to.
    pub login: String,
    /// Success value or typed failure.
    pub result: Result<T>,
}

impl<T> BulkOutcome<T> {
    /// Whether this target succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Serializable per-login row for reporting bulk results.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutcomeRow<T> {
    /// Login the row belongs to.
    pub login: String,
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    /// Failure kind identifier (see `AppError::code`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Human-readable failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<BulkOutcome<T>> for OutcomeRow<T> {
    fn from(outcome: BulkOutcome<T>) -> Self {
        match outcome.result {
            Ok(value) => Self {
                login: outcome.login,
                ok: true,
                value: Some(value),
                error_kind: None,
                error: None,
            },
            Err(err) => Self {
                login: outcome.login,
                ok: false,
                value: None,
                error_kind: Some(err.code()),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Fans launch and close requests out over many accounts.
#[derive(Clone)]
pub struct BulkCoordinator {
    launcher: Launcher,
    permits: Arc<Semaphore>,
    stagger: Duration,
    next_start: Arc<Mutex<Instant>>,
}

impl BulkCoordinator {
    /// Create a coordinator running at most `max_concurrent` operations at
    /// once and spacing spawn starts at least `stagger` apart.
    #[must_use]
    pub fn new(launcher: Launcher, max_concurrent: usize, stagger: Duration) -> Self {
        Self {
            launcher,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            stagger,
            next_start: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Create a coordinator using the `[launch]` configuration section.
    #[must_use]
    pub fn from_config(launcher: Launcher, config: &GlobalConfig) -> Self {
        Self::new(
            launcher,
            config.launch.max_concurrent,
            config.launch.stagger(),
        )
    }

    /// Underlying launcher.
    #[must_use]
    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Launch every account from `game_directory`.
    pub async fn launch_many(
        &self,
        accounts: Vec<Account>,
        game_directory: PathBuf,
    ) -> Vec<BulkOutcome<Session>> {
        let targets = accounts
            .into_iter()
            .map(|account| (account, game_directory.clone()))
            .collect();
        self.launch_each(targets).await
    }

    /// Launch each account from its own game directory.
    pub async fn launch_each(&self, targets: Vec<(Account, PathBuf)>) -> Vec<BulkOutcome<Session>> {
        let jobs: Vec<_> = targets
            .into_iter()
            .map(|(account, dir)| {
                let this = self.clone();
                let login = account.login.clone();
                let job = async move {
                    this.pace().await;
                    this.launcher.launch(&account, &dir).await
                };
                (login, job)
            })
            .collect();

        let outcomes = self.dispatch(jobs).await;
        log_summary("launch", &outcomes);
        outcomes
    }

    /// Close every listed login.
    pub async fn close_many(&self, logins: Vec<String>) -> Vec<BulkOutcome<CloseStatus>> {
        let jobs: Vec<_> = logins
            .into_iter()
            .map(|login| {
                let launcher = self.launcher.clone();
                let target = login.clone();
                (login, async move { launcher.close(&target).await })
            })
            .collect();

        let outcomes = self.dispatch(jobs).await;
        log_summary("close", &outcomes);
        outcomes
    }

    /// Close every client currently in the registry.
    pub async fn close_all(&self) -> Vec<BulkOutcome<CloseStatus>> {
        let logins = self
            .launcher
            .registry()
            .list_running()
            .into_iter()
            .map(|session| session.account_login)
            .collect();
        self.close_many(logins).await
    }

    async fn dispatch<T, F>(&self, jobs: Vec<(String, F)>) -> Vec<BulkOutcome<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (logins, handles): (Vec<String>, Vec<_>) = jobs
            .into_iter()
            .map(|(login, job)| {
                let permits = Arc::clone(&self.permits);
                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|err| AppError::Io(format!("worker pool closed: {err}")))?;
                    job.await
                });
                (login, handle)
            })
            .unzip();

        join_all(handles)
            .await
            .into_iter()
            .zip(logins)
            .map(|(joined, login)| BulkOutcome {
                result: joined
                    .unwrap_or_else(|err| Err(AppError::Io(format!("worker task failed: {err}")))),
                login,
            })
            .collect()
    }

    /// Wait for this spawn's slot in the stagger schedule.
    async fn pace(&self) {
        if self.stagger.is_zero() {
            return;
        }
        let mut next = self.next_start.lock().await;
        tokio::time::sleep_until(*next).await;
        *next = Instant::now() + self.stagger;
    }
}

fn log_summary<T>(operation: &str, outcomes: &[BulkOutcome<T>]) {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    info!(
        operation,
        requested = outcomes.len(),
        succeeded,
        failed = outcomes.len() - succeeded,
        "bulk operation finished"
    );
}
