//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Executable name of the game client inside the game directory.
pub const DEFAULT_CLIENT_EXECUTABLE: &str = "elementclient.exe";

/// Process monitor cadence and failure tolerance.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Interval between reconciliation passes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive failed process queries before a session is cleared.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl MonitorConfig {
    /// Reconciliation interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Launch and close tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LaunchConfig {
    /// Worker limit for bulk launch/close.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum delay between consecutive spawn starts in a bulk launch.
    #[serde(default)]
    pub stagger_ms: u64,
    /// Graceful wait after a termination request before forcing it.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Re-check cadence while confirming that a closed client exited.
    #[serde(default = "default_close_poll_ms")]
    pub close_poll_ms: u64,
}

impl LaunchConfig {
    /// Stagger between spawn starts.
    #[must_use]
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    /// Graceful termination window.
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Exit confirmation cadence.
    #[must_use]
    pub fn close_poll(&self) -> Duration {
        Duration::from_millis(self.close_poll_ms)
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            stagger_ms: 0,
            close_grace_ms: default_close_grace_ms(),
            close_poll_ms: default_close_poll_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    4
}

fn default_close_grace_ms() -> u64 {
    5000
}

fn default_close_poll_ms() -> u64 {
    100
}

fn default_client_executable() -> String {
    DEFAULT_CLIENT_EXECUTABLE.into()
}

fn default_accounts_file() -> PathBuf {
    PathBuf::from("accounts.json")
}

fn default_ipc_name() -> String {
    "pw-session-engine".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Game folder holding the client executable.
    ///
    /// Checked at launch time, not here: a missing or wrong folder surfaces
    /// as `GameClientNotFound` on each launch.
    #[serde(default)]
    pub game_directory: Option<PathBuf>,
    /// Client executable file name inside `game_directory`.
    #[serde(default = "default_client_executable")]
    pub client_executable: String,
    /// JSON account list consumed by the daemon.
    #[serde(default = "default_accounts_file")]
    pub accounts_file: PathBuf,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Close every tracked client when the daemon stops.
    #[serde(default)]
    pub terminate_clients_on_shutdown: bool,
    /// Process monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Launch and close settings.
    #[serde(default)]
    pub launch: LaunchConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            game_directory: None,
            client_executable: default_client_executable(),
            accounts_file: default_accounts_file(),
            ipc_name: default_ipc_name(),
            terminate_clients_on_shutdown: false,
            monitor: MonitorConfig::default(),
            launch: LaunchConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Full path of the client executable, if a game directory is set.
    #[must_use]
    pub fn client_path(&self) -> Option<PathBuf> {
        self.game_directory
            .as_ref()
            .map(|dir| dir.join(&self.client_executable))
    }

    fn validate(&self) -> Result<()> {
        if self.client_executable.trim().is_empty() {
            return Err(AppError::Config(
                "client_executable must not be empty".into(),
            ));
        }

        if Path::new(&self.client_executable).components().count() != 1 {
            return Err(AppError::Config(
                "client_executable must be a bare file name".into(),
            ));
        }

        if self.monitor.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "monitor.poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.monitor.failure_threshold == 0 {
            return Err(AppError::Config(
                "monitor.failure_threshold must be greater than zero".into(),
            ));
        }

        if self.launch.max_concurrent == 0 {
            return Err(AppError::Config(
                "launch.max_concurrent must be greater than zero".into(),
            ));
        }

        if self.launch.close_poll_ms == 0 {
            return Err(AppError::Config(
                "launch.close_poll_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
