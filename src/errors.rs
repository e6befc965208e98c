//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// The configured game directory does not contain the client executable.
    GameClientNotFound(String),
    /// A live session (or an in-flight launch) already exists for the login.
    AlreadyRunning(String),
    /// The OS refused to create the client process.
    SpawnFailed(String),
    /// No session is tracked for the login.
    NotRunning(String),
    /// The OS denied the termination request.
    TerminationFailed(String),
    /// A launcher script does not follow the expected layout.
    MalformedScript(String),
    /// An account record failed field validation.
    Validation(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC communication failure.
    Ipc(String),
}

impl AppError {
    /// Stable snake-case identifier of the failure kind.
    ///
    /// Used where outcomes are carried as data (bulk results, IPC replies).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::GameClientNotFound(_) => "game_client_not_found",
            Self::AlreadyRunning(_) => "already_running",
            Self::SpawnFailed(_) => "spawn_failed",
            Self::NotRunning(_) => "not_running",
            Self::TerminationFailed(_) => "termination_failed",
            Self::MalformedScript(_) => "malformed_script",
            Self::Validation(_) => "validation",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Ipc(_) => "ipc",
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GameClientNotFound(msg) => write!(f, "game client not found: {msg}"),
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::SpawnFailed(msg) => write!(f, "spawn failed: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::TerminationFailed(msg) => write!(f, "termination failed: {msg}"),
            Self::MalformedScript(msg) => write!(f, "malformed script: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
