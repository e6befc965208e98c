//! Session model and exit notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked client process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Process is believed to be alive.
    Running,
    /// Process exit has been observed.
    Exited,
}

/// Link between an account and the client process launched for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Login of the account that spawned the process.
    pub account_login: String,
    /// OS process identifier.
    pub process_id: u32,
    /// When the engine started the process.
    pub started_at: DateTime<Utc>,
    /// OS-reported process start time (seconds since the epoch).
    ///
    /// Distinguishes the spawned process from an unrelated one that
    /// later receives the same pid.
    pub process_start: Option<u64>,
    /// Current lifecycle state.
    pub state: SessionState,
}

impl Session {
    /// Construct a running session for a freshly spawned process.
    #[must_use]
    pub fn new(account_login: String, process_id: u32, process_start: Option<u64>) -> Self {
        Self {
            account_login,
            process_id,
            started_at: Utc::now(),
            process_start,
            state: SessionState::Running,
        }
    }

    /// Whether an observed start time still identifies this session's process.
    ///
    /// Without a recorded or observed start time the pid alone is trusted.
    #[must_use]
    pub fn matches_start(&self, observed: Option<u64>) -> bool {
        match (self.process_start, observed) {
            (Some(recorded), Some(seen)) => recorded == seen,
            _ => true,
        }
    }
}

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The process no longer exists.
    Exited,
    /// The pid now belongs to a different process.
    Replaced,
    /// Process state could not be queried for too many consecutive polls.
    Unobservable,
    /// Exit confirmed right after an explicit close.
    Closed,
}

/// Notification emitted once per detected client exit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExitNotice {
    /// Login whose client exited.
    pub login: String,
    /// Pid of the exited process.
    pub process_id: u32,
    /// When the exit was detected.
    pub detected_at: DateTime<Utc>,
    /// How the exit was detected.
    pub reason: ExitReason,
}
