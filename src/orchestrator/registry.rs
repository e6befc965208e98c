//! Process session registry.
//!
//! The single source of truth for "is this account running". Holds at
//! most one entry per login: either a [`Reservation`] for a launch that is
//! still spawning, or the live [`Session`]. All access goes through one
//! mutex that is never held across an `.await` or an OS call, so every
//! operation on a login is linearizable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::models::session::{ExitNotice, ExitReason, Session, SessionState};
use crate::{AppError, Result};

/// Buffered exit notices per subscriber before a slow reader lags.
const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug)]
enum Slot {
    Reserved,
    Live(Session),
}

#[derive(Debug)]
struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    exits: broadcast::Sender<ExitNotice>,
}

/// Shared login → session table. Cloning yields another handle to the
/// same table.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty registry with a custom exit-notice buffer.
    #[must_use]
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (exits, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                exits,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a live session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyRunning` if the login already has a live
    /// session or a launch in flight.
    pub fn put(&self, session: Session) -> Result<()> {
        let mut slots = self.slots();
        if slots.contains_key(&session.account_login) {
            return Err(AppError::AlreadyRunning(session.account_login));
        }
        debug!(login = %session.account_login, pid = session.process_id, "session registered");
        slots.insert(session.account_login.clone(), Slot::Live(session));
        Ok(())
    }

    /// Claim `login` for a launch that is about to spawn.
    ///
    /// The check and the claim happen under one lock acquisition, so of
    /// several concurrent callers for the same login exactly one succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyRunning` if the login is live or claimed.
    pub fn reserve(&self, login: &str) -> Result<Reservation> {
        let mut slots = self.slots();
        if slots.contains_key(login) {
            return Err(AppError::AlreadyRunning(login.to_owned()));
        }
        slots.insert(login.to_owned(), Slot::Reserved);
        Ok(Reservation {
            registry: self.clone(),
            login: login.to_owned(),
            committed: false,
        })
    }

    /// Current live session for `login`.
    #[must_use]
    pub fn get(&self, login: &str) -> Option<Session> {
        match self.slots().get(login) {
            Some(Slot::Live(session)) => Some(session.clone()),
            _ => None,
        }
    }

    /// Whether `login` has a live session.
    #[must_use]
    pub fn is_running(&self, login: &str) -> bool {
        matches!(self.slots().get(login), Some(Slot::Live(_)))
    }

    /// Drop the live session for `login`. Absent entries are a no-op.
    ///
    /// In-flight reservations are left alone; they belong to their
    /// [`Reservation`] guard.
    pub fn remove(&self, login: &str) -> Option<Session> {
        let mut slots = self.slots();
        match slots.get(login) {
            Some(Slot::Live(_)) => match slots.remove(login) {
                Some(Slot::Live(session)) => Some(session),
                _ => None,
            },
            _ => None,
        }
    }

    /// Remove the session for `login` if it still refers to `process_id`
    /// and broadcast one [`ExitNotice`].
    ///
    /// Returns `false` when the entry is gone or belongs to a newer
    /// process, so racing observers of the same exit notify only once.
    pub fn retire(&self, login: &str, process_id: u32, reason: ExitReason) -> bool {
        {
            let mut slots = self.slots();
            match slots.get(login) {
                Some(Slot::Live(session)) if session.process_id == process_id => {
                    slots.remove(login);
                }
                _ => return false,
            }
        }

        let notice = ExitNotice {
            login: login.to_owned(),
            process_id,
            detected_at: Utc::now(),
            reason,
        };
        info!(login, pid = process_id, ?reason, "client exit recorded");
        // No subscribers is fine.
        let _ = self.inner.exits.send(notice);
        true
    }

    /// Snapshot of all live sessions, sorted by login.
    #[must_use]
    pub fn list_running(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .slots()
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(session) => Some(session.clone()),
                Slot::Reserved => None,
            })
            .collect();
        sessions.sort_by(|a, b| a.account_login.cmp(&b.account_login));
        sessions
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// Whether no live sessions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to exit notices emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExitNotice> {
        self.inner.exits.subscribe()
    }
}

/// Exclusive claim on a login while its client is being spawned.
///
/// Dropping an uncommitted reservation releases the login.
#[derive(Debug)]
pub struct Reservation {
    registry: SessionRegistry,
    login: String,
    committed: bool,
}

impl Reservation {
    /// Login this reservation holds.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Replace the claim with the live session.
    #[must_use]
    pub fn commit(mut self, mut session: Session) -> Session {
        session.account_login.clone_from(&self.login);
        session.state = SessionState::Running;
        self.registry
            .slots()
            .insert(self.login.clone(), Slot::Live(session.clone()));
        self.committed = true;
        debug!(login = %self.login, pid = session.process_id, "session registered");
        session
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.registry.slots();
        if matches!(slots.get(&self.login), Some(Slot::Reserved)) {
            slots.remove(&self.login);
        }
    }
}
