//! Process monitor: detects client exits.
//!
//! Periodically reconciles the registry against the OS: every tracked pid
//! is probed, and sessions whose process is gone (or whose pid now belongs
//! to a different process) are retired, which emits one exit notice per
//! session. A failed probe only clears a session after
//! `failure_threshold` consecutive failures.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::MonitorConfig;
use crate::models::session::{ExitReason, Session};
use crate::orchestrator::host::{Probe, ProcessHost};
use crate::orchestrator::registry::SessionRegistry;

/// Reconciliation loop state.
pub struct Monitor {
    registry: SessionRegistry,
    host: Arc<dyn ProcessHost>,
    config: MonitorConfig,
    /// Consecutive probe failures keyed by (login, pid).
    failures: HashMap<(String, u32), u32>,
}

impl Monitor {
    /// Create a monitor over `registry`.
    #[must_use]
    pub fn new(registry: SessionRegistry, host: Arc<dyn ProcessHost>, config: MonitorConfig) -> Self {
        Self {
            registry,
            host,
            config,
            failures: HashMap::new(),
        }
    }

    /// Run one reconciliation pass. Returns the number of sessions retired.
    pub async fn reconcile(&mut self) -> usize {
        let sessions = self.registry.list_running();
        if sessions.is_empty() {
            self.failures.clear();
            return 0;
        }

        let host = Arc::clone(&self.host);
        let pids: Vec<u32> = sessions.iter().map(|s| s.process_id).collect();
        let probes = tokio::task::spawn_blocking(move || {
            pids.into_iter().map(|pid| host.probe(pid)).collect::<Vec<_>>()
        })
        .await
        .unwrap_or_else(|err| {
            warn!(%err, "probe task failed");
            vec![Probe::Unknown(format!("probe task failed: {err}")); sessions.len()]
        });

        let mut retired = 0;
        for (session, probe) in sessions.iter().zip(probes) {
            if let Some(reason) = self.assess(session, probe) {
                if self
                    .registry
                    .retire(&session.account_login, session.process_id, reason)
                {
                    retired += 1;
                }
            }
        }

        let live: HashSet<(&str, u32)> = sessions
            .iter()
            .map(|s| (s.account_login.as_str(), s.process_id))
            .collect();
        self.failures
            .retain(|(login, pid), _| live.contains(&(login.as_str(), *pid)));

        if retired > 0 {
            debug!(retired, tracked = sessions.len() - retired, "reconciliation pass complete");
        }
        retired
    }

    /// Decide whether a probed session should leave the registry.
    fn assess(&mut self, session: &Session, probe: Probe) -> Option<ExitReason> {
        let key = (session.account_login.clone(), session.process_id);
        match probe {
            Probe::Gone => {
                self.failures.remove(&key);
                Some(ExitReason::Exited)
            }
            Probe::Alive { start_time } if !session.matches_start(start_time) => {
                self.failures.remove(&key);
                Some(ExitReason::Replaced)
            }
            Probe::Alive { .. } => {
                self.failures.remove(&key);
                None
            }
            Probe::Unknown(reason) => {
                let count = self.failures.entry(key.clone()).or_insert(0);
                *count += 1;
                warn!(
                    login = %session.account_login,
                    pid = session.process_id,
                    failures = *count,
                    threshold = self.config.failure_threshold,
                    %reason,
                    "process state query failed"
                );
                if *count >= self.config.failure_threshold {
                    self.failures.remove(&key);
                    Some(ExitReason::Unobservable)
                } else {
                    None
                }
            }
        }
    }

    /// Spawn the reconciliation loop.
    ///
    /// Runs a pass every `poll_interval` until `cancel` fires.
    #[must_use]
    pub fn spawn(mut self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let interval = self.config.poll_interval();
        tokio::spawn(
            async move {
                info!(interval_ms = interval.as_millis(), "process monitor started");
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("process monitor shutting down");
                            break;
                        }
                        () = tokio::time::sleep(interval) => {}
                    }

                    self.reconcile().await;
                }
            }
            .instrument(info_span!("process_monitor")),
        )
    }
}
