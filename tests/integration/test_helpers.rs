//! Shared test helpers for orchestration integration tests.
//!
//! Provides an in-memory `ProcessHost` whose processes can be made to exit,
//! be replaced, or become unobservable on demand, plus construction of
//! launchers over it and scratch game directories.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pw_session_engine::models::account::Account;
use pw_session_engine::orchestrator::host::{
    LaunchCommand, Probe, ProcessHost, SpawnedProcess, Termination,
};
use pw_session_engine::orchestrator::launcher::{LaunchSettings, Launcher};
use pw_session_engine::orchestrator::registry::SessionRegistry;
use pw_session_engine::{AppError, Result};
use tempfile::TempDir;

pub const CLIENT: &str = "elementclient.exe";

/// How fake processes react to termination requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Exits on the first request.
    Obedient,
    /// Exits only when forced.
    IgnoresGraceful,
    /// Never exits.
    Unkillable,
    /// The OS refuses every termination request.
    Denies,
}

#[derive(Debug)]
struct FakeProcess {
    args: Vec<String>,
    start_time: u64,
    alive: bool,
    unobservable: bool,
}

/// In-memory process table.
#[derive(Debug)]
pub struct FakeHost {
    next_pid: AtomicU32,
    processes: Mutex<HashMap<u32, FakeProcess>>,
    terminations: Mutex<Vec<(u32, Termination)>>,
    behaviour: Mutex<Behaviour>,
    spawn_delay: Duration,
    fail_spawns: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Self::with_spawn_delay(Duration::ZERO)
    }

    /// Host whose spawns block for `delay`, widening race windows.
    pub fn with_spawn_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            processes: Mutex::new(HashMap::new()),
            terminations: Mutex::new(Vec::new()),
            behaviour: Mutex::new(Behaviour::Obedient),
            spawn_delay: delay,
            fail_spawns: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self, pid: u32) {
        if let Some(p) = self.processes.lock().unwrap().get_mut(&pid) {
            p.alive = false;
        }
    }

    /// Simulate the pid being reused by an unrelated process.
    pub fn replace(&self, pid: u32) {
        if let Some(p) = self.processes.lock().unwrap().get_mut(&pid) {
            p.start_time += 1_000;
        }
    }

    /// Make probes of `pid` fail (or succeed again).
    pub fn set_unobservable(&self, pid: u32, unobservable: bool) {
        if let Some(p) = self.processes.lock().unwrap().get_mut(&pid) {
            p.unobservable = unobservable;
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn args_of(&self, pid: u32) -> Vec<String> {
        self.processes
            .lock()
            .unwrap()
            .get(&pid)
            .map(|p| p.args.clone())
            .unwrap_or_default()
    }

    pub fn terminations(&self) -> Vec<(u32, Termination)> {
        self.terminations.lock().unwrap().clone()
    }

    /// Most spawns ever observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl ProcessHost for FakeHost {
    fn spawn(&self, command: &LaunchCommand) -> Result<SpawnedProcess> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.spawn_delay.is_zero() {
            std::thread::sleep(self.spawn_delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(AppError::SpawnFailed("access denied".into()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let start_time = u64::from(pid) * 10;
        self.processes.lock().unwrap().insert(
            pid,
            FakeProcess {
                args: command.args.clone(),
                start_time,
                alive: true,
                unobservable: false,
            },
        );
        Ok(SpawnedProcess {
            pid,
            start_time: Some(start_time),
        })
    }

    fn probe(&self, pid: u32) -> Probe {
        match self.processes.lock().unwrap().get(&pid) {
            Some(p) if p.unobservable => Probe::Unknown(format!("pid {pid} not observable")),
            Some(p) if p.alive => Probe::Alive {
                start_time: Some(p.start_time),
            },
            _ => Probe::Gone,
        }
    }

    fn terminate(&self, pid: u32, mode: Termination) -> Result<()> {
        self.terminations.lock().unwrap().push((pid, mode));
        let behaviour = *self.behaviour.lock().unwrap();
        if behaviour == Behaviour::Denies {
            return Err(AppError::TerminationFailed(format!(
                "pid {pid}: operation not permitted"
            )));
        }
        if let Some(p) = self.processes.lock().unwrap().get_mut(&pid) {
            match (behaviour, mode) {
                (Behaviour::Obedient, _) | (Behaviour::IgnoresGraceful, Termination::Forced) => {
                    p.alive = false;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Launcher settings with short close timings for tests.
pub fn fast_settings() -> LaunchSettings {
    LaunchSettings {
        client_executable: CLIENT.into(),
        close_grace: Duration::from_millis(100),
        close_poll: Duration::from_millis(5),
    }
}

/// Launcher over a fresh registry and the given fake host.
pub fn launcher(host: &Arc<FakeHost>) -> Launcher {
    let host: Arc<dyn ProcessHost> = Arc::clone(host) as Arc<dyn ProcessHost>;
    Launcher::new(SessionRegistry::new(), host, fast_settings())
}

/// Scratch game directory containing the client executable.
pub fn game_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join(CLIENT), b"").expect("write client");
    dir
}

pub fn account(login: &str) -> Account {
    Account::new(login, "secret")
}
