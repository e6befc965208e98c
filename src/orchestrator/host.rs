//! OS process host: spawn, probe and terminate client processes.
//!
//! [`ProcessHost`] is the seam between the orchestration logic and the
//! operating system. Every method may block, so callers run them through
//! `tokio::task::spawn_blocking`. [`SystemHost`] is the real implementation:
//! `tokio::process` for spawning detached clients, `sysinfo` for liveness
//! and start times, and `nix` signals on Unix.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};
use tokio::process::Command;
use tracing::debug;

use crate::{AppError, Result};

/// Fully resolved client invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Absolute path of the client executable.
    pub program: PathBuf,
    /// Arguments in order.
    pub args: Vec<String>,
    /// Working directory (the game folder).
    pub working_dir: PathBuf,
}

/// Identity of a freshly spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    /// OS process identifier.
    pub pid: u32,
    /// OS start time in seconds since the epoch, when observable.
    pub start_time: Option<u64>,
}

/// Result of asking the OS about a pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// A process with this pid exists.
    Alive {
        /// Its start time, when observable.
        start_time: Option<u64>,
    },
    /// No live process has this pid.
    Gone,
    /// The query failed; state unknown.
    Unknown(String),
}

/// How hard to ask a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Polite request (SIGTERM or equivalent).
    Graceful,
    /// Immediate kill.
    Forced,
}

/// Blocking process operations used by the launcher and the monitor.
pub trait ProcessHost: Send + Sync {
    /// Start `command` detached from the engine's own lifetime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SpawnFailed` if the OS refuses to create it.
    fn spawn(&self, command: &LaunchCommand) -> Result<SpawnedProcess>;

    /// Report whether `pid` is alive.
    fn probe(&self, pid: u32) -> Probe;

    /// Request termination of `pid`. A pid that no longer exists is success.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TerminationFailed` if the OS denies the request.
    fn terminate(&self, pid: u32, mode: Termination) -> Result<()>;
}

/// [`ProcessHost`] backed by the local operating system.
#[derive(Debug)]
pub struct SystemHost {
    system: Mutex<System>,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHost {
    /// Create a host with an empty process table cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    #[cfg(unix)]
    #[allow(clippy::unused_self)]
    fn send_termination(&self, pid: u32, mode: Termination) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};

        let target = nix_pid(pid)
            .ok_or_else(|| AppError::TerminationFailed(format!("pid {pid} out of range")))?;
        let signal = match mode {
            Termination::Graceful => Signal::SIGTERM,
            Termination::Forced => Signal::SIGKILL,
        };

        match kill(target, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(AppError::TerminationFailed(format!(
                "pid {pid} refused {}: {err}",
                signal.as_str()
            ))),
        }
    }

    #[cfg(not(unix))]
    fn send_termination(&self, pid: u32, mode: Termination) -> Result<()> {
        let target = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process_specifics(target, ProcessRefreshKind::new()) {
            return Ok(());
        }
        let Some(process) = system.process(target) else {
            return Ok(());
        };

        let sent = match mode {
            Termination::Graceful => process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill()),
            Termination::Forced => process.kill(),
        };
        if sent {
            Ok(())
        } else {
            Err(AppError::TerminationFailed(format!(
                "pid {pid} could not be terminated"
            )))
        }
    }
}

impl ProcessHost for SystemHost {
    fn spawn(&self, command: &LaunchCommand) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        detach(&mut cmd);

        let child = cmd.spawn().map_err(|err| {
            AppError::SpawnFailed(format!("{}: {err}", command.program.display()))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::SpawnFailed("client exited before its pid was read".into()))?;
        // The handle is released here; the runtime reaps the child once it
        // exits, and the client keeps running after the engine stops.
        drop(child);

        let start_time = match self.probe(pid) {
            Probe::Alive { start_time } => start_time,
            Probe::Gone | Probe::Unknown(_) => None,
        };
        debug!(pid, ?start_time, program = %command.program.display(), "client spawned");
        Ok(SpawnedProcess { pid, start_time })
    }

    fn probe(&self, pid: u32) -> Probe {
        let target = Pid::from_u32(pid);
        {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            if system.refresh_process_specifics(target, ProcessRefreshKind::new()) {
                if let Some(process) = system.process(target) {
                    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                        return Probe::Gone;
                    }
                    return Probe::Alive {
                        start_time: Some(process.start_time()),
                    };
                }
            }
        }
        confirm_absent(pid)
    }

    fn terminate(&self, pid: u32, mode: Termination) -> Result<()> {
        self.send_termination(pid, mode)
    }
}

#[cfg(unix)]
fn nix_pid(pid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pid).ok().map(nix::unistd::Pid::from_raw)
}

/// Cross-check a pid the process table did not list.
#[cfg(unix)]
fn confirm_absent(pid: u32) -> Probe {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let Some(target) = nix_pid(pid) else {
        return Probe::Gone;
    };
    match kill(target, None) {
        Err(Errno::ESRCH) => Probe::Gone,
        Ok(()) | Err(Errno::EPERM) => {
            Probe::Unknown(format!("pid {pid} exists but could not be inspected"))
        }
        Err(err) => Probe::Unknown(format!("pid {pid} query failed: {err}")),
    }
}

#[cfg(not(unix))]
fn confirm_absent(_pid: u32) -> Probe {
    Probe::Gone
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    // Own process group: terminal signals aimed at the engine skip the client.
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}
