//! Process table probing.
use std::io;

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use regex::Regex;
use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info, warn};

use crate::error::SupervisorError;

/// Recognises the worker among all OS processes.
///
/// The pattern is matched against the space-joined command line of every
/// process, the same way `pgrep -f` does.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    pattern: Regex,
}

impl WorkerIdentity {
    pub fn new(pattern: &str) -> Result<Self, SupervisorError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Returns `true` if `command_line` belongs to the worker.
    pub fn matches(&self, command_line: &str) -> bool {
        self.pattern.is_match(command_line)
    }
}

/// Answers "is the worker alive right now?".
pub trait ProcessProbe: Send + Sync {
    /// Scans for the worker. An `Err` means the scan itself could not be performed.
    fn probe(&self, identity: &WorkerIdentity) -> Result<bool, SupervisorError>;

    /// Sends `SIGTERM` to every matching process and returns how many were signalled.
    ///
    /// Only the opt-in force-restart policy calls this.
    fn terminate(&self, identity: &WorkerIdentity) -> Result<usize, SupervisorError>;

    /// Like [`ProcessProbe::probe`], but a failed scan reads as "not running".
    fn is_running(&self, identity: &WorkerIdentity) -> bool {
        match self.probe(identity) {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    "Process probe for '{}' failed, assuming not running: {err}",
                    identity.as_str()
                );
                false
            }
        }
    }
}

/// [`ProcessProbe`] backed by the `sysinfo` process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    pub fn new() -> Self {
        Self
    }

    /// Returns the pids of every process matching `identity`, excluding this one.
    pub fn matching_pids(
        &self,
        identity: &WorkerIdentity,
    ) -> Result<Vec<u32>, SupervisorError> {
        let mut system = System::new();
        let refreshed = system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        // A live system always has at least this process in its table.
        if refreshed == 0 || system.processes().is_empty() {
            return Err(SupervisorError::environment(
                "enumerating processes",
                io::Error::new(io::ErrorKind::NotFound, "process table is empty"),
            ));
        }

        let own_pid = std::process::id();
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != own_pid
                    && process.thread_kind().is_none()
                    && identity.matches(&command_line(process))
            })
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();

        debug!(
            "Probe for '{}' matched {} process(es): {:?}",
            identity.as_str(),
            pids.len(),
            pids
        );
        Ok(pids)
    }
}

impl ProcessProbe for SysinfoProbe {
    fn probe(&self, identity: &WorkerIdentity) -> Result<bool, SupervisorError> {
        Ok(!self.matching_pids(identity)?.is_empty())
    }

    fn terminate(&self, identity: &WorkerIdentity) -> Result<usize, SupervisorError> {
        let mut signalled = 0;
        for pid in self.matching_pids(identity)? {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to stale worker PID {pid}");
                    signalled += 1;
                }
                Err(Errno::ESRCH) => debug!("Worker PID {pid} exited before SIGTERM"),
                Err(err) => warn!("Failed to signal worker PID {pid}: {err}"),
            }
        }
        Ok(signalled)
    }
}

/// Joins a process command line, falling back to its name when the command
/// line is unreadable (kernel threads, other users' processes on hardened systems).
fn command_line(process: &Process) -> String {
    let cmd = process.cmd();
    if cmd.is_empty() {
        return process.name().to_string_lossy().into_owned();
    }

    cmd.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
