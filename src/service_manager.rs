//! User-level service manager control.
use std::{
    env, io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    error::{SupervisorError, is_resource_exhaustion},
    launch::wait_with_timeout,
    strategy::ExitInfo,
};

/// Variable `systemctl --user` needs to reach the user manager.
const SESSION_BUS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Starts and queries named user-level service units.
pub trait ServiceManagerClient: Send + Sync {
    /// Returns `true` if a definition for `unit` is installed.
    fn unit_exists(&self, unit: &str) -> bool;

    /// Asks the manager to start `unit`, waiting at most `timeout` for the request.
    fn start(&self, unit: &str, timeout: Duration) -> Result<ExitInfo, SupervisorError>;

    /// Makes the manager re-read unit definitions.
    fn reload(&self, timeout: Duration) -> Result<ExitInfo, SupervisorError>;
}

/// [`ServiceManagerClient`] driving `systemctl --user`.
#[derive(Debug, Clone)]
pub struct SystemctlClient {
    unit_dir: PathBuf,
    program: PathBuf,
}

impl SystemctlClient {
    /// Client looking for unit files in `unit_dir`.
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            program: PathBuf::from("systemctl"),
        }
    }

    /// Overrides the `systemctl` binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<ExitInfo, SupervisorError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--user")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if env::var_os(SESSION_BUS_ENV).is_none() {
            cmd.env(SESSION_BUS_ENV, session_bus_address());
        }

        debug!("Executing command: {cmd:?}");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if is_resource_exhaustion(&err) => {
                return Err(SupervisorError::environment(
                    format!("spawning {}", self.program.display()),
                    err,
                ));
            }
            Err(err) => {
                warn!("Unable to run {}: {err}", self.program.display());
                return Ok(ExitInfo::SpawnFailed(err.to_string()));
            }
        };

        match wait_with_timeout(&mut child, timeout) {
            Ok(Some(status)) => Ok(ExitInfo::from(status)),
            Ok(None) => {
                warn!(
                    "`{} --user {}` did not finish within {:?}",
                    self.program.display(),
                    args.join(" "),
                    timeout
                );
                let _ = child.kill();
                let _ = child.wait();
                Ok(ExitInfo::TimedOut)
            }
            Err(err) => Err(wait_fault(&self.program, err)),
        }
    }
}

impl ServiceManagerClient for SystemctlClient {
    fn unit_exists(&self, unit: &str) -> bool {
        self.unit_dir.join(unit).is_file()
    }

    fn start(&self, unit: &str, timeout: Duration) -> Result<ExitInfo, SupervisorError> {
        self.run(&["start", unit], timeout)
    }

    fn reload(&self, timeout: Duration) -> Result<ExitInfo, SupervisorError> {
        self.run(&["daemon-reload"], timeout)
    }
}

fn wait_fault(program: &Path, err: io::Error) -> SupervisorError {
    SupervisorError::environment(format!("waiting on {}", program.display()), err)
}

/// Session bus address of the current user's manager.
pub fn session_bus_address() -> String {
    let uid = nix::unistd::getuid();
    format!("unix:path=/run/user/{uid}/bus")
}
