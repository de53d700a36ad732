//! Spawning processes that outlive the supervisor.
use std::{
    ffi::OsString,
    io,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{constants::PROCESS_CHECK_INTERVAL, logs::open_append};

/// A command launched in its own session with output appended to a log file.
///
/// The launched process has no lifetime coupling to the supervisor: it is not
/// killed when the supervisor exits and its exit is never reported back.
#[derive(Debug, Clone)]
pub struct DetachedCommand {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    log_path: PathBuf,
}

impl DetachedCommand {
    pub fn new(program: impl Into<OsString>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            log_path: log_path.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Spawns the command. The caller decides whether to wait on it or
    /// [`release`] it.
    pub fn spawn(&self) -> io::Result<Child> {
        let log = open_append(&self.log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        // New session: no controlling terminal and no signals from our process group.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Spawning detached command: {cmd:?}");
        let child = cmd.spawn()?;
        debug!("Detached command started with PID {}", child.id());
        Ok(child)
    }
}

/// Wait for a child process with a timeout, returning `Ok(None)` on timeout.
///
/// A timeout too large to represent as an `Instant` waits indefinitely.
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now().checked_add(timeout);

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Ok(None);
                }
                thread::sleep(PROCESS_CHECK_INTERVAL);
            }
        }
    }
}

/// Stops tracking `child` while still reaping it once it exits, so a
/// long-lived host does not accumulate zombies.
pub fn release(mut child: Child) {
    let pid = child.id();
    let spawned = thread::Builder::new()
        .name(format!("reap-{pid}"))
        .spawn(move || {
            if let Err(err) = child.wait() {
                debug!("Failed to reap released PID {pid}: {err}");
            }
        });

    if let Err(err) = spawned {
        warn!("Unable to spawn reaper for PID {pid}: {err}");
    }
}
