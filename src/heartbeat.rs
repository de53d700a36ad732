//! Heartbeat and pid marker files written by the worker.
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tracing::{debug, warn};

use crate::error::SupervisorError;

/// The last observed heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRecord {
    /// Modification time of the heartbeat marker.
    pub timestamp: SystemTime,
    /// `now - timestamp`, zero when the marker is dated in the future.
    pub age: Duration,
}

impl HeartbeatRecord {
    pub fn observed_at(timestamp: SystemTime, now: SystemTime) -> Self {
        Self {
            timestamp,
            age: now.duration_since(timestamp).unwrap_or(Duration::ZERO),
        }
    }
}

/// Heartbeat classification. A missing marker is reported apart from a stale one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Missing,
    Fresh(HeartbeatRecord),
    Stale(HeartbeatRecord),
}

impl HeartbeatStatus {
    /// Both a missing and an outdated marker count as stale.
    pub fn is_stale(&self) -> bool {
        !matches!(self, HeartbeatStatus::Fresh(_))
    }

    pub fn record(&self) -> Option<HeartbeatRecord> {
        match self {
            HeartbeatStatus::Missing => None,
            HeartbeatStatus::Fresh(record) | HeartbeatStatus::Stale(record) => Some(*record),
        }
    }
}

/// Reads and clears the heartbeat marker and its companion pid marker.
///
/// The marker's content is never parsed; only its modification time matters.
#[derive(Debug, Clone)]
pub struct HeartbeatStore {
    heartbeat_path: PathBuf,
    pid_path: PathBuf,
}

impl HeartbeatStore {
    pub fn new(heartbeat_path: impl Into<PathBuf>, pid_path: impl Into<PathBuf>) -> Self {
        Self {
            heartbeat_path: heartbeat_path.into(),
            pid_path: pid_path.into(),
        }
    }

    pub fn heartbeat_path(&self) -> &Path {
        &self.heartbeat_path
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Modification time of the heartbeat marker, or `None` if it does not exist.
    pub fn last_beat(&self) -> Option<SystemTime> {
        match fs::metadata(&self.heartbeat_path).and_then(|meta| meta.modified()) {
            Ok(modified) => Some(modified),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    "Unable to read heartbeat marker {:?}: {err}",
                    self.heartbeat_path
                );
                None
            }
        }
    }

    /// Classifies the heartbeat at `now`. An age equal to `max_age` is still fresh.
    pub fn status(&self, now: SystemTime, max_age: Duration) -> HeartbeatStatus {
        match self.last_beat() {
            None => HeartbeatStatus::Missing,
            Some(timestamp) => {
                let record = HeartbeatRecord::observed_at(timestamp, now);
                if record.age > max_age {
                    HeartbeatStatus::Stale(record)
                } else {
                    HeartbeatStatus::Fresh(record)
                }
            }
        }
    }

    /// `true` if there is no heartbeat or it is older than `max_age`.
    pub fn is_stale(&self, now: SystemTime, max_age: Duration) -> bool {
        self.status(now, max_age).is_stale()
    }

    /// Removes both markers. Absent markers are not an error.
    pub fn clear(&self) -> Result<(), SupervisorError> {
        remove_marker(&self.heartbeat_path)?;
        remove_marker(&self.pid_path)
    }

    /// Pid recorded by the worker, if the pid marker exists and parses.
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.pid_path)
            .ok()
            .and_then(|contents| contents.trim().parse().ok())
    }

    /// Refreshes the heartbeat marker. Used by workers that link this crate.
    pub fn touch(&self) -> io::Result<()> {
        if let Some(parent) = self.heartbeat_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(
            &self.heartbeat_path,
            chrono::Utc::now().to_rfc3339().as_bytes(),
        )
    }
}

fn remove_marker(path: &Path) -> Result<(), SupervisorError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale marker {:?}", path);
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SupervisorError::environment(
            format!("removing marker {}", path.display()),
            err,
        )),
    }
}
