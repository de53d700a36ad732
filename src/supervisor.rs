//! Liveness supervisor for the background worker.
use std::{
    fs::File,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::SystemTime,
};

use fs2::FileExt;
use serde::Serialize;
use strum_macros::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::{
    config::{StaleWhileRunning, StrategyKind, SupervisorSettings},
    error::SupervisorError,
    heartbeat::{HeartbeatStatus, HeartbeatStore},
    logs::open_append,
    probe::{ProcessProbe, SysinfoProbe, WorkerIdentity},
    service_manager::{ServiceManagerClient, SystemctlClient},
    strategy::{ChainReport, RestartStrategyChain, StrategyContext},
};

/// Worker health, derived fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SupervisorState {
    Running,
    NotRunning,
    /// Process present, heartbeat missing or older than the configured maximum.
    RunningStale,
    /// The probe itself failed.
    Unknown,
}

/// Result of [`Supervisor::ensure_running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The worker was already up; nothing was done.
    AlreadyRunning {
        /// Whether the heartbeat looked stale.
        stale: bool,
    },
    /// The worker was absent and `strategy` brought it back.
    Restarted {
        strategy: StrategyKind,
        report: ChainReport,
    },
    /// The worker was absent and no strategy could bring it back.
    StrategyExhausted { report: ChainReport },
}

impl EnsureOutcome {
    /// State of the worker once the call finished.
    pub fn state(&self) -> SupervisorState {
        match self {
            EnsureOutcome::AlreadyRunning { .. } | EnsureOutcome::Restarted { .. } => {
                SupervisorState::Running
            }
            EnsureOutcome::StrategyExhausted { .. } => SupervisorState::NotRunning,
        }
    }

    /// The strategy that brought the worker up, if one was needed and succeeded.
    pub fn strategy(&self) -> Option<StrategyKind> {
        match self {
            EnsureOutcome::Restarted { strategy, .. } => Some(*strategy),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running
    }
}

/// Observes the worker and restarts it when it is gone.
///
/// The supervisor owns no process and no loop: callers invoke
/// [`Supervisor::is_healthy`] or [`Supervisor::ensure_running`] whenever they
/// want an answer. Concurrent `ensure_running` calls block on each other; a
/// waiting call re-evaluates from scratch once it gets its turn, so it sees a
/// worker the previous call started instead of launching another one.
pub struct Supervisor {
    settings: SupervisorSettings,
    identity: WorkerIdentity,
    probe: Arc<dyn ProcessProbe>,
    heartbeat: HeartbeatStore,
    chain: RestartStrategyChain,
    in_flight: Mutex<()>,
}

impl Supervisor {
    /// Builds a supervisor with the configured built-in restart chain.
    pub fn new(
        settings: SupervisorSettings,
        probe: Arc<dyn ProcessProbe>,
        service_manager: Arc<dyn ServiceManagerClient>,
    ) -> Result<Self, SupervisorError> {
        let chain = RestartStrategyChain::from_settings(&settings.strategies, service_manager);
        Self::with_chain(settings, probe, chain)
    }

    /// Builds a supervisor around an explicit restart chain.
    pub fn with_chain(
        settings: SupervisorSettings,
        probe: Arc<dyn ProcessProbe>,
        chain: RestartStrategyChain,
    ) -> Result<Self, SupervisorError> {
        let identity = WorkerIdentity::new(&settings.worker_pattern)?;
        let heartbeat = HeartbeatStore::new(&settings.heartbeat_path, &settings.pid_path);
        debug!(
            "Supervising '{}' with strategies {:?}",
            identity.as_str(),
            chain.kinds()
        );

        Ok(Self {
            settings,
            identity,
            probe,
            heartbeat,
            chain,
            in_flight: Mutex::new(()),
        })
    }

    /// Supervisor backed by the OS process table and `systemctl --user`.
    pub fn from_settings(settings: SupervisorSettings) -> Result<Self, SupervisorError> {
        let service_manager = Arc::new(SystemctlClient::new(&settings.unit_dir));
        Self::new(settings, Arc::new(SysinfoProbe::new()), service_manager)
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn heartbeat(&self) -> &HeartbeatStore {
        &self.heartbeat
    }

    /// Current heartbeat classification against the configured maximum age.
    pub fn heartbeat_status(&self) -> HeartbeatStatus {
        self.heartbeat
            .status(SystemTime::now(), self.settings.max_heartbeat_age)
    }

    /// Reports worker health without cleaning up or restarting anything.
    pub fn is_healthy(&self) -> SupervisorState {
        match self.probe.probe(&self.identity) {
            Ok(true) => self.running_state(),
            Ok(false) => {
                debug!("Worker '{}' not running", self.identity.as_str());
                SupervisorState::NotRunning
            }
            Err(err) => {
                warn!("Unable to determine worker health: {err}");
                SupervisorState::Unknown
            }
        }
    }

    /// Makes sure the worker is running, restarting it if it is absent.
    ///
    /// A worker that is present is never touched, however stale its heartbeat
    /// (unless `on_stale_while_running` is `force_restart`). Only environment
    /// faults are returned as errors, including a process table that cannot
    /// be read; an exhausted restart chain is an ordinary outcome.
    pub fn ensure_running(&self) -> Result<EnsureOutcome, SupervisorError> {
        let _guard = self.lock_in_flight();
        let _file_lock = match &self.settings.lock_path {
            Some(path) => Some(acquire_lock_file(path)?),
            None => None,
        };

        if self.probe.probe(&self.identity)? {
            let status = self.heartbeat_status();
            let stale = status.is_stale();
            log_running(&status);

            if !(stale && self.settings.on_stale_while_running == StaleWhileRunning::ForceRestart)
            {
                return Ok(EnsureOutcome::AlreadyRunning { stale });
            }

            if !self.terminate_stale_worker()? {
                return Ok(EnsureOutcome::AlreadyRunning { stale });
            }
        } else {
            info!("Worker '{}' not running; restarting", self.identity.as_str());
        }

        self.heartbeat.clear()?;
        thread::sleep(self.settings.settle_interval);

        let report = self
            .chain
            .run(&self.strategy_context(), self.probe.as_ref(), &self.identity)?;

        Ok(match report.succeeded() {
            Some(strategy) => EnsureOutcome::Restarted { strategy, report },
            None => EnsureOutcome::StrategyExhausted { report },
        })
    }

    fn running_state(&self) -> SupervisorState {
        let status = self.heartbeat_status();
        log_running(&status);
        if status.is_stale() {
            SupervisorState::RunningStale
        } else {
            SupervisorState::Running
        }
    }

    /// Signals a stale worker and reports whether it is gone after the settle interval.
    fn terminate_stale_worker(&self) -> Result<bool, SupervisorError> {
        warn!(
            "Force-restarting stale worker '{}' (on_stale_while_running: {})",
            self.identity.as_str(),
            self.settings.on_stale_while_running
        );
        self.probe.terminate(&self.identity)?;
        thread::sleep(self.settings.settle_interval);

        if self.probe.probe(&self.identity)? {
            warn!("Stale worker still running after SIGTERM; leaving it in place");
            return Ok(false);
        }
        Ok(true)
    }

    fn strategy_context(&self) -> StrategyContext {
        let install_dir = self.settings.discover_install_dir();
        if install_dir.is_none() {
            debug!(
                "No installation directory found among {:?}",
                self.settings.install_dirs
            );
        }

        StrategyContext {
            install_dir,
            interpreter: self.settings.interpreter.clone(),
            worker_executable: self.settings.worker_executable.clone(),
            bootstrap_script: self.settings.bootstrap_script.clone(),
            unit_name: self.settings.unit_name.clone(),
            log_path: self.settings.log_path.clone(),
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, ()> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn log_running(status: &HeartbeatStatus) {
    match status {
        HeartbeatStatus::Fresh(record) => {
            debug!("Worker healthy, heartbeat age: {:?}", record.age)
        }
        HeartbeatStatus::Stale(record) => {
            warn!("Worker running but heartbeat stale: {:?} old", record.age)
        }
        HeartbeatStatus::Missing => warn!("Worker running but heartbeat marker missing"),
    }
}

/// Takes the cross-process lock; it is released when the file is dropped.
fn acquire_lock_file(path: &Path) -> Result<File, SupervisorError> {
    let file = open_append(path)
        .map_err(|err| SupervisorError::environment("opening supervisor lock file", err))?;
    file.lock_exclusive()
        .map_err(|err| SupervisorError::environment("locking supervisor lock file", err))?;
    Ok(file)
}
