//! Restart strategies and the ordered chain that drives them.
use std::{
    fmt,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::ExitStatus,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    config::{StrategyKind, StrategySettings},
    constants::INSTALL_DIR_ENV,
    error::{SupervisorError, is_resource_exhaustion},
    launch::{DetachedCommand, release, wait_with_timeout},
    probe::{ProcessProbe, WorkerIdentity},
    service_manager::ServiceManagerClient,
};

/// How a single strategy execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitInfo {
    /// The invoked command exited with this code.
    Exited(i32),
    /// The invoked command was killed by this signal.
    Signaled(i32),
    /// A process was left running on its own with this PID.
    Detached(u32),
    /// The command did not finish within the strategy's timeout.
    TimedOut,
    /// The command could not be started at all.
    SpawnFailed(String),
}

impl ExitInfo {
    /// Exit code zero or a detached process count as a successful attempt.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitInfo::Exited(0) | ExitInfo::Detached(_))
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitInfo::Exited(code),
            (None, Some(signal)) => ExitInfo::Signaled(signal),
            (None, None) => ExitInfo::Exited(-1),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitInfo::Exited(code) => write!(f, "exited with code {code}"),
            ExitInfo::Signaled(signal) => write!(f, "killed by signal {signal}"),
            ExitInfo::Detached(pid) => write!(f, "detached as PID {pid}"),
            ExitInfo::TimedOut => write!(f, "timed out"),
            ExitInfo::SpawnFailed(reason) => write!(f, "failed to spawn: {reason}"),
        }
    }
}

/// Outcome of one strategy execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartAttemptResult {
    pub strategy: StrategyKind,
    /// The strategy's own verdict, before the confirming probe.
    pub succeeded: bool,
    pub exit_info: ExitInfo,
    /// Whether the post-attempt probe found the worker.
    pub confirmed: bool,
    /// Time spent in the attempt plus its settle time.
    pub waited: Duration,
}

impl RestartAttemptResult {
    pub fn new(strategy: StrategyKind, exit_info: ExitInfo, waited: Duration) -> Self {
        Self {
            strategy,
            succeeded: exit_info.is_success(),
            exit_info,
            confirmed: false,
            waited,
        }
    }
}

/// Everything a strategy needs to know about the worker for one restart.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// Discovered installation directory, if any candidate exists.
    pub install_dir: Option<PathBuf>,
    pub interpreter: String,
    /// Relative to `install_dir`.
    pub worker_executable: PathBuf,
    /// Relative to `install_dir`.
    pub bootstrap_script: PathBuf,
    pub unit_name: String,
    pub log_path: PathBuf,
}

impl StrategyContext {
    pub fn worker_path(&self) -> Option<PathBuf> {
        self.install_dir
            .as_ref()
            .map(|dir| dir.join(&self.worker_executable))
    }

    pub fn bootstrap_path(&self) -> Option<PathBuf> {
        self.install_dir
            .as_ref()
            .map(|dir| dir.join(&self.bootstrap_script))
    }

    fn interpreter_command(&self, target: PathBuf) -> DetachedCommand {
        let mut command = DetachedCommand::new(&self.interpreter, &self.log_path).arg(target);
        if let Some(dir) = &self.install_dir {
            command = command
                .current_dir(dir)
                .env(INSTALL_DIR_ENV, dir.as_os_str());
        }
        command
    }
}

/// One mechanism for bringing the worker up.
pub trait RestartStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn name(&self) -> &'static str {
        self.kind().into()
    }

    /// Whether this strategy can run at all; `false` skips it.
    fn precondition(&self, ctx: &StrategyContext) -> bool;

    /// Upper bound on [`RestartStrategy::attempt`].
    fn timeout(&self) -> Duration;

    /// Wait between a successful attempt and the confirming probe.
    fn settle_time(&self) -> Duration;

    /// Runs the strategy. Only environment faults are returned as `Err`.
    fn attempt(&self, ctx: &StrategyContext) -> Result<RestartAttemptResult, SupervisorError>;
}

/// Starts the worker's unit through the user service manager.
pub struct ServiceManagerStrategy {
    client: Arc<dyn ServiceManagerClient>,
    timeout: Duration,
    settle: Duration,
}

impl ServiceManagerStrategy {
    pub fn new(client: Arc<dyn ServiceManagerClient>, timeout: Duration, settle: Duration) -> Self {
        Self {
            client,
            timeout,
            settle,
        }
    }
}

impl RestartStrategy for ServiceManagerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ServiceManager
    }

    fn precondition(&self, ctx: &StrategyContext) -> bool {
        self.client.unit_exists(&ctx.unit_name)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn settle_time(&self) -> Duration {
        self.settle
    }

    fn attempt(&self, ctx: &StrategyContext) -> Result<RestartAttemptResult, SupervisorError> {
        let started = Instant::now();
        let exit_info = self.client.start(&ctx.unit_name, self.timeout)?;
        Ok(RestartAttemptResult::new(
            self.kind(),
            exit_info,
            started.elapsed(),
        ))
    }
}

/// Runs the one-time setup script, which installs the unit and may start the worker.
pub struct BootstrapStrategy {
    timeout: Duration,
    settle: Duration,
}

impl BootstrapStrategy {
    pub fn new(timeout: Duration, settle: Duration) -> Self {
        Self { timeout, settle }
    }
}

impl RestartStrategy for BootstrapStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bootstrap
    }

    fn precondition(&self, ctx: &StrategyContext) -> bool {
        ctx.bootstrap_path().is_some_and(|path| path.is_file())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn settle_time(&self) -> Duration {
        self.settle
    }

    fn attempt(&self, ctx: &StrategyContext) -> Result<RestartAttemptResult, SupervisorError> {
        let started = Instant::now();
        let Some(script) = ctx.bootstrap_path() else {
            return Ok(RestartAttemptResult::new(
                self.kind(),
                ExitInfo::SpawnFailed("no installation directory".into()),
                started.elapsed(),
            ));
        };

        let mut child = match spawn_or_fault(&ctx.interpreter_command(script))? {
            Ok(child) => child,
            Err(exit_info) => {
                return Ok(RestartAttemptResult::new(
                    self.kind(),
                    exit_info,
                    started.elapsed(),
                ));
            }
        };

        let exit_info = match wait_with_timeout(&mut child, self.timeout) {
            Ok(Some(status)) => ExitInfo::from(status),
            Ok(None) => {
                // The script may have turned into the worker; leave it running.
                warn!(
                    "Bootstrap (PID {}) still running after {:?}",
                    child.id(),
                    self.timeout
                );
                release(child);
                ExitInfo::TimedOut
            }
            Err(err) => {
                return Err(SupervisorError::environment("waiting on bootstrap", err));
            }
        };

        Ok(RestartAttemptResult::new(
            self.kind(),
            exit_info,
            started.elapsed(),
        ))
    }
}

/// Launches the worker executable directly in a new session.
///
/// The spawn itself does not block, so the timeout is trivially met; the
/// launched process is released immediately and never waited on.
pub struct DirectLaunchStrategy {
    timeout: Duration,
    settle: Duration,
}

impl DirectLaunchStrategy {
    pub fn new(timeout: Duration, settle: Duration) -> Self {
        Self { timeout, settle }
    }
}

impl RestartStrategy for DirectLaunchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectLaunch
    }

    fn precondition(&self, ctx: &StrategyContext) -> bool {
        ctx.worker_path().is_some_and(|path| path.is_file())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn settle_time(&self) -> Duration {
        self.settle
    }

    fn attempt(&self, ctx: &StrategyContext) -> Result<RestartAttemptResult, SupervisorError> {
        let started = Instant::now();
        let Some(worker) = ctx.worker_path() else {
            return Ok(RestartAttemptResult::new(
                self.kind(),
                ExitInfo::SpawnFailed("no installation directory".into()),
                started.elapsed(),
            ));
        };

        let exit_info = match spawn_or_fault(&ctx.interpreter_command(worker))? {
            Ok(child) => {
                let pid = child.id();
                release(child);
                ExitInfo::Detached(pid)
            }
            Err(exit_info) => exit_info,
        };

        Ok(RestartAttemptResult::new(
            self.kind(),
            exit_info,
            started.elapsed(),
        ))
    }
}

/// Spawns `command`, folding ordinary failures into an [`ExitInfo`] and
/// escalating resource exhaustion.
fn spawn_or_fault(
    command: &DetachedCommand,
) -> Result<Result<std::process::Child, ExitInfo>, SupervisorError> {
    match command.spawn() {
        Ok(child) => Ok(Ok(child)),
        Err(err) if is_resource_exhaustion(&err) => {
            Err(SupervisorError::environment("spawning a restart command", err))
        }
        Err(err) => {
            warn!("Failed to spawn restart command: {err}");
            Ok(Err(ExitInfo::SpawnFailed(err.to_string())))
        }
    }
}

/// What happened while walking the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Strategies that ran, in order.
    pub attempts: Vec<RestartAttemptResult>,
    /// Strategies skipped because their precondition was false.
    pub skipped: Vec<StrategyKind>,
}

impl ChainReport {
    /// The strategy whose attempt was confirmed by the probe, if any.
    pub fn succeeded(&self) -> Option<StrategyKind> {
        self.attempts
            .iter()
            .find(|attempt| attempt.confirmed)
            .map(|attempt| attempt.strategy)
    }
}

/// Ordered list of restart strategies.
pub struct RestartStrategyChain {
    strategies: Vec<Box<dyn RestartStrategy>>,
}

impl RestartStrategyChain {
    pub fn new(strategies: Vec<Box<dyn RestartStrategy>>) -> Self {
        Self { strategies }
    }

    /// Builds the built-in strategies in the configured order.
    pub fn from_settings(
        settings: &[StrategySettings],
        service_manager: Arc<dyn ServiceManagerClient>,
    ) -> Self {
        let strategies = settings
            .iter()
            .map(|entry| -> Box<dyn RestartStrategy> {
                match entry.kind {
                    StrategyKind::ServiceManager => Box::new(ServiceManagerStrategy::new(
                        Arc::clone(&service_manager),
                        entry.timeout,
                        entry.settle,
                    )),
                    StrategyKind::Bootstrap => {
                        Box::new(BootstrapStrategy::new(entry.timeout, entry.settle))
                    }
                    StrategyKind::DirectLaunch => {
                        Box::new(DirectLaunchStrategy::new(entry.timeout, entry.settle))
                    }
                }
            })
            .collect();
        Self::new(strategies)
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|strategy| strategy.kind()).collect()
    }

    /// Walks the chain in order until a probe confirms the worker is running.
    ///
    /// A strategy is probed after a successful attempt, and after a timed-out
    /// one since it may have left the worker running. Earlier strategies are
    /// never revisited. A process table that cannot be read stops the walk
    /// with an error rather than moving on to the next strategy.
    pub fn run(
        &self,
        ctx: &StrategyContext,
        probe: &dyn ProcessProbe,
        identity: &WorkerIdentity,
    ) -> Result<ChainReport, SupervisorError> {
        let mut report = ChainReport::default();

        for strategy in &self.strategies {
            if !strategy.precondition(ctx) {
                debug!("Skipping restart strategy '{}': precondition unmet", strategy.name());
                report.skipped.push(strategy.kind());
                continue;
            }

            info!("Attempting restart via '{}'", strategy.name());
            let started = Instant::now();
            let mut result = strategy.attempt(ctx)?;

            if result.succeeded || result.exit_info == ExitInfo::TimedOut {
                thread::sleep(strategy.settle_time());
                result.confirmed = probe.probe(identity)?;
            }
            result.waited = started.elapsed();

            if result.confirmed {
                info!(
                    "Worker confirmed running after '{}' ({})",
                    strategy.name(),
                    result.exit_info
                );
                report.attempts.push(result);
                return Ok(report);
            }

            warn!(
                "Restart via '{}' did not bring the worker up ({})",
                strategy.name(),
                result.exit_info
            );
            report.attempts.push(result);
        }

        error!(
            "All restart strategies exhausted for '{}' ({} attempted, {} skipped)",
            identity.as_str(),
            report.attempts.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}
