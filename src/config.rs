//! Configuration management for wardeng.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use strum_macros::{Display, IntoStaticStr};

use crate::{
    constants::{
        BOOTSTRAP_SETTLE, BOOTSTRAP_TIMEOUT, DATA_DIR, DEFAULT_BOOTSTRAP_SCRIPT,
        DEFAULT_CONFIG_FILE, DEFAULT_INSTALL_DIR, DEFAULT_INTERPRETER,
        DEFAULT_MAX_HEARTBEAT_AGE, DEFAULT_SETTLE_INTERVAL, DEFAULT_STRATEGY_SETTLE,
        DEFAULT_UNIT_NAME, DEFAULT_WORKER_EXECUTABLE, DEFAULT_WORKER_PATTERN,
        DIRECT_LAUNCH_TIMEOUT, HEARTBEAT_FILE_NAME, INSTALL_DIR_ENV, LOCK_FILE_NAME,
        LOG_FILE_NAME, PID_FILE_NAME, SERVICE_START_TIMEOUT, USER_UNIT_DIR,
    },
    error::SupervisorError,
};

/// What to do when the worker process exists but its heartbeat is stale.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StaleWhileRunning {
    /// Report the staleness and leave the worker alone.
    #[default]
    Ignore,
    /// Treat the stale worker as absent and walk the restart chain.
    ForceRestart,
}

/// The built-in restart mechanisms, in the order they are usually declared.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StrategyKind {
    /// Ask the user service manager to start the worker's unit.
    ServiceManager,
    /// Run the one-time setup script, which may start the worker itself.
    Bootstrap,
    /// Spawn the worker executable directly in its own session.
    DirectLaunch,
}

impl StrategyKind {
    /// Timeout applied when the configuration leaves it out.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::ServiceManager => SERVICE_START_TIMEOUT,
            Self::Bootstrap => BOOTSTRAP_TIMEOUT,
            Self::DirectLaunch => DIRECT_LAUNCH_TIMEOUT,
        }
    }

    /// Settle time applied when the configuration leaves it out.
    pub fn default_settle(&self) -> Duration {
        match self {
            Self::Bootstrap => BOOTSTRAP_SETTLE,
            Self::ServiceManager | Self::DirectLaunch => DEFAULT_STRATEGY_SETTLE,
        }
    }
}

/// Represents the structure of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How the worker is recognised and launched.
    pub worker: WorkerConfig,
    /// Heartbeat and pid marker settings.
    pub heartbeat: HeartbeatConfig,
    /// Log, lock and unit locations.
    pub paths: PathsConfig,
    /// Pause between marker cleanup and the first strategy (e.g. "500ms").
    pub settle_interval: Option<String>,
    /// Policy for a running worker with a stale heartbeat.
    pub on_stale_while_running: StaleWhileRunning,
    /// Ordered restart chain. Defaults to all three built-ins.
    pub strategies: Option<Vec<StrategyConfig>>,
}

/// Worker identification and launch targets.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Regex matched against process command lines.
    pub pattern: Option<String>,
    /// Interpreter for the executable and the bootstrap script.
    pub interpreter: Option<String>,
    /// Worker executable, relative to the installation directory.
    pub executable: Option<String>,
    /// Bootstrap script, relative to the installation directory.
    pub bootstrap_script: Option<String>,
    /// Candidate installation directories; the first existing one wins.
    pub install_dirs: Option<Vec<String>>,
    /// Service unit name.
    pub unit: Option<String>,
}

/// Marker files written by the worker.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub file: Option<String>,
    pub pid_file: Option<String>,
    /// Heartbeat age beyond which the worker is reported stale (e.g. "300s").
    pub max_age: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub log_file: Option<String>,
    /// Set to enable cross-process exclusion of `ensure_running`.
    pub lock_file: Option<String>,
    pub unit_dir: Option<String>,
}

/// One entry in the restart chain.
#[derive(Debug, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub timeout: Option<String>,
    pub settle: Option<String>,
}

/// Resolved per-strategy timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySettings {
    pub kind: StrategyKind,
    pub timeout: Duration,
    pub settle: Duration,
}

impl StrategySettings {
    /// Strategy settings with the built-in timing for `kind`.
    pub fn with_defaults(kind: StrategyKind) -> Self {
        Self {
            kind,
            timeout: kind.default_timeout(),
            settle: kind.default_settle(),
        }
    }
}

/// Fully resolved configuration handed to the supervisor at construction.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Regex recognising the worker among OS processes.
    pub worker_pattern: String,
    pub interpreter: String,
    /// Relative to the discovered installation directory.
    pub worker_executable: PathBuf,
    /// Relative to the discovered installation directory.
    pub bootstrap_script: PathBuf,
    pub install_dirs: Vec<PathBuf>,
    pub unit_name: String,
    pub unit_dir: PathBuf,
    pub heartbeat_path: PathBuf,
    pub pid_path: PathBuf,
    pub max_heartbeat_age: Duration,
    pub log_path: PathBuf,
    pub lock_path: Option<PathBuf>,
    pub settle_interval: Duration,
    pub on_stale_while_running: StaleWhileRunning,
    pub strategies: Vec<StrategySettings>,
}

impl SupervisorSettings {
    /// Built-in settings with every per-user path rooted at `home`.
    pub fn for_home(home: &Path) -> Self {
        let data_dir = home.join(DATA_DIR);
        let mut install_dirs = Vec::new();
        if let Some(app_dir) = env::var_os(INSTALL_DIR_ENV)
            && !app_dir.is_empty()
        {
            install_dirs.push(PathBuf::from(app_dir));
        }
        install_dirs.push(PathBuf::from(DEFAULT_INSTALL_DIR));

        Self {
            worker_pattern: DEFAULT_WORKER_PATTERN.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            worker_executable: PathBuf::from(DEFAULT_WORKER_EXECUTABLE),
            bootstrap_script: PathBuf::from(DEFAULT_BOOTSTRAP_SCRIPT),
            install_dirs,
            unit_name: DEFAULT_UNIT_NAME.to_string(),
            unit_dir: home.join(USER_UNIT_DIR),
            heartbeat_path: home.join(HEARTBEAT_FILE_NAME),
            pid_path: home.join(PID_FILE_NAME),
            max_heartbeat_age: DEFAULT_MAX_HEARTBEAT_AGE,
            log_path: data_dir.join(LOG_FILE_NAME),
            lock_path: None,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            on_stale_while_running: StaleWhileRunning::Ignore,
            strategies: vec![
                StrategySettings::with_defaults(StrategyKind::ServiceManager),
                StrategySettings::with_defaults(StrategyKind::Bootstrap),
                StrategySettings::with_defaults(StrategyKind::DirectLaunch),
            ],
        }
    }

    /// Built-in settings for the current user's `$HOME`.
    pub fn from_env() -> Result<Self, SupervisorError> {
        Ok(Self::for_home(&home_dir()?))
    }

    /// Default lock file location inside the data directory.
    pub fn default_lock_path(&self) -> PathBuf {
        self.log_path
            .parent()
            .map(|dir| dir.join(LOCK_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(LOCK_FILE_NAME))
    }

    /// Returns the first installation directory candidate that exists.
    pub fn discover_install_dir(&self) -> Option<PathBuf> {
        self.install_dirs.iter().find(|dir| dir.is_dir()).cloned()
    }

    /// Path of the unit definition inside the unit directory.
    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(&self.unit_name)
    }

    fn apply(mut self, config: Config, base: &Path) -> Result<Self, SupervisorError> {
        let worker = config.worker;
        if let Some(pattern) = worker.pattern {
            Regex::new(&pattern)?;
            self.worker_pattern = pattern;
        }
        if let Some(interpreter) = worker.interpreter {
            self.interpreter = interpreter;
        }
        if let Some(executable) = worker.executable {
            self.worker_executable = PathBuf::from(executable);
        }
        if let Some(script) = worker.bootstrap_script {
            self.bootstrap_script = PathBuf::from(script);
        }
        if let Some(dirs) = worker.install_dirs {
            self.install_dirs = dirs.iter().map(|dir| resolve_path(base, dir)).collect();
        }
        if let Some(unit) = worker.unit {
            self.unit_name = unit;
        }

        let heartbeat = config.heartbeat;
        if let Some(file) = heartbeat.file {
            self.heartbeat_path = resolve_path(base, &file);
        }
        if let Some(pid_file) = heartbeat.pid_file {
            self.pid_path = resolve_path(base, &pid_file);
        }
        if let Some(max_age) = heartbeat.max_age {
            self.max_heartbeat_age = parse_duration(&max_age)?;
        }

        let paths = config.paths;
        if let Some(log_file) = paths.log_file {
            self.log_path = resolve_path(base, &log_file);
        }
        if let Some(lock_file) = paths.lock_file {
            self.lock_path = Some(resolve_path(base, &lock_file));
        }
        if let Some(unit_dir) = paths.unit_dir {
            self.unit_dir = resolve_path(base, &unit_dir);
        }

        if let Some(settle) = config.settle_interval {
            self.settle_interval = parse_duration(&settle)?;
        }
        self.on_stale_while_running = config.on_stale_while_running;

        if let Some(strategies) = config.strategies {
            if strategies.is_empty() {
                return Err(SupervisorError::InvalidConfig(
                    "at least one restart strategy is required".into(),
                ));
            }

            let mut resolved: Vec<StrategySettings> = Vec::with_capacity(strategies.len());
            for entry in strategies {
                if resolved.iter().any(|existing| existing.kind == entry.kind) {
                    return Err(SupervisorError::InvalidConfig(format!(
                        "strategy '{}' declared more than once",
                        entry.kind
                    )));
                }

                let mut settings = StrategySettings::with_defaults(entry.kind);
                if let Some(timeout) = entry.timeout {
                    settings.timeout = parse_duration(&timeout)?;
                }
                if let Some(settle) = entry.settle {
                    settings.settle = parse_duration(&settle)?;
                }
                resolved.push(settings);
            }
            self.strategies = resolved;
        }

        Ok(self)
    }
}

/// Resolves `$HOME`.
pub fn home_dir() -> Result<PathBuf, SupervisorError> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or(SupervisorError::MissingHome)
}

fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, SupervisorError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(SupervisorError::InvalidConfig(
            "Duration value cannot be empty".into(),
        ));
    }

    let invalid = || SupervisorError::InvalidConfig(format!("Invalid duration value: '{raw}'"));

    if let Some(millis) = value.strip_suffix("ms") {
        let amount: u64 = millis.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Expands `$VAR` and `${VAR}` references within a string.
fn expand_env_vars(input: &str) -> Result<String, SupervisorError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")?;
    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(SupervisorError::InvalidConfig(format!(
            "Missing environment variable: {var_name}"
        ))),
        None => Ok(result.into_owned()),
    }
}

/// Loads the configuration file and resolves it against the built-in defaults.
///
/// Without an explicit path, `wardeng.yaml` in the working directory is used if
/// present; otherwise the built-in defaults apply unchanged.
pub fn load_config(config_path: Option<&str>) -> Result<SupervisorSettings, SupervisorError> {
    let defaults = SupervisorSettings::from_env()?;

    let config_path = match config_path {
        Some(path) => Path::new(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Path::new(DEFAULT_CONFIG_FILE),
        None => return Ok(defaults),
    };

    let content = fs::read_to_string(config_path).map_err(|e| {
        SupervisorError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;
    let config: Config = if expanded_content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&expanded_content)?
    };

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    defaults.apply(config, &base_path)
}
