//! Default values for the supervisor configuration.
//!
//! Every value here can be overridden through the configuration file ([`crate::config::Config`]);
//! the constants only seed the defaults.

use std::time::Duration;

// ============================================================================
// Worker Identity
// ============================================================================

/// Regex matched against each process command line to recognise the worker.
pub const DEFAULT_WORKER_PATTERN: &str = r"python3.*daemon\.py";

/// Interpreter used to run the worker executable and the bootstrap script.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Worker executable, relative to the installation directory.
pub const DEFAULT_WORKER_EXECUTABLE: &str = "src/daemon.py";

/// Bootstrap script, relative to the installation directory.
pub const DEFAULT_BOOTSTRAP_SCRIPT: &str = "src/daemon_bootstrap.py";

/// Environment variable consulted first when discovering the installation directory.
pub const INSTALL_DIR_ENV: &str = "APP_DIR";

/// Fallback installation directory candidate.
pub const DEFAULT_INSTALL_DIR: &str = "/opt/click.ubuntu.com/ubtms/current";

// ============================================================================
// File System Constants
// ============================================================================

/// Heartbeat marker, relative to `$HOME`.
pub const HEARTBEAT_FILE_NAME: &str = ".daemon_heartbeat";

/// Pid marker, relative to `$HOME`.
pub const PID_FILE_NAME: &str = ".daemon.pid";

/// Application data directory, relative to `$HOME`.
pub const DATA_DIR: &str = ".local/share/ubtms";

/// Worker log file name inside the data directory.
pub const LOG_FILE_NAME: &str = "daemon.log";

/// Lock file serialising `ensure_running` across host processes.
pub const LOCK_FILE_NAME: &str = "supervisor.lock";

/// User-level unit directory, relative to `$HOME`.
pub const USER_UNIT_DIR: &str = ".config/systemd/user";

/// Target whose `.wants` directory enables the unit.
pub const UNIT_WANTED_BY: &str = "graphical-session.target";

/// Name of the worker's service unit.
pub const DEFAULT_UNIT_NAME: &str = "ubtms-daemon.service";

/// Configuration file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "wardeng.yaml";

// ============================================================================
// Timing
// ============================================================================

/// Heartbeat age beyond which a running worker is reported stale.
pub const DEFAULT_MAX_HEARTBEAT_AGE: Duration = Duration::from_secs(300);

/// Pause between marker cleanup and the first restart strategy.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Bound on a service manager start request.
pub const SERVICE_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the bootstrap procedure.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on spawning the worker directly.
pub const DIRECT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait between a successful attempt and the confirming probe.
pub const DEFAULT_STRATEGY_SETTLE: Duration = Duration::from_secs(1);

/// Settle time after the bootstrap procedure; it may start the worker late.
pub const BOOTSTRAP_SETTLE: Duration = Duration::from_secs(2);

/// Polling interval when waiting on a child process.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Bound on `systemctl --user daemon-reload`.
pub const DAEMON_RELOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval of the `watch` subcommand.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(60);
