//! Error handling for wardeng.
use std::io;

use thiserror::Error;

/// Defines the errors that can escape the supervisor.
///
/// Expected conditions (worker absent, stale heartbeat, unmet strategy
/// preconditions, strategy timeouts, an exhausted chain) are never errors; they
/// are folded into [`crate::supervisor::SupervisorState`] and
/// [`crate::supervisor::EnsureOutcome`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[source] io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// A configuration value was syntactically valid YAML but semantically wrong.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker identity pattern does not compile.
    #[error("Invalid worker pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Error when `$HOME` is needed to resolve a default path but is unset.
    #[error("HOME environment variable not set")]
    MissingHome,

    /// Process scan, filesystem or spawn machinery failed in a way retrying will not fix.
    #[error("Environment fault while {context}: {source}")]
    EnvironmentFault {
        /// What the supervisor was doing when the fault happened.
        context: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error writing the service unit definition.
    #[error("Failed to install unit '{unit}': {source}")]
    UnitInstallError {
        /// The unit name being installed.
        unit: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    /// Wraps an I/O error as an environment fault.
    pub fn environment(context: impl Into<String>, source: io::Error) -> Self {
        SupervisorError::EnvironmentFault {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` for faults callers should alert on rather than retry.
    pub fn is_environment_fault(&self) -> bool {
        matches!(self, SupervisorError::EnvironmentFault { .. })
    }
}

/// Returns `true` when a spawn error means the OS itself is out of resources.
///
/// A missing executable or a permission problem is a strategy failure; running
/// out of processes, memory or descriptors is not something the next strategy
/// can work around.
pub fn is_resource_exhaustion(err: &io::Error) -> bool {
    use nix::errno::Errno;

    matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::EAGAIN | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE)
    )
}
