//! Wardeng keeps a long-running background worker alive. It recognises the
//! worker in the OS process table, reads the heartbeat marker the worker
//! writes, and when the worker is gone walks an ordered chain of restart
//! strategies (user service manager, bootstrap script, direct launch) until
//! one of them is confirmed by a fresh probe.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Default values.
pub mod constants;

/// Error handling.
pub mod error;

/// Heartbeat and pid markers.
pub mod heartbeat;

/// Detached process launching.
pub mod launch;

/// Log file helpers.
pub mod logs;

/// Process table probing.
pub mod probe;

/// User service manager control.
pub mod service_manager;

/// Restart strategies.
pub mod strategy;

/// The liveness supervisor.
pub mod supervisor;

/// Service unit installation.
pub mod unit;

#[doc(hidden)]
pub mod test_utils;

pub use config::{SupervisorSettings, load_config};
pub use error::SupervisorError;
pub use supervisor::{EnsureOutcome, Supervisor, SupervisorState};
