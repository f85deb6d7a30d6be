//! Core error types for fleetboot-core

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a whole run or an actor request
///
/// Host-level failures never surface here; they become `Failed` outcomes.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Host not found in registry
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Host already exists in registry
    #[error("host already exists: {0}")]
    HostAlreadyExists(String),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Serializable category of a host failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ReadinessTimeout,
    ReadinessFailed,
    ConnectionFailed,
    CommandFatalFailure,
    CommandRetriesExhausted,
    HostTimeout,
    FleetTimeout,
    HealthCheckFailed,
    TaskPanicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ReadinessTimeout => "readiness_timeout",
            FailureKind::ReadinessFailed => "readiness_failed",
            FailureKind::ConnectionFailed => "connection_failed",
            FailureKind::CommandFatalFailure => "command_fatal_failure",
            FailureKind::CommandRetriesExhausted => "command_retries_exhausted",
            FailureKind::HostTimeout => "host_timeout",
            FailureKind::FleetTimeout => "fleet_timeout",
            FailureKind::HealthCheckFailed => "health_check_failed",
            FailureKind::TaskPanicked => "task_panicked",
        };
        f.write_str(s)
    }
}

/// Why a single host's bootstrap failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// Readiness predicate never held before the deadline
    #[error("not ready after {timeout:?}: {detail}")]
    ReadinessTimeout {
        /// Readiness timeout that elapsed
        timeout: Duration,
        /// Last observed status or query error
        detail: String,
    },

    /// Instance reached a state it will not recover from, or the control
    /// plane rejected the status query
    #[error("readiness failed: {0}")]
    ReadinessFailed(String),

    /// No session after all connection attempts
    #[error("connection failed after {attempts} attempt(s): {message}")]
    ConnectionFailed {
        /// Attempts made
        attempts: u32,
        /// Last connection error
        message: String,
    },

    /// A command was classified fatal
    #[error("command '{command}' failed: {reason}")]
    CommandFatalFailure {
        /// Command name
        command: String,
        /// Classifier or transport reason
        reason: String,
    },

    /// A retryable failure outlasted the attempt budget
    #[error("command '{command}' still failing after {attempts} attempt(s): {reason}")]
    CommandRetriesExhausted {
        /// Command name
        command: String,
        /// Attempts made
        attempts: u32,
        /// Reason from the last attempt
        reason: String,
    },

    /// Per-host timeout elapsed
    #[error("host did not finish within {0:?}")]
    HostTimeout(Duration),

    /// Fleet deadline elapsed before the host settled
    #[error("fleet deadline elapsed before host finished")]
    FleetTimeout,

    /// Post-bootstrap probe never succeeded
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    /// The host task panicked
    #[error("bootstrap task panicked: {0}")]
    TaskPanicked(String),
}

impl BootstrapError {
    /// Category for reports
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            BootstrapError::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            BootstrapError::ReadinessFailed(_) => FailureKind::ReadinessFailed,
            BootstrapError::ConnectionFailed { .. } => FailureKind::ConnectionFailed,
            BootstrapError::CommandFatalFailure { .. } => FailureKind::CommandFatalFailure,
            BootstrapError::CommandRetriesExhausted { .. } => {
                FailureKind::CommandRetriesExhausted
            }
            BootstrapError::HostTimeout(_) => FailureKind::HostTimeout,
            BootstrapError::FleetTimeout => FailureKind::FleetTimeout,
            BootstrapError::HealthCheckFailed(_) => FailureKind::HealthCheckFailed,
            BootstrapError::TaskPanicked(_) => FailureKind::TaskPanicked,
        }
    }
}
