//! Error types for fleetboot-cloud

use thiserror::Error;

/// Errors that can occur talking to the control plane
#[derive(Error, Debug, Clone)]
pub enum CloudError {
    /// The `aws` CLI is not installed
    #[error("aws CLI not found: {0}")]
    CliNotFound(String),

    /// The control plane does not (yet) know the instance
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// API rate limiting
    #[error("request throttled: {0}")]
    Throttled(String),

    /// Endpoint unreachable, timed out or answering with a server error
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// Credentials missing, expired or not allowed to make the call
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// CLI exited non-zero with an error not recognised above
    #[error("command failed: {status} - {message}")]
    CommandFailed {
        /// Exit status
        status: i32,
        /// stderr
        message: String,
    },

    /// Failed to parse CLI output
    #[error("JSON parse error: {0}")]
    ParseError(String),

    /// Local execution error
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Rejected an instance id that could not be passed safely
    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl CloudError {
    /// Check if error is retryable
    ///
    /// Only errors that no amount of waiting fixes are final: a missing CLI,
    /// rejected credentials, a bad instance id or bad configuration.
    /// Everything else, unrecognised CLI failures and truncated output
    /// included, is treated as a momentary outage.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CloudError::CliNotFound(_)
                | CloudError::AccessDenied(_)
                | CloudError::InvalidInstanceId(_)
                | CloudError::ConfigError(_)
        )
    }
}
