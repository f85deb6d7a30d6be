//! Error types for fleetboot-exec

use std::time::Duration;

use thiserror::Error;

/// Why opening a session or running a command failed
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// TCP connect or SSH handshake failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Server rejected the credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connect or command exceeded its time budget
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Private key missing or unreadable
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Local shell could not be started
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// Transport broke on an open session
    #[error("I/O error: {0}")]
    IoError(String),

    /// Session was never opened or has been closed
    #[error("not connected")]
    NotConnected,
}

impl ExecError {
    /// Whether another attempt may succeed
    ///
    /// Transport failures are retryable; credential and session-state
    /// failures are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_) | ExecError::Timeout { .. } | ExecError::IoError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        let refused = ExecError::ConnectionFailed("54.0.0.1:22: connection refused".into());
        assert!(refused.is_retryable());
        assert!(
            ExecError::Timeout {
                timeout: Duration::from_secs(30)
            }
            .is_retryable()
        );
        assert!(ExecError::IoError("channel reset".into()).is_retryable());
    }

    #[test]
    fn test_credential_errors_are_final() {
        assert!(!ExecError::AuthenticationFailed("publickey".into()).is_retryable());
        assert!(!ExecError::SshKeyError("bad permissions".into()).is_retryable());
        assert!(!ExecError::SpawnError("sh: not found".into()).is_retryable());
        assert!(!ExecError::NotConnected.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ExecError::Timeout {
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "timed out after 5s");
    }
}
