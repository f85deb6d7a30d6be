//! Result and connection types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::KeySource;

/// Output of one command execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status code (0 for success, -1 if the remote never reported one)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandOutput {
    /// Build an output record
    pub fn new(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    /// Set the measured duration
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Where and as whom to open a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username
    pub user: String,
    /// Key override for this host; the connector's default is used otherwise
    #[serde(default)]
    pub key: Option<KeySource>,
}

fn default_port() -> u16 {
    22
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            key: None,
        }
    }

    /// Set a per-host SSH key
    #[must_use]
    pub fn with_key(mut self, key: KeySource) -> Self {
        self.key = Some(key);
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput::new(0, "done", "");
        assert_eq!(out.combined_output(), "done");

        let out = CommandOutput::new(100, "Reading package lists...", "E: broken");
        assert_eq!(out.combined_output(), "Reading package lists...\nE: broken");
        assert!(!out.success());
    }

    #[test]
    fn test_connection_info_defaults() {
        let info: ConnectionInfo =
            serde_json::from_str(r#"{"host":"10.0.0.5","user":"ubuntu"}"#).unwrap();
        assert_eq!(info.port, 22);
        assert!(info.key.is_none());

        let info = ConnectionInfo::new("10.0.0.5", "admin").with_port(2222);
        assert_eq!(info.port, 2222);
        assert_eq!(info.user, "admin");
    }
}
