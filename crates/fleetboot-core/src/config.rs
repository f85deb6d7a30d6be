//! Run configuration for fleet bootstrap

use std::collections::HashMap;
use std::time::Duration;

use fleetboot_exec::{ConnectionInfo, KeySource};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::host::HostDescriptor;
use crate::retry::RetryPolicy;

/// Which of a host's addresses to connect to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPreference {
    #[default]
    Public,
    Private,
}

/// Per-host connection overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostCredentials {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub key: Option<KeySource>,
}

/// Everything a `FleetOrchestrator` needs to know about a run
///
/// Passed explicitly at construction; nothing is read from process state.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Hosts bootstrapped at the same time
    pub max_concurrency: usize,
    /// Upper bound on one host's whole sequence
    pub per_host_timeout: Duration,
    /// Upper bound on the whole run
    pub fleet_deadline: Option<Duration>,
    /// Extra wait after the fleet deadline before aborting tasks
    pub fleet_grace: Duration,
    /// Delay between readiness polls
    pub readiness_interval: Duration,
    /// How long a host may take to become ready
    pub readiness_timeout: Duration,
    /// Connection attempts and backoff
    pub connect_retry: RetryPolicy,
    /// Command re-execution on retryable failures
    pub command_retry: RetryPolicy,
    /// Health probe attempts and backoff
    pub probe_retry: RetryPolicy,
    /// Default timeout for one command execution
    pub command_timeout: Option<Duration>,
    /// Default login user
    pub user: String,
    /// Default port
    pub port: u16,
    /// Overrides by host id
    pub host_overrides: HashMap<String, HostCredentials>,
    /// Address used to reach hosts
    pub address: AddressPreference,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            per_host_timeout: Duration::from_secs(900),
            fleet_deadline: None,
            fleet_grace: Duration::from_secs(5),
            readiness_interval: Duration::from_secs(10),
            readiness_timeout: Duration::from_secs(600),
            connect_retry: RetryPolicy::fixed(5, Duration::from_secs(10)),
            command_retry: RetryPolicy::fixed(3, Duration::from_secs(10)),
            probe_retry: RetryPolicy::fixed(5, Duration::from_secs(5)),
            command_timeout: None,
            user: "ubuntu".to_string(),
            port: 22,
            host_overrides: HashMap::new(),
            address: AddressPreference::Public,
        }
    }
}

impl BootstrapConfig {
    /// Reject settings no run can work with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrency == 0 {
            return Err(CoreError::ConfigError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.per_host_timeout.is_zero() {
            return Err(CoreError::ConfigError(
                "per_host_timeout must be greater than zero".to_string(),
            ));
        }
        if self.readiness_interval.is_zero() {
            return Err(CoreError::ConfigError(
                "readiness_interval must be greater than zero".to_string(),
            ));
        }
        for (name, policy) in [
            ("connect", &self.connect_retry),
            ("command", &self.command_retry),
            ("probe", &self.probe_retry),
        ] {
            if policy.max_attempts == Some(0) {
                return Err(CoreError::ConfigError(format!(
                    "{name} attempts must be at least 1"
                )));
            }
            if policy.max_attempts.is_none() && policy.deadline.is_none() {
                return Err(CoreError::ConfigError(format!(
                    "{name} retry needs an attempt limit or a deadline"
                )));
            }
        }
        Ok(())
    }

    /// Connection parameters for a host, or `None` if it has no usable address
    #[must_use]
    pub fn connection_info(&self, host: &HostDescriptor) -> Option<ConnectionInfo> {
        let addr = host.address(self.address)?;
        let overrides = self.host_overrides.get(&host.id);

        let user = overrides
            .and_then(|o| o.user.clone())
            .unwrap_or_else(|| self.user.clone());
        let port = overrides.and_then(|o| o.port).unwrap_or(self.port);

        let mut info = ConnectionInfo::new(addr, user).with_port(port);
        if let Some(key) = overrides.and_then(|o| o.key.clone()) {
            info = info.with_key(key);
        }
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tomcat_bootstrap() {
        let config = BootstrapConfig::default();
        assert_eq!(config.user, "ubuntu");
        assert_eq!(config.port, 22);
        assert_eq!(config.connect_retry.max_attempts, Some(5));
        assert_eq!(config.command_retry.max_attempts, Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = BootstrapConfig {
            max_concurrency: 0,
            ..BootstrapConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::ConfigError(_))));
    }

    #[test]
    fn test_connection_info_uses_overrides() {
        let mut config = BootstrapConfig::default();
        config.host_overrides.insert(
            "i-2".to_string(),
            HostCredentials {
                user: Some("admin".to_string()),
                port: Some(2222),
                key: Some(KeySource::Env("HOST2_KEY".to_string())),
            },
        );

        let plain = HostDescriptor::new("i-1").with_public_addr("54.0.0.1");
        let info = config.connection_info(&plain).unwrap();
        assert_eq!(info.host, "54.0.0.1");
        assert_eq!(info.user, "ubuntu");
        assert_eq!(info.port, 22);
        assert!(info.key.is_none());

        let special = HostDescriptor::new("i-2").with_private_addr("10.0.0.2");
        let info = config.connection_info(&special).unwrap();
        assert_eq!(info.host, "10.0.0.2");
        assert_eq!(info.user, "admin");
        assert_eq!(info.port, 2222);
        assert!(info.key.is_some());

        assert!(config.connection_info(&HostDescriptor::new("i-3")).is_none());
    }
}
