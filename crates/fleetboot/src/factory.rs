//! Builds connectors, control planes and probes from configuration

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use fleetboot_cloud::{AwsCliControlPlane, ControlPlane, StaticControlPlane};
use fleetboot_core::{HealthProbe, HttpProbe};
use fleetboot_exec::{
    ConnectionInfo, Connector, ExecError, LocalConnector, LocalExecutor, RemoteExecutor,
    SshConnector,
};
use tracing::debug;

use crate::config::{CloudProvider, Config};

/// SSH for remote hosts, a local shell for this machine
pub struct HostConnector {
    ssh: SshConnector,
    local: LocalConnector,
}

impl HostConnector {
    #[must_use]
    pub fn new(ssh: SshConnector) -> Self {
        Self {
            ssh,
            local: LocalConnector::new(),
        }
    }
}

fn is_local(addr: &str) -> bool {
    matches!(addr, "localhost" | "127.0.0.1" | "::1")
}

#[async_trait]
impl Connector for HostConnector {
    async fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        if is_local(&info.host) {
            debug!(host = %info.host, "using local executor");
            return self.local.open(info).await;
        }
        self.ssh.open(info).await
    }

    fn connector_type(&self) -> &'static str {
        "host"
    }
}

/// Connector with the configured default SSH key
///
/// # Errors
/// Returns error if the default key cannot be loaded
pub fn build_connector(config: &Config) -> Result<Arc<dyn Connector>> {
    let mut builder = SshConnector::builder()
        .with_connect_timeout(Duration::from_secs(config.ssh.connect_timeout_secs))
        .with_inactivity_timeout(config.ssh.inactivity_timeout());
    if let Some(key) = config.ssh.key_source() {
        debug!(key = %key.describe(), "using default SSH key");
        builder = builder.with_key(key);
    }
    let ssh = builder
        .build()
        .wrap_err("failed to create SSH connector")?;
    Ok(Arc::new(HostConnector::new(ssh)))
}

/// Control plane for the configured provider
#[must_use]
pub fn build_control_plane(config: &Config) -> Arc<dyn ControlPlane> {
    match config.cloud.provider {
        CloudProvider::AwsCli => {
            let mut plane = AwsCliControlPlane::new(Arc::new(LocalExecutor::new()))
                .with_timeout(Duration::from_secs(config.cloud.timeout_secs));
            if let Some(region) = &config.cloud.region {
                plane = plane.with_region(region);
            }
            if let Some(profile) = &config.cloud.profile {
                plane = plane.with_profile(profile);
            }
            Arc::new(plane)
        }
        CloudProvider::Static => Arc::new(StaticControlPlane::new(config.static_instances())),
    }
}

/// HTTP probe if a `[probe]` section is present
///
/// # Errors
/// Returns error if the HTTP client cannot be built
pub fn build_probe(config: &Config) -> Result<Option<Arc<dyn HealthProbe>>> {
    let Some(probe) = &config.probe else {
        return Ok(None);
    };
    let http = HttpProbe::new(
        probe.port,
        probe.path.clone(),
        Duration::from_secs(probe.timeout_secs),
    )
    .wrap_err("failed to create health probe")?;
    Ok(Some(Arc::new(http)))
}
