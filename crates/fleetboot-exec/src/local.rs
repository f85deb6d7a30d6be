//! Commands on the machine running fleetboot

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandOutput, ConnectionInfo};
use crate::traits::{Connector, RemoteExecutor};

/// Runs commands through `sh -c` locally
///
/// Drives the `aws` CLI for the control plane and stands in for SSH when a
/// host's address is this machine.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Spawn `sh -c cmd` and collect its output
///
/// The child is killed if the returned future is dropped, so an outer
/// timeout does not leave it running.
async fn run_shell(cmd: &str) -> Result<CommandOutput, ExecError> {
    let started = Instant::now();

    let child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::SpawnError(e.to_string()))?;

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ExecError::IoError(e.to_string()))?;

    // killed by a signal
    let status = output.status.code().unwrap_or(-1);

    Ok(CommandOutput::new(
        status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    )
    .with_duration(started.elapsed()))
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self), level = "debug")]
    async fn run(&self, cmd: &str) -> Result<CommandOutput, ExecError> {
        let output = run_shell(cmd).await?;
        debug!(status = output.status, duration = ?output.duration, "local command finished");
        Ok(output)
    }

    #[instrument(skip(self), level = "debug")]
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        tokio::time::timeout(timeout, self.run(cmd))
            .await
            .unwrap_or_else(|_| {
                warn!(?timeout, "local command timed out");
                Err(ExecError::Timeout { timeout })
            })
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}

/// Hands out a `LocalExecutor` whatever the address
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl LocalConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        debug!(host = %info.host, user = %info.user, "opening local session");
        Ok(Arc::new(LocalExecutor::new()))
    }

    fn connector_type(&self) -> &'static str {
        "local"
    }
}
