//! Session and connector traits

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandOutput, ConnectionInfo};

/// An open session on one machine
///
/// Commands run strictly one at a time per session. `close` releases the
/// underlying transport and must be safe to call more than once.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and collect its output
    async fn run(&self, cmd: &str) -> Result<CommandOutput, ExecError>;

    /// Run a command, failing with `ExecError::Timeout` after `timeout`
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;

    /// Release the session
    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Whether the session is still open
    fn is_connected(&self) -> bool {
        true
    }

    /// Short executor name for logs
    fn executor_type(&self) -> &'static str;
}

/// Opens sessions to remote machines
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish and authenticate a session
    ///
    /// A single attempt; retrying is the caller's concern.
    async fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn RemoteExecutor>, ExecError>;

    /// Short connector name for logs
    fn connector_type(&self) -> &'static str;
}
