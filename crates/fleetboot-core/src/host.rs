//! Target hosts and their sessions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fleetboot_cloud::InstanceDescription;
use fleetboot_exec::{CommandOutput, ConnectionInfo, Connector, ExecError, RemoteExecutor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::AddressPreference;
use crate::error::BootstrapError;
use crate::retry::{Attempt, RetryPolicy, retry_with_backoff};

/// One machine to bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// Opaque instance id
    pub id: String,
    #[serde(default)]
    pub public_addr: Option<String>,
    #[serde(default)]
    pub private_addr: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

impl HostDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_addr: None,
            private_addr: None,
            security_group_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_public_addr(mut self, addr: impl Into<String>) -> Self {
        self.public_addr = Some(addr.into());
        self
    }

    #[must_use]
    pub fn with_private_addr(mut self, addr: impl Into<String>) -> Self {
        self.private_addr = Some(addr.into());
        self
    }

    #[must_use]
    pub fn with_security_groups<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security_group_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Preferred address, falling back to the other one
    #[must_use]
    pub fn address(&self, preference: AddressPreference) -> Option<&str> {
        let (first, second) = match preference {
            AddressPreference::Public => (&self.public_addr, &self.private_addr),
            AddressPreference::Private => (&self.private_addr, &self.public_addr),
        };
        first.as_deref().or(second.as_deref())
    }
}

impl From<InstanceDescription> for HostDescriptor {
    fn from(instance: InstanceDescription) -> Self {
        Self {
            id: instance.instance_id,
            public_addr: instance.public_ip.or(instance.public_dns),
            private_addr: instance.private_ip,
            security_group_ids: instance.security_group_ids,
        }
    }
}

/// A connected target machine
///
/// Owns its session exclusively. `close` is idempotent; dropping an unclosed
/// host closes the session in the background.
pub struct RemoteHost {
    host_id: String,
    address: String,
    session: Arc<dyn RemoteExecutor>,
    closed: AtomicBool,
}

impl RemoteHost {
    /// Open a session, retrying transport failures per `policy`
    ///
    /// Authentication and key errors are not retried.
    #[instrument(skip(connector, info, policy), fields(addr = %info.host, port = info.port))]
    pub async fn connect(
        connector: &dyn Connector,
        host_id: &str,
        info: &ConnectionInfo,
        policy: &RetryPolicy,
    ) -> Result<Self, BootstrapError> {
        let result = retry_with_backoff(policy, |attempt| async move {
            match connector.open(info).await {
                Ok(session) => Attempt::Done(session),
                Err(e) if e.is_retryable() => {
                    warn!(host = %host_id, attempt, error = %e, "connection attempt failed");
                    Attempt::Retry(e)
                }
                Err(e) => Attempt::Abort(e),
            }
        })
        .await;

        match result {
            Ok(retried) => {
                info!(
                    host = %host_id,
                    attempts = retried.attempts,
                    connector = connector.connector_type(),
                    "session established"
                );
                Ok(Self::from_session(host_id, &info.host, retried.value))
            }
            Err(e) => {
                let attempts = e.attempts();
                Err(BootstrapError::ConnectionFailed {
                    attempts,
                    message: e.into_inner().to_string(),
                })
            }
        }
    }

    /// Wrap an already open session
    pub fn from_session(
        host_id: impl Into<String>,
        address: impl Into<String>,
        session: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            address: address.into(),
            session,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.host_id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run one command
    pub async fn execute(&self, command: &str) -> Result<CommandOutput, ExecError> {
        if self.is_closed() {
            return Err(ExecError::NotConnected);
        }
        self.session.run(command).await
    }

    /// Run one command, bounded by `timeout`
    pub async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        if self.is_closed() {
            return Err(ExecError::NotConnected);
        }
        self.session.run_with_timeout(command, timeout).await
    }

    /// Release the session
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.session.close().await {
            Ok(()) => debug!(host = %self.host_id, "session closed"),
            Err(e) => warn!(host = %self.host_id, error = %e, "error closing session"),
        }
    }
}

impl Drop for RemoteHost {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        let host_id = self.host_id.clone();
        handle.spawn(async move {
            if let Err(e) = session.close().await {
                warn!(host = %host_id, error = %e, "error closing dropped session");
            }
        });
    }
}

impl std::fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHost")
            .field("host_id", &self.host_id)
            .field("address", &self.address)
            .field("executor", &self.session.executor_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}
