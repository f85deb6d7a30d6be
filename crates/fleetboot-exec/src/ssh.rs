//! SSH command execution using russh crate

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key::{self, PrivateKey};
use russh::{ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::KeySource;
use crate::result::{CommandOutput, ConnectionInfo};
use crate::traits::{Connector, RemoteExecutor};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Freshly launched instances have unknown host keys; accept them
        // (StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// An authenticated SSH session to one host
///
/// Created by [`SshConnector::open`]. Each command opens its own channel on
/// the shared session.
pub struct SshExecutor {
    /// Address the session was opened to
    host: String,
    /// SSH session, `None` once closed
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("host", &self.host)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Host this session is connected to
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[instrument(skip(self, cmd), fields(host = %self.host))]
    async fn execute_remote(&self, cmd: &str) -> Result<CommandOutput, ExecError> {
        let mut session_lock = self.session.lock().await;
        let session = session_lock.as_mut().ok_or(ExecError::NotConnected)?;

        debug!(command = %cmd, "executing remote command");

        let start = Instant::now();

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let mut collected = ChannelOutput::default();
        while let Some(msg) = channel.wait().await {
            if !collected.apply(msg) {
                break;
            }
        }
        let output = collected.finish(start.elapsed());

        debug!(
            command = %cmd,
            status = output.status,
            duration = ?output.duration,
            "remote command completed"
        );

        Ok(output)
    }
}

/// Everything a command's channel reported
///
/// `exit-status` may arrive after `eof`, so only `close` (or the channel
/// going away) ends collection.
#[derive(Debug, Default)]
struct ChannelOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    eof: bool,
}

impl ChannelOutput {
    /// Fold one channel message; `false` once the channel is closed
    fn apply(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
            // ext 1 is stderr
            ChannelMsg::ExtendedData { data, ext: 1 } => self.stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                self.exit_signal = Some(format!("{signal_name:?}"));
            }
            ChannelMsg::Eof => self.eof = true,
            ChannelMsg::Close => return false,
            _ => {}
        }
        true
    }

    fn finish(self, duration: Duration) -> CommandOutput {
        let mut stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        if let Some(signal) = &self.exit_signal {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("killed by signal {signal}"));
        }
        if self.exit_status.is_none() {
            debug!(eof = self.eof, signal = ?self.exit_signal, "channel closed without exit status");
        }

        CommandOutput::new(
            self.exit_status.map_or(-1, u32::cast_signed),
            String::from_utf8_lossy(&self.stdout),
            stderr,
        )
        .with_duration(duration)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandOutput, ExecError> {
        self.execute_remote(cmd).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandOutput, ExecError> {
        match timeout(timeout_duration, self.execute_remote(cmd)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    host = %self.host,
                    command = %cmd,
                    timeout = ?timeout_duration,
                    "remote command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn close(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.host, "SSH disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        // A held lock means a command is in flight on an open session
        self.session
            .try_lock()
            .map(|s| s.is_some())
            .unwrap_or(true)
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

/// Opens authenticated SSH sessions
///
/// The default key is loaded once at construction and shared by every
/// session; hosts carrying their own `ConnectionInfo::key` load it per open.
pub struct SshConnector {
    default_key: Option<Arc<PrivateKey>>,
    connect_timeout: Duration,
    inactivity_timeout: Option<Duration>,
}

impl std::fmt::Debug for SshConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnector")
            .field("has_default_key", &self.default_key.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl SshConnector {
    /// Start building a connector
    #[must_use]
    pub fn builder() -> SshConnectorBuilder {
        SshConnectorBuilder::default()
    }

    fn key_for(&self, info: &ConnectionInfo) -> Result<Arc<PrivateKey>, ExecError> {
        if let Some(source) = &info.key {
            return source
                .load()
                .map(Arc::new)
                .map_err(|e| ExecError::SshKeyError(e.to_string()));
        }
        self.default_key.clone().ok_or_else(|| {
            ExecError::AuthenticationFailed("no SSH key configured".to_string())
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self, info), fields(host = %info.host, port = info.port))]
    async fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        let key = self.key_for(info)?;

        info!(
            host = %info.host,
            port = info.port,
            user = %info.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config {
            inactivity_timeout: self.inactivity_timeout,
            ..client::Config::default()
        });

        let connect = client::connect(config, (info.host.as_str(), info.port), SshClientHandler);
        let mut session = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(ExecError::ConnectionFailed(e.to_string())),
            Err(_) => {
                return Err(ExecError::Timeout {
                    timeout: self.connect_timeout,
                });
            }
        };

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(&info.user, PrivateKeyWithHashAlg::new(key, hash_alg))
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(
                "public key authentication failed".to_string(),
            ));
        }

        info!(host = %info.host, "SSH connected and authenticated");

        Ok(Arc::new(SshExecutor {
            host: info.host.clone(),
            session: Mutex::new(Some(session)),
        }))
    }

    fn connector_type(&self) -> &'static str {
        "ssh"
    }
}

/// Builder for `SshConnector`
#[derive(Debug, Clone)]
pub struct SshConnectorBuilder {
    key_source: Option<KeySource>,
    connect_timeout: Duration,
    inactivity_timeout: Option<Duration>,
}

impl Default for SshConnectorBuilder {
    fn default() -> Self {
        Self {
            key_source: None,
            connect_timeout: Duration::from_secs(30),
            inactivity_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl SshConnectorBuilder {
    /// Set the default key
    #[must_use]
    pub fn with_key(mut self, source: KeySource) -> Self {
        self.key_source = Some(source);
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_env_key(self, var_name: impl Into<String>) -> Self {
        self.with_key(KeySource::Env(var_name.into()))
    }

    /// Bound the TCP connect + handshake
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Drop idle sessions after this long
    #[must_use]
    pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Build the connector, loading the default key
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if the key cannot be loaded
    pub fn build(self) -> Result<SshConnector, ExecError> {
        let default_key = match &self.key_source {
            Some(source) => Some(Arc::new(
                source
                    .load()
                    .map_err(|e| ExecError::SshKeyError(e.to_string()))?,
            )),
            None => None,
        };

        Ok(SshConnector {
            default_key,
            connect_timeout: self.connect_timeout,
            inactivity_timeout: self.inactivity_timeout,
        })
    }
}
