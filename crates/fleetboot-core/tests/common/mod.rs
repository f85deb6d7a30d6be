#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetboot_cloud::{
    CheckStatus, CloudError, ControlPlane, InstanceDescription, InstanceFilter, InstanceState,
    InstanceStatus,
};
use fleetboot_core::{BootstrapConfig, CommandSpec, HostDescriptor, RetryPolicy};
use fleetboot_exec::{CommandOutput, ConnectionInfo, Connector, ExecError, RemoteExecutor};

pub const UPDATE: &str = "sudo DEBIAN_FRONTEND=noninteractive apt update -y";
pub const INSTALL: &str = "sudo DEBIAN_FRONTEND=noninteractive apt install -y tomcat9";
pub const START: &str = "sudo systemctl start tomcat9";
pub const ENABLE: &str = "sudo systemctl enable tomcat9";

pub fn tomcat_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("update", UPDATE),
        CommandSpec::new("install-pkg", INSTALL),
        CommandSpec::new("start-service", START),
        CommandSpec::new("enable-service", ENABLE),
    ]
}

/// Host `name` reachable at `10.0.0.{n}` / `54.0.0.{n}`
pub fn host(name: &str, n: usize) -> HostDescriptor {
    HostDescriptor::new(name)
        .with_public_addr(format!("54.0.0.{n}"))
        .with_private_addr(format!("10.0.0.{n}"))
        .with_security_groups(["sg-web"])
}

pub fn hosts(count: usize) -> Vec<HostDescriptor> {
    (1..=count).map(|n| host(&format!("i-{n:03}"), n)).collect()
}

/// Fast retry settings so tests exercise the policies without long waits
pub fn test_config() -> BootstrapConfig {
    BootstrapConfig {
        max_concurrency: 4,
        readiness_interval: Duration::from_secs(10),
        readiness_timeout: Duration::from_secs(120),
        connect_retry: RetryPolicy::fixed(5, Duration::from_secs(10)),
        command_retry: RetryPolicy::fixed(3, Duration::from_secs(10)),
        probe_retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
        ..BootstrapConfig::default()
    }
}

pub fn no_installation_candidate() -> CommandOutput {
    CommandOutput::new(
        100,
        "Reading package lists...",
        "WARNING: apt does not have a stable CLI interface.\nE: Package 'tomcat9' has no installation candidate",
    )
}

pub fn dpkg_lock_held() -> CommandOutput {
    CommandOutput::new(
        100,
        "",
        "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 4242 (apt)",
    )
}

// ============================================================================
// Mock connector and sessions
// ============================================================================

/// Behaviour of one mock host, keyed by address
#[derive(Clone, Default)]
pub struct HostScript {
    /// Connection attempts refused before one succeeds
    pub refuse_connections: usize,
    /// Reject authentication on every attempt
    pub reject_auth: bool,
    /// Queued outputs per command; commands without a queue succeed
    pub responses: HashMap<String, VecDeque<CommandOutput>>,
    /// Simulated run time of every command
    pub command_time: Duration,
    /// Panic when this command runs
    pub panic_on: Option<String>,
}

impl HostScript {
    pub fn respond(mut self, cmd: &str, outputs: Vec<CommandOutput>) -> Self {
        self.responses.insert(cmd.to_string(), outputs.into());
        self
    }

    pub fn slow(mut self, command_time: Duration) -> Self {
        self.command_time = command_time;
        self
    }

    pub fn refusing(mut self, attempts: usize) -> Self {
        self.refuse_connections = attempts;
        self
    }

    pub fn panicking_on(mut self, cmd: &str) -> Self {
        self.panic_on = Some(cmd.to_string());
        self
    }
}

/// Shared counters across every session of a `MockConnector`
#[derive(Default)]
pub struct Stats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub connect_attempts: Mutex<HashMap<String, usize>>,
    pub executed: Mutex<Vec<(String, String)>>,
}

impl Stats {
    pub fn executed_on(&self, addr: &str) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == addr)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn attempts_for(&self, addr: &str) -> usize {
        self.connect_attempts
            .lock()
            .unwrap()
            .get(addr)
            .copied()
            .unwrap_or(0)
    }
}

pub struct MockConnector {
    scripts: Mutex<HashMap<String, HostScript>>,
    pub stats: Arc<Stats>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn script(self, addr: &str, script: HostScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(addr.to_string(), script);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, info: &ConnectionInfo) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        let attempt = {
            let mut attempts = self.stats.connect_attempts.lock().unwrap();
            let n = attempts.entry(info.host.clone()).or_insert(0);
            *n += 1;
            *n
        };

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.entry(info.host.clone()).or_default().clone()
        };

        if script.reject_auth {
            return Err(ExecError::AuthenticationFailed(
                "publickey rejected".to_string(),
            ));
        }
        if attempt <= script.refuse_connections {
            return Err(ExecError::ConnectionFailed(format!(
                "{}:{}: connection refused",
                info.host, info.port
            )));
        }

        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Arc::new(MockSession {
            addr: info.host.clone(),
            script: Mutex::new(script),
            stats: Arc::clone(&self.stats),
            closed: AtomicBool::new(false),
        }))
    }

    fn connector_type(&self) -> &'static str {
        "mock"
    }
}

pub struct MockSession {
    addr: String,
    script: Mutex<HostScript>,
    stats: Arc<Stats>,
    closed: AtomicBool,
}

#[async_trait]
impl RemoteExecutor for MockSession {
    async fn run(&self, cmd: &str) -> Result<CommandOutput, ExecError> {
        let (delay, panic) = {
            let script = self.script.lock().unwrap();
            (script.command_time, script.panic_on.as_deref() == Some(cmd))
        };
        if panic {
            panic!("mock session exploded on '{cmd}'");
        }

        self.stats
            .executed
            .lock()
            .unwrap()
            .push((self.addr.clone(), cmd.to_string()));

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock().unwrap();
        let output = script
            .responses
            .get_mut(cmd)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| CommandOutput::new(0, "ok", ""));
        Ok(output.with_duration(delay))
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        tokio::time::timeout(timeout, self.run(cmd))
            .await
            .map_err(|_| ExecError::Timeout { timeout })?
    }

    async fn close(&self) -> Result<(), ExecError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn executor_type(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Mock control plane
// ============================================================================

/// Every instance is running with passing checks, except `never_ready` ones
/// which stay initializing and `terminated` ones
#[derive(Default)]
pub struct MockControlPlane {
    pub never_ready: HashSet<String>,
    pub terminated: HashSet<String>,
}

impl MockControlPlane {
    pub fn never_ready(ids: &[&str]) -> Self {
        Self {
            never_ready: ids.iter().map(|s| (*s).to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn describe_instance_status(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceStatus>, CloudError> {
        Ok(instance_ids
            .iter()
            .map(|id| {
                if self.terminated.contains(id) {
                    InstanceStatus::new(
                        id.clone(),
                        InstanceState::Terminated,
                        CheckStatus::NotApplicable,
                        CheckStatus::NotApplicable,
                    )
                } else if self.never_ready.contains(id) {
                    InstanceStatus::new(
                        id.clone(),
                        InstanceState::Running,
                        CheckStatus::Initializing,
                        CheckStatus::Initializing,
                    )
                } else {
                    InstanceStatus::new(
                        id.clone(),
                        InstanceState::Running,
                        CheckStatus::Ok,
                        CheckStatus::Ok,
                    )
                }
            })
            .collect())
    }

    async fn describe_instances(
        &self,
        _filter: &InstanceFilter,
    ) -> Result<Vec<InstanceDescription>, CloudError> {
        Ok(Vec::new())
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}
