//! Configuration loading and types
//!
//! Every section is optional; an empty file reproduces the stock tomcat9
//! bootstrap against running EC2 instances.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use fleetboot_cloud::{InstanceDescription, InstanceFilter, InstanceState};
use fleetboot_core::{
    AddressPreference, BootstrapConfig, CommandSpec, HostCredentials, ReadinessPredicate,
    RetryPolicy, SignatureClassifier, Verdict,
};
use fleetboot_exec::KeySource;
use serde::{Deserialize, Serialize};

/// Top-level configuration for fleetboot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub bootstrap: BootstrapSection,
    #[serde(default)]
    pub readiness: ReadinessSection,
    #[serde(default)]
    pub cloud: CloudConfig,
    /// Hosts for the static provider
    #[serde(default)]
    pub host: Vec<StaticHost>,
    #[serde(default)]
    pub classifier: ClassifierSection,
    /// Commands run on every host, in order; empty means the tomcat9 set
    #[serde(default)]
    pub command: Vec<CommandConfig>,
    /// Health probe run after the commands
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SSH login settings shared by every host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key file
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Environment variable holding a base64-encoded private key
    #[serde(default)]
    pub key_env: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Drop idle sessions after this long; 0 keeps them open
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            key_path: None,
            key_env: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
        }
    }
}

fn default_user() -> String {
    "ubuntu".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_inactivity_timeout_secs() -> u64 {
    600
}

impl SshConfig {
    #[must_use]
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_secs > 0).then(|| Duration::from_secs(self.inactivity_timeout_secs))
    }

    /// Default key; a path wins over an environment variable
    #[must_use]
    pub fn key_source(&self) -> Option<KeySource> {
        self.key_path
            .clone()
            .map(KeySource::Path)
            .or_else(|| self.key_env.clone().map(KeySource::Env))
    }
}

/// Concurrency, timeouts and retry budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSection {
    pub max_concurrency: usize,
    pub per_host_timeout_secs: u64,
    pub fleet_deadline_secs: Option<u64>,
    pub fleet_grace_secs: u64,
    pub poll_interval_secs: u64,
    pub readiness_timeout_secs: u64,
    pub connect_attempts: u32,
    pub connect_delay_secs: u64,
    pub connect_backoff: BackoffKind,
    /// Cap for exponential connect backoff
    pub connect_max_delay_secs: u64,
    pub command_attempts: u32,
    pub command_retry_delay_secs: u64,
    pub command_timeout_secs: Option<u64>,
    pub address: AddressPreference,
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            per_host_timeout_secs: 900,
            fleet_deadline_secs: None,
            fleet_grace_secs: 5,
            poll_interval_secs: 10,
            readiness_timeout_secs: 600,
            connect_attempts: 5,
            connect_delay_secs: 10,
            connect_backoff: BackoffKind::Fixed,
            connect_max_delay_secs: 60,
            command_attempts: 3,
            command_retry_delay_secs: 10,
            command_timeout_secs: None,
            address: AddressPreference::Public,
        }
    }
}

/// Delay schedule between connection attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    /// Doubling from `connect_delay_secs` up to `connect_max_delay_secs`
    Exponential,
}

impl BootstrapSection {
    #[must_use]
    pub fn connect_retry(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.connect_delay_secs);
        match self.connect_backoff {
            BackoffKind::Fixed => RetryPolicy::fixed(self.connect_attempts, delay),
            BackoffKind::Exponential => RetryPolicy::exponential(
                self.connect_attempts,
                delay,
                Duration::from_secs(self.connect_max_delay_secs),
            ),
        }
    }
}

/// Which readiness predicate gates the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessKind {
    /// Running with both status checks passing
    #[default]
    StatusChecks,
    /// Running, checks ignored
    Running,
    /// No waiting
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessSection {
    #[serde(default)]
    pub predicate: ReadinessKind,
}

/// Where hosts and their status come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    #[default]
    AwsCli,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub provider: CloudProvider,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    /// Per-call timeout for the `aws` CLI
    #[serde(default = "default_cli_timeout_secs")]
    pub timeout_secs: u64,
    /// Only these instances (empty means all)
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Never these instances, e.g. the controller itself
    #[serde(default)]
    pub exclude_instance_ids: Vec<String>,
    #[serde(default = "default_states")]
    pub states: Vec<InstanceState>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: CloudProvider::default(),
            region: None,
            profile: None,
            timeout_secs: default_cli_timeout_secs(),
            instance_ids: Vec::new(),
            exclude_instance_ids: Vec::new(),
            states: default_states(),
        }
    }
}

fn default_cli_timeout_secs() -> u64 {
    60
}

fn default_states() -> Vec<InstanceState> {
    vec![InstanceState::Running]
}

/// One host of a static fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticHost {
    pub id: String,
    #[serde(default)]
    pub public_addr: Option<String>,
    #[serde(default)]
    pub private_addr: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

/// Built-in signature set a classifier starts from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierBase {
    #[default]
    Apt,
    ExitStatus,
}

/// Extra output signatures on top of a base set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub base: ClassifierBase,
    pub fatal: Vec<String>,
    pub retryable: Vec<String>,
    pub satisfied: Vec<String>,
    pub warning_prefixes: Vec<String>,
    /// Verdict for a non-zero exit no signature explains
    pub unmatched_failure: Option<Verdict>,
}

impl ClassifierSection {
    #[must_use]
    pub fn build(&self) -> SignatureClassifier {
        let base = match self.base {
            ClassifierBase::Apt => SignatureClassifier::apt(),
            ClassifierBase::ExitStatus => SignatureClassifier::exit_status_only(),
        };
        let extra = SignatureClassifier {
            fatal: self.fatal.clone(),
            retryable: self.retryable.clone(),
            satisfied: self.satisfied.clone(),
            warning_prefixes: self.warning_prefixes.clone(),
            unmatched_failure: base.unmatched_failure,
        };
        let mut classifier = base.extended_with(&extra);
        if let Some(verdict) = self.unmatched_failure {
            classifier.unmatched_failure = verdict;
        }
        classifier
    }
}

/// One step of the bootstrap sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    pub run: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandConfig {
    fn new(name: &str, run: &str) -> Self {
        Self {
            name: name.to_string(),
            run: run.to_string(),
            timeout_secs: None,
        }
    }
}

/// Install tomcat9, then start and enable it
#[must_use]
pub fn default_commands() -> Vec<CommandConfig> {
    vec![
        CommandConfig::new(
            "update",
            "sudo DEBIAN_FRONTEND=noninteractive apt update -y",
        ),
        CommandConfig::new(
            "install-pkg",
            "sudo DEBIAN_FRONTEND=noninteractive apt install -y tomcat9",
        ),
        CommandConfig::new("start-service", "sudo systemctl start tomcat9"),
        CommandConfig::new("enable-service", "sudo systemctl enable tomcat9"),
    ]
}

/// HTTP health probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub port: u16,
    pub path: String,
    pub timeout_secs: u64,
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            path: "/".to_string(),
            timeout_secs: 5,
            attempts: 5,
            delay_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("invalid config {}", path.display()))
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or has unknown values
    pub fn parse(content: &str) -> eyre::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// First config file found on the search path
    ///
    /// `FLEETBOOT_CONFIG`, `./fleetboot.toml`, `/etc/fleetboot/fleetboot.toml`
    /// and the user config dir, in that order.
    #[must_use]
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLEETBOOT_CONFIG") {
            return Some(PathBuf::from(path));
        }

        let mut paths = vec![
            PathBuf::from("fleetboot.toml"),
            PathBuf::from("/etc/fleetboot/fleetboot.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("fleetboot/fleetboot.toml"));
        }

        paths.into_iter().find(|p| p.exists())
    }

    /// Run settings for the orchestrator
    #[must_use]
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        let b = &self.bootstrap;
        let probe = self.probe.clone().unwrap_or_default();

        let host_overrides: HashMap<String, HostCredentials> = self
            .host
            .iter()
            .filter(|h| h.user.is_some() || h.port.is_some() || h.key_path.is_some())
            .map(|h| {
                (
                    h.id.clone(),
                    HostCredentials {
                        user: h.user.clone(),
                        port: h.port,
                        key: h.key_path.clone().map(KeySource::Path),
                    },
                )
            })
            .collect();

        BootstrapConfig {
            max_concurrency: b.max_concurrency,
            per_host_timeout: Duration::from_secs(b.per_host_timeout_secs),
            fleet_deadline: b.fleet_deadline_secs.map(Duration::from_secs),
            fleet_grace: Duration::from_secs(b.fleet_grace_secs),
            readiness_interval: Duration::from_secs(b.poll_interval_secs),
            readiness_timeout: Duration::from_secs(b.readiness_timeout_secs),
            connect_retry: b.connect_retry(),
            command_retry: RetryPolicy::fixed(
                b.command_attempts,
                Duration::from_secs(b.command_retry_delay_secs),
            ),
            probe_retry: RetryPolicy::fixed(probe.attempts, Duration::from_secs(probe.delay_secs)),
            command_timeout: b.command_timeout_secs.map(Duration::from_secs),
            user: self.ssh.user.clone(),
            port: self.ssh.port,
            host_overrides,
            address: b.address,
        }
    }

    #[must_use]
    pub fn readiness_predicate(&self) -> ReadinessPredicate {
        match self.readiness.predicate {
            ReadinessKind::StatusChecks => ReadinessPredicate::status_checks_ok(),
            ReadinessKind::Running => ReadinessPredicate::running(),
            ReadinessKind::None => ReadinessPredicate::always_ready(),
        }
    }

    /// Command list with the configured classifier attached
    #[must_use]
    pub fn commands(&self) -> Vec<CommandSpec> {
        let classifier = self.classifier.build();
        let commands = if self.command.is_empty() {
            default_commands()
        } else {
            self.command.clone()
        };

        commands
            .into_iter()
            .map(|c| {
                let spec = CommandSpec::new(c.name, c.run).with_classifier(classifier.clone());
                match c.timeout_secs {
                    Some(secs) => spec.with_timeout(Duration::from_secs(secs)),
                    None => spec,
                }
            })
            .collect()
    }

    /// Which instances to bootstrap
    #[must_use]
    pub fn instance_filter(&self) -> InstanceFilter {
        InstanceFilter {
            states: self.cloud.states.clone(),
            instance_ids: self.cloud.instance_ids.clone(),
            exclude_ids: self.cloud.exclude_instance_ids.clone(),
        }
    }

    /// `[[host]]` entries as running instances
    #[must_use]
    pub fn static_instances(&self) -> Vec<InstanceDescription> {
        self.host
            .iter()
            .map(|h| InstanceDescription {
                instance_id: h.id.clone(),
                state: InstanceState::Running,
                public_ip: h.public_addr.clone(),
                private_ip: h.private_addr.clone(),
                public_dns: None,
                security_group_ids: h.security_groups.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetboot_core::Classify;
    use fleetboot_exec::CommandOutput;

    #[test]
    fn test_empty_config_is_tomcat_bootstrap() {
        let config = Config::parse("").unwrap();
        let run = config.bootstrap_config();
        assert_eq!(run.max_concurrency, 10);
        assert_eq!(run.user, "ubuntu");
        assert_eq!(run.port, 22);
        assert_eq!(run.readiness_interval, Duration::from_secs(10));
        assert_eq!(run.connect_retry, RetryPolicy::fixed(5, Duration::from_secs(10)));
        assert_eq!(run.command_retry, RetryPolicy::fixed(3, Duration::from_secs(10)));
        assert!(run.validate().is_ok());

        let names: Vec<String> = config.commands().iter().map(|c| c.name.clone()).collect();
        assert_eq!(
            names,
            vec!["update", "install-pkg", "start-service", "enable-service"]
        );
        assert_eq!(config.cloud.provider, CloudProvider::AwsCli);
        assert_eq!(config.readiness_predicate().name(), "status-checks");
        assert!(config.probe.is_none());
    }

    #[test]
    fn test_exponential_connect_backoff() {
        let config = Config::parse(
            r#"
[bootstrap]
connect_attempts = 6
connect_delay_secs = 2
connect_backoff = "exponential"
connect_max_delay_secs = 30
"#,
        )
        .unwrap();

        let connect = config.bootstrap_config().connect_retry;
        assert_eq!(
            connect,
            RetryPolicy::exponential(6, Duration::from_secs(2), Duration::from_secs(30))
        );
        assert_eq!(connect.backoff.delay_for(5), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_backoff_is_rejected() {
        assert!(Config::parse("[bootstrap]\nconnect_backoff = \"linear\"\n").is_err());
    }

    #[test]
    fn test_inactivity_timeout() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.ssh.inactivity_timeout(), Some(Duration::from_secs(600)));

        let config = Config::parse("[ssh]\ninactivity_timeout_secs = 0\n").unwrap();
        assert_eq!(config.ssh.inactivity_timeout(), None);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[log]
level = "debug"

[ssh]
user = "admin"
key_path = "/keys/fleet.pem"

[bootstrap]
max_concurrency = 3
fleet_deadline_secs = 1800
address = "private"
command_timeout_secs = 300

[readiness]
predicate = "running"

[cloud]
provider = "static"

[[host]]
id = "web-1"
private_addr = "10.0.0.1"
security_groups = ["sg-web"]

[[host]]
id = "web-2"
private_addr = "10.0.0.2"
port = 2222

[classifier]
fatal = ["No space left on device"]

[[command]]
name = "install"
run = "sudo apt-get install -y nginx"
timeout_secs = 120

[probe]
port = 80
path = "/healthz"
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(
            config.ssh.key_source(),
            Some(KeySource::Path("/keys/fleet.pem".into()))
        );

        let run = config.bootstrap_config();
        assert_eq!(run.max_concurrency, 3);
        assert_eq!(run.fleet_deadline, Some(Duration::from_secs(1800)));
        assert_eq!(run.address, AddressPreference::Private);
        assert_eq!(run.command_timeout, Some(Duration::from_secs(300)));
        assert_eq!(run.user, "admin");
        assert_eq!(run.host_overrides.len(), 1);
        assert_eq!(run.host_overrides["web-2"].port, Some(2222));

        assert_eq!(config.readiness_predicate().name(), "running");
        assert_eq!(config.cloud.provider, CloudProvider::Static);

        let instances = config.static_instances();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].security_group_ids, vec!["sg-web"]);

        let commands = config.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].timeout, Some(Duration::from_secs(120)));

        let probe = config.probe.unwrap();
        assert_eq!(probe.port, 80);
        assert_eq!(probe.path, "/healthz");
        assert_eq!(probe.attempts, 5);
    }

    #[test]
    fn test_classifier_extends_base() {
        let section = ClassifierSection {
            fatal: vec!["No space left on device".to_string()],
            ..ClassifierSection::default()
        };
        let classifier = section.build();
        assert!(classifier.fatal.contains(&"No space left on device".to_string()));
        assert!(
            classifier
                .fatal
                .contains(&"has no installation candidate".to_string())
        );

        let out = CommandOutput::new(1, "", "write error: No space left on device");
        let commands = Config {
            classifier: section,
            ..Config::default()
        }
        .commands();
        let verdict = commands[0].classifier.classify(&out).verdict;
        assert_eq!(verdict, Verdict::FatalFailure);
    }

    #[test]
    fn test_exit_status_base_override() {
        let section = ClassifierSection {
            base: ClassifierBase::ExitStatus,
            unmatched_failure: Some(Verdict::FatalFailure),
            ..ClassifierSection::default()
        };
        let classifier = section.build();
        assert!(classifier.fatal.is_empty());
        assert_eq!(classifier.unmatched_failure, Verdict::FatalFailure);
    }

    #[test]
    fn test_instance_filter_from_cloud_section() {
        let config = Config::parse(
            r#"
[cloud]
exclude_instance_ids = ["i-controller"]
"#,
        )
        .unwrap();
        let filter = config.instance_filter();
        assert_eq!(filter.states, vec![InstanceState::Running]);
        assert_eq!(filter.exclude_ids, vec!["i-controller"]);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = Config::parse("[cloud]\nprovider = \"gcp\"\n");
        assert!(err.is_err());
    }
}
