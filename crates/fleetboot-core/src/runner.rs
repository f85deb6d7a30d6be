//! Ordered command execution with classification and retry

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetboot_exec::CommandOutput;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::classify::{Classify, SignatureClassifier, Verdict};
use crate::error::BootstrapError;
use crate::event::FleetEvent;
use crate::host::RemoteHost;
use crate::retry::{Attempt, RetryError, RetryPolicy, retry_with_backoff};

/// One step of a bootstrap sequence
#[derive(Clone)]
pub struct CommandSpec {
    /// Display name
    pub name: String,
    /// Shell command run on the host
    pub command: String,
    pub classifier: Arc<dyn Classify>,
    /// Bound on one execution; the runner default applies when `None`
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Step classified with the apt signatures
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            classifier: Arc::new(SignatureClassifier::apt()),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Classify + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Final status of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Succeeded,
    Fatal,
    RetriesExhausted,
}

/// One execution of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    /// `None` when the transport failed before an exit status arrived
    pub exit_status: Option<i32>,
    pub verdict: Verdict,
    pub reason: Option<String>,
    pub duration: Duration,
}

/// Everything that happened to one command on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub name: String,
    pub command: String,
    pub status: CommandStatus,
    pub attempts: Vec<AttemptRecord>,
    /// Informational warning lines seen across attempts
    pub warnings: Vec<String>,
    /// Why the command did not succeed
    pub reason: Option<String>,
    /// Output of the last execution that produced one
    pub output: Option<CommandOutput>,
}

impl CommandResult {
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Succeeded
    }

    /// Host-level error for a command that stopped the sequence
    #[must_use]
    pub fn failure(&self) -> Option<BootstrapError> {
        let reason = self
            .reason
            .clone()
            .unwrap_or_else(|| "no reason reported".to_string());
        match self.status {
            CommandStatus::Succeeded => None,
            CommandStatus::Fatal => Some(BootstrapError::CommandFatalFailure {
                command: self.name.clone(),
                reason,
            }),
            CommandStatus::RetriesExhausted => Some(BootstrapError::CommandRetriesExhausted {
                command: self.name.clone(),
                attempts: self.attempt_count(),
                reason,
            }),
        }
    }
}

#[derive(Default)]
struct AttemptLog {
    records: Vec<AttemptRecord>,
    warnings: Vec<String>,
    output: Option<CommandOutput>,
}

/// Runs command lists on connected hosts
#[derive(Debug, Clone)]
pub struct CommandRunner {
    policy: RetryPolicy,
    default_timeout: Option<Duration>,
    events: Option<broadcast::Sender<FleetEvent>>,
}

impl CommandRunner {
    /// Runner re-executing retryable failures per `policy`
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            default_timeout: None,
            events: None,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: broadcast::Sender<FleetEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run `commands` in order, stopping at the first one that does not succeed
    pub async fn run(&self, host: &RemoteHost, commands: &[CommandSpec]) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(commands.len());
        self.run_into(host, commands, &mut results).await;
        results
    }

    /// Like `run`, appending each finished command to `results` as it completes
    ///
    /// Returns the error that stopped the sequence, if any.
    pub async fn run_into(
        &self,
        host: &RemoteHost,
        commands: &[CommandSpec],
        results: &mut Vec<CommandResult>,
    ) -> Option<BootstrapError> {
        for spec in commands {
            let result = self.run_one(host, spec).await;

            if let Some(tx) = &self.events {
                let _ = tx.send(FleetEvent::CommandFinished {
                    host: host.id().to_string(),
                    command: result.name.clone(),
                    status: result.status,
                    attempts: result.attempt_count(),
                });
            }

            let failure = result.failure();
            results.push(result);
            if failure.is_some() {
                return failure;
            }
        }
        None
    }

    /// Execute one command until it succeeds, fails fatally, or runs out of attempts
    ///
    /// Transport errors count as retryable when the executor says so and as
    /// fatal otherwise.
    #[instrument(skip(self, host, spec), fields(host = %host.id(), command = %spec.name))]
    pub async fn run_one(&self, host: &RemoteHost, spec: &CommandSpec) -> CommandResult {
        let log = Mutex::new(AttemptLog::default());
        let timeout = spec.timeout.or(self.default_timeout);

        let outcome = retry_with_backoff(&self.policy, |attempt| {
            let log = &log;
            async move {
                let started = Instant::now();
                let executed = match timeout {
                    Some(t) => host.execute_with_timeout(&spec.command, t).await,
                    None => host.execute(&spec.command).await,
                };
                let duration = started.elapsed();

                let (record, output) = match executed {
                    Ok(output) => {
                        let classification = spec.classifier.classify(&output);
                        let record = AttemptRecord {
                            attempt,
                            exit_status: Some(output.status),
                            verdict: classification.verdict,
                            reason: classification.reason,
                            duration,
                        };
                        let mut log = log.lock().unwrap_or_else(|e| e.into_inner());
                        for w in classification.warnings {
                            if !log.warnings.contains(&w) {
                                log.warnings.push(w);
                            }
                        }
                        (record, Some(output))
                    }
                    Err(e) => {
                        let verdict = if e.is_retryable() {
                            Verdict::RetryableFailure
                        } else {
                            Verdict::FatalFailure
                        };
                        let record = AttemptRecord {
                            attempt,
                            exit_status: None,
                            verdict,
                            reason: Some(e.to_string()),
                            duration,
                        };
                        (record, None)
                    }
                };

                let verdict = record.verdict;
                let reason = record.reason.clone().unwrap_or_default();
                {
                    let mut log = log.lock().unwrap_or_else(|e| e.into_inner());
                    log.records.push(record);
                    if output.is_some() {
                        log.output = output;
                    }
                }

                match verdict {
                    Verdict::Success => Attempt::Done(()),
                    Verdict::RetryableFailure => {
                        warn!(attempt, reason = %reason, "command failed, retryable");
                        Attempt::Retry(reason)
                    }
                    Verdict::FatalFailure => Attempt::Abort(reason),
                }
            }
        })
        .await;

        let log = log.into_inner().unwrap_or_else(|e| e.into_inner());
        let (status, reason) = match outcome {
            Ok(done) => {
                info!(attempts = done.attempts, "command succeeded");
                (CommandStatus::Succeeded, None)
            }
            Err(RetryError::Aborted { attempts, error }) => {
                error!(attempts, reason = %error, "command failed fatally");
                (CommandStatus::Fatal, Some(error))
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(attempts, reason = %last, "command retries exhausted");
                (CommandStatus::RetriesExhausted, Some(last))
            }
        };

        CommandResult {
            name: spec.name.clone(),
            command: spec.command.clone(),
            status,
            attempts: log.records,
            warnings: log.warnings,
            reason,
            output: log.output,
        }
    }
}
