//! Concurrent bootstrap of many hosts
//!
//! One tokio task per host, bounded by a semaphore. Each task owns its
//! session and hands its `HostOutcome` back through its `JoinHandle`.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetboot_cloud::ControlPlane;
use fleetboot_exec::Connector;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, CoreError};
use crate::event::FleetEvent;
use crate::host::{HostDescriptor, RemoteHost};
use crate::outcome::HostOutcome;
use crate::probe::HealthProbe;
use crate::readiness::{ReadinessPoller, ReadinessPredicate, ReadinessState};
use crate::report::{FleetReport, ResultAggregator};
use crate::retry::{Attempt, retry_with_backoff};
use crate::runner::{CommandResult, CommandRunner, CommandSpec};
use crate::state::{BootstrapPhase, PhaseTracker};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bootstraps fleets of hosts concurrently
#[derive(Clone)]
pub struct FleetOrchestrator {
    config: Arc<BootstrapConfig>,
    connector: Arc<dyn Connector>,
    poller: ReadinessPoller,
    probe: Option<Arc<dyn HealthProbe>>,
    events: broadcast::Sender<FleetEvent>,
}

impl FleetOrchestrator {
    /// Create an orchestrator
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` if `config` fails validation.
    pub fn new(
        config: BootstrapConfig,
        connector: Arc<dyn Connector>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            connector,
            poller: ReadinessPoller::new(control_plane),
            probe: None,
            events,
        })
    }

    /// Verify each host with `probe` after its commands succeed
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    /// Bootstrap every host and report once all of them settle
    ///
    /// Never fails: every host ends up in the report, succeeded or failed,
    /// in submission order.
    pub async fn bootstrap(
        &self,
        hosts: Vec<HostDescriptor>,
        readiness: &ReadinessPredicate,
        commands: &[CommandSpec],
    ) -> FleetReport {
        let total = hosts.len();
        let max_concurrency = self.config.max_concurrency;
        let fleet_deadline = self.config.fleet_deadline.map(|d| Instant::now() + d);

        info!(
            hosts = total,
            max_concurrency,
            commands = commands.len(),
            readiness = readiness.name(),
            "starting fleet bootstrap"
        );
        let _ = self.events.send(FleetEvent::FleetStarted {
            hosts: total,
            max_concurrency,
        });

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let commands: Arc<[CommandSpec]> = Arc::from(commands.to_vec());

        let handles: Vec<JoinHandle<HostOutcome>> = hosts
            .iter()
            .cloned()
            .map(|host| {
                let span = info_span!("host", host = %host.id);
                let task = HostTask {
                    config: Arc::clone(&self.config),
                    connector: Arc::clone(&self.connector),
                    poller: self.poller.clone(),
                    probe: self.probe.clone(),
                    events: self.events.clone(),
                    readiness: readiness.clone(),
                    commands: Arc::clone(&commands),
                };
                tokio::spawn(
                    task.run(host, Arc::clone(&semaphore), fleet_deadline)
                        .instrument(span),
                )
            })
            .collect();

        let mut aggregator = ResultAggregator::new(hosts.clone());
        let grace = self.config.fleet_grace;

        for (index, (host, mut handle)) in hosts.into_iter().zip(handles).enumerate() {
            let joined = match fleet_deadline {
                Some(deadline) => timeout_at(deadline + grace, &mut handle).await,
                None => Ok((&mut handle).await),
            };

            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_error)) => {
                    let err = join_failure(join_error);
                    error!(host = %host.id, error = %err, "bootstrap task did not complete");
                    self.settle_outside_task(host, &err)
                }
                Err(_) => {
                    handle.abort();
                    warn!(host = %host.id, "fleet deadline elapsed, aborting host task");
                    self.settle_outside_task(host, &BootstrapError::FleetTimeout)
                }
            };
            aggregator.record(index, outcome);
        }

        let report = aggregator.finish();
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "fleet bootstrap finished"
        );
        let _ = self.events.send(FleetEvent::FleetFinished {
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
        });

        report
    }

    /// Outcome for a host whose task could not report one itself
    fn settle_outside_task(&self, host: HostDescriptor, err: &BootstrapError) -> HostOutcome {
        let _ = self.events.send(FleetEvent::HostFinished {
            host: host.id.clone(),
            succeeded: false,
            failure: Some(err.kind()),
        });
        HostOutcome::failed(host, err, Vec::new(), Utc::now())
    }
}

fn join_failure(join_error: JoinError) -> BootstrapError {
    if join_error.is_panic() {
        BootstrapError::TaskPanicked(panic_message(join_error.into_panic()))
    } else {
        BootstrapError::FleetTimeout
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Everything one host's task needs, owned
struct HostTask {
    config: Arc<BootstrapConfig>,
    connector: Arc<dyn Connector>,
    poller: ReadinessPoller,
    probe: Option<Arc<dyn HealthProbe>>,
    events: broadcast::Sender<FleetEvent>,
    readiness: ReadinessPredicate,
    commands: Arc<[CommandSpec]>,
}

impl HostTask {
    async fn run(
        self,
        host: HostDescriptor,
        semaphore: Arc<Semaphore>,
        fleet_deadline: Option<Instant>,
    ) -> HostOutcome {
        let started_at = Utc::now();
        let mut tracker = PhaseTracker::new(host.id.clone(), Some(self.events.clone()));

        let permit = match fleet_deadline {
            Some(deadline) => timeout_at(deadline, semaphore.acquire_owned())
                .await
                .ok()
                .and_then(Result::ok),
            None => semaphore.acquire_owned().await.ok(),
        };
        let permit = permit.filter(|_| fleet_deadline.is_none_or(|d| Instant::now() < d));
        let Some(permit) = permit else {
            let waited = Err(BootstrapError::FleetTimeout);
            return self.finish(host, &mut tracker, waited, Vec::new(), started_at);
        };

        let per_host = self.config.per_host_timeout;
        let host_deadline = Instant::now() + per_host;
        let (deadline, expired) = match fleet_deadline {
            Some(fleet) if fleet < host_deadline => (fleet, BootstrapError::FleetTimeout),
            _ => (host_deadline, BootstrapError::HostTimeout(per_host)),
        };

        let mut session: Option<RemoteHost> = None;
        let mut results: Vec<CommandResult> = Vec::new();

        let result = match timeout_at(
            deadline,
            self.sequence(&host, &mut tracker, &mut session, &mut results),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(error = %expired, "host sequence cut short");
                Err(expired)
            }
        };

        if let Some(remote) = session.take()
            && timeout(SESSION_CLOSE_TIMEOUT, remote.close()).await.is_err()
        {
            warn!("timed out closing session");
        }
        drop(permit);

        self.finish(host, &mut tracker, result, results, started_at)
    }

    /// Readiness, connection, commands and probe; the session and finished
    /// command results live in the caller's slots so they survive a timeout
    async fn sequence(
        &self,
        host: &HostDescriptor,
        tracker: &mut PhaseTracker,
        session: &mut Option<RemoteHost>,
        results: &mut Vec<CommandResult>,
    ) -> Result<(), BootstrapError> {
        let config = &self.config;

        tracker.advance(BootstrapPhase::WaitingReady);
        let readiness = self
            .poller
            .poll(
                host,
                &self.readiness,
                config.readiness_interval,
                config.readiness_timeout,
            )
            .await;
        if readiness.state != ReadinessState::Ready {
            return Err(if readiness.timed_out {
                BootstrapError::ReadinessTimeout {
                    timeout: config.readiness_timeout,
                    detail: readiness.detail(),
                }
            } else {
                BootstrapError::ReadinessFailed(readiness.failure_reason())
            });
        }

        tracker.advance(BootstrapPhase::Connecting);
        let info = config
            .connection_info(host)
            .ok_or_else(|| BootstrapError::ConnectionFailed {
                attempts: 0,
                message: "host has no address".to_string(),
            })?;
        let remote = session.insert(
            RemoteHost::connect(
                self.connector.as_ref(),
                &host.id,
                &info,
                &config.connect_retry,
            )
            .await?,
        );

        tracker.advance(BootstrapPhase::Running);
        let runner = CommandRunner::new(config.command_retry)
            .with_default_timeout(config.command_timeout)
            .with_events(self.events.clone());
        if let Some(err) = runner.run_into(remote, &self.commands, results).await {
            return Err(err);
        }

        if let Some(probe) = &self.probe {
            tracker.advance(BootstrapPhase::Verifying);
            let addr = info.host.as_str();
            let verified = retry_with_backoff(&config.probe_retry, |attempt| async move {
                match probe.check(addr).await {
                    Ok(()) => Attempt::Done(()),
                    Err(reason) => {
                        warn!(attempt, probe = probe.probe_type(), reason = %reason, "health probe failed");
                        Attempt::Retry(reason)
                    }
                }
            })
            .await;
            if let Err(e) = verified {
                let attempts = e.attempts();
                return Err(BootstrapError::HealthCheckFailed(format!(
                    "{} (after {attempts} attempt(s))",
                    e.into_inner()
                )));
            }
        }

        Ok(())
    }

    fn finish(
        &self,
        host: HostDescriptor,
        tracker: &mut PhaseTracker,
        result: Result<(), BootstrapError>,
        commands: Vec<CommandResult>,
        started_at: chrono::DateTime<Utc>,
    ) -> HostOutcome {
        let outcome = match result {
            Ok(()) => {
                tracker.advance(BootstrapPhase::Succeeded);
                info!(commands = commands.len(), "host bootstrapped");
                HostOutcome::succeeded(host, commands, started_at)
            }
            Err(err) => {
                tracker.advance(BootstrapPhase::Failed);
                error!(kind = %err.kind(), error = %err, "host bootstrap failed");
                HostOutcome::failed(host, &err, commands, started_at)
            }
        };

        let _ = self.events.send(FleetEvent::HostFinished {
            host: outcome.host.id.clone(),
            succeeded: outcome.is_success(),
            failure: outcome.failure_kind(),
        });

        outcome
    }
}
