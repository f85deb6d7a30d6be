//! Waiting for instances to become usable

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetboot_cloud::{ControlPlane, InstanceState, InstanceStatus};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::host::HostDescriptor;
use crate::retry::{Attempt, RetryError, RetryPolicy, retry_with_backoff};

/// Readiness of one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Pending,
    Ready,
    Failed,
}

type CheckFn = dyn Fn(&InstanceStatus) -> ReadinessState + Send + Sync;

/// Decides readiness from an instance status
#[derive(Clone)]
pub struct ReadinessPredicate {
    name: String,
    check: Option<Arc<CheckFn>>,
}

impl ReadinessPredicate {
    /// Running with system and instance checks `ok`
    ///
    /// Stopping, stopped, shutting-down and terminated instances fail.
    #[must_use]
    pub fn status_checks_ok() -> Self {
        Self::from_fn("status-checks", |status| {
            if status.state.is_terminal() {
                ReadinessState::Failed
            } else if status.checks_passed() {
                ReadinessState::Ready
            } else {
                ReadinessState::Pending
            }
        })
    }

    /// Lifecycle state `running`, checks ignored
    #[must_use]
    pub fn running() -> Self {
        Self::from_fn("running", |status| match status.state {
            InstanceState::Running => ReadinessState::Ready,
            s if s.is_terminal() => ReadinessState::Failed,
            _ => ReadinessState::Pending,
        })
    }

    /// Ready without asking the control plane
    #[must_use]
    pub fn always_ready() -> Self {
        Self {
            name: "none".to_string(),
            check: None,
        }
    }

    /// Custom predicate
    pub fn from_fn<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&InstanceStatus) -> ReadinessState + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Some(Arc::new(check)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against a status
    #[must_use]
    pub fn evaluate(&self, status: &InstanceStatus) -> ReadinessState {
        match &self.check {
            Some(check) => check(status),
            None => ReadinessState::Ready,
        }
    }

    fn needs_polling(&self) -> bool {
        self.check.is_some()
    }
}

impl fmt::Debug for ReadinessPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// What a readiness wait observed
#[derive(Debug, Clone)]
pub struct ReadinessReport {
    pub state: ReadinessState,
    /// Control-plane queries made
    pub polls: u32,
    pub last_status: Option<InstanceStatus>,
    pub last_error: Option<String>,
    /// Failed because the timeout elapsed, not because of a terminal status
    pub timed_out: bool,
    /// Failed because the control plane rejected the query outright
    pub query_failed: bool,
    pub elapsed: Duration,
}

impl ReadinessReport {
    /// Last thing seen, for error messages
    #[must_use]
    pub fn detail(&self) -> String {
        match (&self.last_status, &self.last_error) {
            (_, Some(error)) => error.clone(),
            (Some(status), None) => status.to_string(),
            (None, None) => "no status reported".to_string(),
        }
    }

    /// Why a wait that neither succeeded nor timed out ended
    #[must_use]
    pub fn failure_reason(&self) -> String {
        if self.query_failed {
            format!("status query failed: {}", self.detail())
        } else {
            format!("terminal status: {}", self.detail())
        }
    }
}

#[derive(Default)]
struct Trace {
    polls: u32,
    last_status: Option<InstanceStatus>,
    last_error: Option<String>,
    query_failed: bool,
}

/// Polls the control plane until a host satisfies a predicate
#[derive(Clone)]
pub struct ReadinessPoller {
    control_plane: Arc<dyn ControlPlane>,
}

impl ReadinessPoller {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Wait until `host` is ready, failed, or `timeout` elapses
    pub async fn await_ready(
        &self,
        host: &HostDescriptor,
        predicate: &ReadinessPredicate,
        interval: Duration,
        timeout: Duration,
    ) -> ReadinessState {
        self.poll(host, predicate, interval, timeout).await.state
    }

    /// Like `await_ready`, returning what was observed along the way
    ///
    /// Query errors that the control plane marks retryable, outages included,
    /// are polled through until the deadline; definitive ones such as
    /// rejected credentials fail immediately. A host missing
    /// from the response counts as pending.
    #[instrument(skip(self, host, predicate), fields(host = %host.id, predicate = %predicate.name))]
    pub async fn poll(
        &self,
        host: &HostDescriptor,
        predicate: &ReadinessPredicate,
        interval: Duration,
        timeout: Duration,
    ) -> ReadinessReport {
        let started = Instant::now();

        if !predicate.needs_polling() {
            return ReadinessReport {
                state: ReadinessState::Ready,
                polls: 0,
                last_status: None,
                last_error: None,
                timed_out: false,
                query_failed: false,
                elapsed: Duration::ZERO,
            };
        }

        let trace = Mutex::new(Trace::default());
        let ids = [host.id.clone()];
        let policy = RetryPolicy::polling(interval, timeout);

        let waited = tokio::time::timeout(
            timeout,
            retry_with_backoff(&policy, |attempt| {
                let trace = &trace;
                let ids = &ids;
                async move {
                    let response = self.control_plane.describe_instance_status(ids).await;
                    let mut trace = trace.lock().unwrap_or_else(|e| e.into_inner());
                    trace.polls = attempt;

                    match response {
                        Ok(statuses) => {
                            trace.last_error = None;
                            let Some(status) =
                                statuses.into_iter().find(|s| s.instance_id == ids[0])
                            else {
                                debug!(attempt, "no status reported yet");
                                return Attempt::Retry(());
                            };
                            let state = predicate.evaluate(&status);
                            debug!(attempt, status = %status, state = ?state, "readiness poll");
                            trace.last_status = Some(status);
                            match state {
                                ReadinessState::Ready => Attempt::Done(()),
                                ReadinessState::Failed => Attempt::Abort(()),
                                ReadinessState::Pending => Attempt::Retry(()),
                            }
                        }
                        Err(e) if e.is_retryable() => {
                            warn!(attempt, error = %e, "status query failed, will retry");
                            trace.last_error = Some(e.to_string());
                            Attempt::Retry(())
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "status query rejected");
                            trace.last_error = Some(e.to_string());
                            trace.query_failed = true;
                            Attempt::Abort(())
                        }
                    }
                }
            }),
        )
        .await;

        let (state, timed_out) = match waited {
            Ok(Ok(_)) => (ReadinessState::Ready, false),
            Ok(Err(RetryError::Aborted { .. })) => (ReadinessState::Failed, false),
            Ok(Err(RetryError::Exhausted { .. })) | Err(_) => {
                (ReadinessState::Failed, true)
            }
        };

        let trace = trace.into_inner().unwrap_or_else(|e| e.into_inner());
        let report = ReadinessReport {
            state,
            polls: trace.polls,
            last_status: trace.last_status,
            last_error: trace.last_error,
            timed_out,
            query_failed: trace.query_failed,
            elapsed: started.elapsed(),
        };

        match report.state {
            ReadinessState::Ready => info!(polls = report.polls, "host ready"),
            _ => warn!(
                polls = report.polls,
                timed_out = report.timed_out,
                detail = %report.detail(),
                "host not ready"
            ),
        }

        report
    }
}
