//! Per-host result of a bootstrap run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, FailureKind};
use crate::host::HostDescriptor;
use crate::runner::CommandResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
}

/// Why a host failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&BootstrapError> for HostFailure {
    fn from(error: &BootstrapError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Final record for one host
///
/// A failed outcome always carries a `failure`; a succeeded one never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOutcome {
    pub host: HostDescriptor,
    pub status: OutcomeStatus,
    pub failure: Option<HostFailure>,
    pub commands: Vec<CommandResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HostOutcome {
    pub fn succeeded(
        host: HostDescriptor,
        commands: Vec<CommandResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            host,
            status: OutcomeStatus::Succeeded,
            failure: None,
            commands,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        host: HostDescriptor,
        error: &BootstrapError,
        commands: Vec<CommandResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            host,
            status: OutcomeStatus::Failed,
            failure: Some(HostFailure::from(error)),
            commands,
            started_at,
            finished_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// Wall-clock time spent on the host
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
