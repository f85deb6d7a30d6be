//! Fleet-wide report built from per-host outcomes

use chrono::{DateTime, Utc};
use kameo_macros::Reply;
use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, FailureKind};
use crate::host::HostDescriptor;
use crate::outcome::HostOutcome;

/// A host's id with its address pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAddresses {
    pub id: String,
    pub public_addr: Option<String>,
    pub private_addr: Option<String>,
}

/// A failed host with its address pair and reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedHost {
    pub id: String,
    pub public_addr: Option<String>,
    pub private_addr: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

/// Result of bootstrapping a fleet
///
/// `outcomes` keeps submission order; `succeeded` and `failed` partition it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Reply)]
pub struct FleetReport {
    pub outcomes: Vec<HostOutcome>,
    pub succeeded: Vec<HostAddresses>,
    pub failed: Vec<FailedHost>,
    pub generated_at: DateTime<Utc>,
}

impl FleetReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn succeeded_ids(&self) -> Vec<&str> {
        self.succeeded.iter().map(|h| h.id.as_str()).collect()
    }

    #[must_use]
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|h| h.id.as_str()).collect()
    }

    #[must_use]
    pub fn succeeded_public_addrs(&self) -> Vec<&str> {
        self.succeeded
            .iter()
            .filter_map(|h| h.public_addr.as_deref())
            .collect()
    }

    #[must_use]
    pub fn succeeded_private_addrs(&self) -> Vec<&str> {
        self.succeeded
            .iter()
            .filter_map(|h| h.private_addr.as_deref())
            .collect()
    }

    #[must_use]
    pub fn failed_public_addrs(&self) -> Vec<&str> {
        self.failed
            .iter()
            .filter_map(|h| h.public_addr.as_deref())
            .collect()
    }

    #[must_use]
    pub fn failed_private_addrs(&self) -> Vec<&str> {
        self.failed
            .iter()
            .filter_map(|h| h.private_addr.as_deref())
            .collect()
    }

    /// Outcome for a host id
    #[must_use]
    pub fn outcome(&self, id: &str) -> Option<&HostOutcome> {
        self.outcomes.iter().find(|o| o.host.id == id)
    }

    /// Instance and security-group ids of the succeeded hosts
    #[must_use]
    pub fn target_registration(&self) -> TargetRegistration {
        let mut security_group_ids: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| o.is_success())
            .flat_map(|o| o.host.security_group_ids.iter().cloned())
            .collect();
        security_group_ids.sort();
        security_group_ids.dedup();

        TargetRegistration {
            instance_ids: self.succeeded.iter().map(|h| h.id.clone()).collect(),
            security_group_ids,
        }
    }
}

/// Hand-off for target-group registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRegistration {
    pub instance_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// Partition outcomes into a report
#[must_use]
pub fn aggregate(outcomes: Vec<HostOutcome>) -> FleetReport {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    for outcome in &outcomes {
        let host = &outcome.host;
        match &outcome.failure {
            None if outcome.is_success() => succeeded.push(HostAddresses {
                id: host.id.clone(),
                public_addr: host.public_addr.clone(),
                private_addr: host.private_addr.clone(),
            }),
            failure => {
                let (kind, message) = failure.as_ref().map_or_else(
                    || (FailureKind::TaskPanicked, "no failure recorded".to_string()),
                    |f| (f.kind, f.message.clone()),
                );
                failed.push(FailedHost {
                    id: host.id.clone(),
                    public_addr: host.public_addr.clone(),
                    private_addr: host.private_addr.clone(),
                    kind,
                    message,
                });
            }
        }
    }

    FleetReport {
        outcomes,
        succeeded,
        failed,
        generated_at: Utc::now(),
    }
}

/// Collects outcomes by submission index
///
/// Hosts that never reported are marked `FleetTimeout` on `finish`.
#[derive(Debug)]
pub struct ResultAggregator {
    hosts: Vec<HostDescriptor>,
    slots: Vec<Option<HostOutcome>>,
    started_at: DateTime<Utc>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new(hosts: Vec<HostDescriptor>) -> Self {
        let slots = vec![None; hosts.len()];
        Self {
            hosts,
            slots,
            started_at: Utc::now(),
        }
    }

    /// Store the outcome for the host at `index`; later records replace earlier ones
    pub fn record(&mut self, index: usize, outcome: HostOutcome) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(outcome);
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    #[must_use]
    pub fn finish(self) -> FleetReport {
        let started_at = self.started_at;
        let outcomes = self
            .hosts
            .into_iter()
            .zip(self.slots)
            .map(|(host, slot)| {
                slot.unwrap_or_else(|| {
                    HostOutcome::failed(host, &BootstrapError::FleetTimeout, Vec::new(), started_at)
                })
            })
            .collect();
        aggregate(outcomes)
    }
}
