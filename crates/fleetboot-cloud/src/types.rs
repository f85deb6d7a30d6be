//! Instance type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Lifecycle and checks
// ============================================================================

/// Instance lifecycle state as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    /// Wire name (`running`, `shutting-down`, ...)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Unknown => "unknown",
        }
    }

    /// Whether the instance can no longer become usable without intervention
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::ShuttingDown
                | InstanceState::Terminated
                | InstanceState::Stopping
                | InstanceState::Stopped
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a system or instance reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckStatus {
    Ok,
    Impaired,
    Initializing,
    InsufficientData,
    NotApplicable,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Impaired => "impaired",
            CheckStatus::Initializing => "initializing",
            CheckStatus::InsufficientData => "insufficient-data",
            CheckStatus::NotApplicable => "not-applicable",
            CheckStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Status and description
// ============================================================================

/// One instance's state plus its two status checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub state: InstanceState,
    pub system_status: CheckStatus,
    pub instance_status: CheckStatus,
}

impl InstanceStatus {
    /// Create a status record
    pub fn new(
        instance_id: impl Into<String>,
        state: InstanceState,
        system_status: CheckStatus,
        instance_status: CheckStatus,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            state,
            system_status,
            instance_status,
        }
    }

    /// Running with both checks passing
    #[must_use]
    pub fn checks_passed(&self) -> bool {
        self.state == InstanceState::Running
            && self.system_status == CheckStatus::Ok
            && self.instance_status == CheckStatus::Ok
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} state={} system={} instance={}",
            self.instance_id, self.state, self.system_status, self.instance_status
        )
    }
}

/// An instance with its addressing and security groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub state: InstanceState,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_dns: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

// ============================================================================
// Filter
// ============================================================================

/// Selects instances for `describe_instances`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceFilter {
    /// Only these lifecycle states (empty means any)
    #[serde(default)]
    pub states: Vec<InstanceState>,
    /// Only these instance ids (empty means any)
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Never return these instance ids
    #[serde(default)]
    pub exclude_ids: Vec<String>,
}

impl InstanceFilter {
    /// Running instances only
    #[must_use]
    pub fn running() -> Self {
        Self {
            states: vec![InstanceState::Running],
            ..Self::default()
        }
    }

    /// Exclude instance ids (e.g. the controller running fleetboot)
    #[must_use]
    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Whether an instance passes every clause
    #[must_use]
    pub fn matches(&self, instance: &InstanceDescription) -> bool {
        if self.exclude_ids.contains(&instance.instance_id) {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&instance.state) {
            return false;
        }
        self.instance_ids.is_empty() || self.instance_ids.contains(&instance.instance_id)
    }
}
