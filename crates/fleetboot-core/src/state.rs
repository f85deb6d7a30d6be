//! Per-host bootstrap phase machine

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::FleetEvent;

/// Where a host is in its bootstrap sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    Queued,
    WaitingReady,
    Connecting,
    Running,
    Verifying,
    Succeeded,
    Failed,
}

impl BootstrapPhase {
    /// Whether the phase ends the sequence
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapPhase::Succeeded | BootstrapPhase::Failed)
    }

    /// Check if a transition is allowed
    ///
    /// Any non-terminal phase may fail. `Verifying` is skipped when no
    /// health probe is configured.
    #[must_use]
    pub fn can_transition_to(&self, next: BootstrapPhase) -> bool {
        use BootstrapPhase::{Connecting, Failed, Queued, Running, Succeeded, Verifying, WaitingReady};

        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Queued, WaitingReady)
            | (WaitingReady, Connecting)
            | (Connecting, Running)
            | (Running, Verifying | Succeeded)
            | (Verifying, Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootstrapPhase::Queued => "queued",
            BootstrapPhase::WaitingReady => "waiting_ready",
            BootstrapPhase::Connecting => "connecting",
            BootstrapPhase::Running => "running",
            BootstrapPhase::Verifying => "verifying",
            BootstrapPhase::Succeeded => "succeeded",
            BootstrapPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks one host's phase and announces transitions
pub(crate) struct PhaseTracker {
    host: String,
    phase: BootstrapPhase,
    events: Option<broadcast::Sender<FleetEvent>>,
}

impl PhaseTracker {
    pub(crate) fn new(host: impl Into<String>, events: Option<broadcast::Sender<FleetEvent>>) -> Self {
        Self {
            host: host.into(),
            phase: BootstrapPhase::Queued,
            events,
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// Move to `next`, ignoring invalid transitions
    pub(crate) fn advance(&mut self, next: BootstrapPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(host = %self.host, from = %self.phase, to = %next, "invalid phase transition");
            return;
        }

        let from = self.phase;
        self.phase = next;
        debug!(host = %self.host, from = %from, to = %next, "phase transition");

        if let Some(tx) = &self.events {
            let _ = tx.send(FleetEvent::HostPhaseChanged {
                host: self.host.clone(),
                from,
                to: next,
            });
        }
    }
}
