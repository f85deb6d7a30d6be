//! Progress events broadcast during a fleet run

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::runner::CommandStatus;
use crate::state::BootstrapPhase;

/// Event emitted on the orchestrator's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FleetEvent {
    FleetStarted {
        hosts: usize,
        max_concurrency: usize,
    },
    HostPhaseChanged {
        host: String,
        from: BootstrapPhase,
        to: BootstrapPhase,
    },
    CommandFinished {
        host: String,
        command: String,
        status: CommandStatus,
        attempts: u32,
    },
    HostFinished {
        host: String,
        succeeded: bool,
        failure: Option<FailureKind>,
    },
    FleetFinished {
        succeeded: usize,
        failed: usize,
    },
}

impl FleetEvent {
    /// Host the event concerns, if any
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match self {
            FleetEvent::HostPhaseChanged { host, .. }
            | FleetEvent::CommandFinished { host, .. }
            | FleetEvent::HostFinished { host, .. } => Some(host),
            FleetEvent::FleetStarted { .. } | FleetEvent::FleetFinished { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_internally_tagged() {
        let event = FleetEvent::HostPhaseChanged {
            host: "i-0abc".to_string(),
            from: BootstrapPhase::Connecting,
            to: BootstrapPhase::Running,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "HostPhaseChanged");
        assert_eq!(json["to"], "running");
        assert_eq!(event.host(), Some("i-0abc"));
        assert_eq!(
            FleetEvent::FleetFinished {
                succeeded: 1,
                failed: 0
            }
            .host(),
            None
        );
    }
}
