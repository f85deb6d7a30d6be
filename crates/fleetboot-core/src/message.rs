//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use kameo_macros::Reply;

use crate::host::HostDescriptor;
use crate::readiness::ReadinessPredicate;
use crate::report::FleetReport;
use crate::runner::CommandSpec;

// ============================================================================
// OrchestratorActor Messages
// ============================================================================

/// Add a host to the registry
#[derive(Debug)]
pub struct RegisterHost {
    pub host: HostDescriptor,
}

/// Remove a host from the registry
#[derive(Debug)]
pub struct UnregisterHost {
    /// Instance id to remove
    pub id: String,
}

/// List registered hosts in registration order
#[derive(Debug)]
pub struct ListHosts;

/// Bootstrap every registered host
#[derive(Debug)]
pub struct BootstrapFleet {
    pub readiness: ReadinessPredicate,
    pub commands: Vec<CommandSpec>,
}

/// Fetch the report of the most recent `BootstrapFleet`
#[derive(Debug)]
pub struct GetLastReport;

/// Most recent report, if a run has finished
#[derive(Debug, Clone, Reply)]
pub struct LastReport {
    pub report: Option<FleetReport>,
}
