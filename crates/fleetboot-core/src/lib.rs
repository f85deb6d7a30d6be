//! fleetboot-core: Fleet bootstrap orchestration
//!
//! Waits for hosts to become ready, connects to them concurrently, runs an
//! ordered command list on each with classification and retry, and merges
//! the per-host outcomes into a `FleetReport`. The `OrchestratorActor` wraps
//! the same logic behind kameo messages.

pub mod actor;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod host;
pub mod message;
pub mod orchestrator;
pub mod outcome;
pub mod probe;
pub mod readiness;
pub mod report;
pub mod retry;
pub mod runner;
pub mod state;

pub use actor::{OrchestratorActor, OrchestratorActorArgs};
pub use classify::{Classification, Classify, SignatureClassifier, Verdict};
pub use config::{AddressPreference, BootstrapConfig, HostCredentials};
pub use discovery::discover_hosts;
pub use error::{BootstrapError, CoreError, FailureKind};
pub use event::FleetEvent;
pub use host::{HostDescriptor, RemoteHost};
pub use message::{
    BootstrapFleet, GetLastReport, LastReport, ListHosts, RegisterHost, UnregisterHost,
};
pub use orchestrator::FleetOrchestrator;
pub use outcome::{HostFailure, HostOutcome, OutcomeStatus};
pub use probe::{HealthProbe, HttpProbe};
pub use readiness::{ReadinessPoller, ReadinessPredicate, ReadinessReport, ReadinessState};
pub use report::{
    FailedHost, FleetReport, HostAddresses, ResultAggregator, TargetRegistration, aggregate,
};
pub use retry::{Attempt, Backoff, Retried, RetryError, RetryPolicy, retry_with_backoff};
pub use runner::{AttemptRecord, CommandResult, CommandRunner, CommandSpec, CommandStatus};
pub use state::BootstrapPhase;
