//! `OrchestratorActor`: fleet registry and bootstrap runs
//!
//! Keeps the registered hosts and runs `FleetOrchestrator::bootstrap` over
//! them on request.

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::host::HostDescriptor;
use crate::message::{
    BootstrapFleet, GetLastReport, LastReport, ListHosts, RegisterHost, UnregisterHost,
};
use crate::orchestrator::FleetOrchestrator;
use crate::report::FleetReport;

/// Arguments for spawning an `OrchestratorActor`
pub struct OrchestratorActorArgs {
    /// Orchestrator used for bootstrap runs
    pub orchestrator: FleetOrchestrator,
    /// Hosts registered at start
    pub hosts: Vec<HostDescriptor>,
}

impl OrchestratorActorArgs {
    #[must_use]
    pub fn new(orchestrator: FleetOrchestrator) -> Self {
        Self {
            orchestrator,
            hosts: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hosts(mut self, hosts: Vec<HostDescriptor>) -> Self {
        self.hosts = hosts;
        self
    }
}

/// Fleet actor owning the host registry
pub struct OrchestratorActor {
    /// Registered hosts in registration order
    hosts: Vec<HostDescriptor>,
    orchestrator: FleetOrchestrator,
    last_report: Option<FleetReport>,
}

impl OrchestratorActor {
    fn position(&self, id: &str) -> Option<usize> {
        self.hosts.iter().position(|h| h.id == id)
    }
}

impl Actor for OrchestratorActor {
    type Args = OrchestratorActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), hosts = args.hosts.len(), "OrchestratorActor starting");

        let mut actor = Self {
            hosts: Vec::with_capacity(args.hosts.len()),
            orchestrator: args.orchestrator,
            last_report: None,
        };
        for host in args.hosts {
            if actor.position(&host.id).is_some() {
                return Err(CoreError::HostAlreadyExists(host.id));
            }
            actor.hosts.push(host);
        }

        Ok(actor)
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, hosts = self.hosts.len(), "OrchestratorActor stopping");
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<RegisterHost> for OrchestratorActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: RegisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.position(&msg.host.id).is_some() {
            return Err(CoreError::HostAlreadyExists(msg.host.id));
        }

        info!(host = %msg.host.id, "registered host");
        self.hosts.push(msg.host);
        Ok(())
    }
}

impl Message<UnregisterHost> for OrchestratorActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: UnregisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match self.position(&msg.id) {
            Some(index) => {
                self.hosts.remove(index);
                info!(host = %msg.id, "unregistered host");
                Ok(())
            }
            None => Err(CoreError::HostNotFound(msg.id)),
        }
    }
}

impl Message<ListHosts> for OrchestratorActor {
    type Reply = Vec<HostDescriptor>;

    async fn handle(
        &mut self,
        _msg: ListHosts,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.hosts.clone()
    }
}

impl Message<BootstrapFleet> for OrchestratorActor {
    type Reply = Result<FleetReport, CoreError>;

    async fn handle(
        &mut self,
        msg: BootstrapFleet,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.hosts.is_empty() {
            warn!("bootstrap requested with no registered hosts");
        }

        let report = self
            .orchestrator
            .bootstrap(self.hosts.clone(), &msg.readiness, &msg.commands)
            .await;

        self.last_report = Some(report.clone());
        Ok(report)
    }
}

impl Message<GetLastReport> for OrchestratorActor {
    type Reply = LastReport;

    async fn handle(
        &mut self,
        _msg: GetLastReport,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        LastReport {
            report: self.last_report.clone(),
        }
    }
}
