//! The worker-side actor
//!
//! TigerStyle: One provision per actor, one inbound queue, explicit lifecycle
//! states. Every control and work message is handled from a single loop;
//! only assignment bodies run concurrently.

use std::sync::Arc;
use std::time::Duration;

use cairn_core::clock::{TimeProvider, WallClockTime};
use cairn_core::codec::{PortCodec, StructuralCodec};
use cairn_core::config::ActorConfig;
use cairn_core::error::{Error, Result};
use cairn_core::message::{
    ActorMessage, AssignRequest, LogLevel, ProvideRequest, ReserveRequest, Scope, UnassignRequest,
    UnreserveRequest,
};
use cairn_core::metrics;
use cairn_core::reference::Reference;
use cairn_core::transport::Connector;
use cairn_core::unit::Unit;
use cairn_core::CANCELLATION_REASON_ALREADY_DONE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::assignment::{run_assignment, AssignmentSupervisor, CancelOutcome};
use crate::handler::Handler;
use crate::mailbox::MailboxReceiver;
use crate::provider::{AssignContext, Provider};
use crate::record::{ReservationRecord, ReservationTable};

// =============================================================================
// Lifecycle
// =============================================================================

/// Actor lifecycle state
///
/// ```text
///   Unprovisioned --> Provisioning --> Provisioned --> Running --> Stopped
///         ^                |
///         +----------------+  (provide fault)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActorState {
    #[default]
    Unprovisioned,
    /// `on_provide` is running
    Provisioning,
    /// Unit bound, loop not started
    Provisioned,
    /// Loop is consuming the mailbox
    Running,
    /// Torn down; never restarts
    Stopped,
}

impl ActorState {
    /// Check if valid transition per the lifecycle above
    pub fn can_transition_to(&self, next: ActorState) -> bool {
        matches!(
            (self, next),
            (ActorState::Unprovisioned, ActorState::Provisioning)
                | (ActorState::Provisioning, ActorState::Provisioned)
                | (ActorState::Provisioning, ActorState::Unprovisioned)
                | (ActorState::Provisioned, ActorState::Running)
                | (ActorState::Provisioned, ActorState::Stopped)
                | (ActorState::Running, ActorState::Stopped)
        )
    }
}

impl std::fmt::Display for ActorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorState::Unprovisioned => write!(f, "unprovisioned"),
            ActorState::Provisioning => write!(f, "provisioning"),
            ActorState::Provisioned => write!(f, "provisioned"),
            ActorState::Running => write!(f, "running"),
            ActorState::Stopped => write!(f, "stopped"),
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Serves one provision of a unit
pub struct Actor<P: Provider> {
    provider: Arc<P>,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn PortCodec>,
    time: Arc<dyn TimeProvider>,
    config: ActorConfig,
    state: ActorState,
    unit: Option<Arc<Unit>>,
    reservations: ReservationTable<P::Context>,
    assignments: AssignmentSupervisor,
}

impl<P: Provider> Actor<P> {
    /// Create an actor with default configuration and the structural codec
    pub fn new(provider: P, connector: Arc<dyn Connector>) -> Self {
        let config = ActorConfig::default();
        Self {
            provider: Arc::new(provider),
            connector,
            codec: Arc::new(StructuralCodec::new()),
            time: Arc::new(WallClockTime::new()),
            assignments: AssignmentSupervisor::new(config.finished_assignments_retained_count),
            config,
            state: ActorState::Unprovisioned,
            unit: None,
            reservations: ReservationTable::new(),
        }
    }

    pub fn with_config(mut self, config: ActorConfig) -> Self {
        debug_assert!(self.assignments.is_empty());
        self.assignments = AssignmentSupervisor::new(config.finished_assignments_retained_count);
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn PortCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_time(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    pub fn state(&self) -> ActorState {
        self.state
    }

    /// Unit bound by the provision
    pub fn unit(&self) -> Option<&Arc<Unit>> {
        self.unit.as_ref()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Assignments spawned and not yet reaped
    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn has_reservation(&self, reference: &Reference) -> bool {
        self.reservations.contains(reference)
    }

    fn transition(&mut self, next: ActorState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid actor transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    fn handler(&self, reference: &Reference, scope: Scope) -> Handler {
        Handler::new(reference.clone(), scope, self.connector.clone())
    }

    fn bound_unit(&self) -> Result<Arc<Unit>> {
        self.unit.clone().ok_or(Error::NotProvisioned)
    }

    // -------------------------------------------------------------------------
    // Provision
    // -------------------------------------------------------------------------

    /// Run the provisioning hook and bind the template's unit
    #[instrument(skip(self, request), fields(reference = %request.reference, template = %request.template.id))]
    pub async fn provide(&mut self, request: ProvideRequest) -> Result<()> {
        if self.state != ActorState::Unprovisioned {
            return Err(Error::protocol_violation(format!(
                "provide received while {}",
                self.state
            )));
        }
        self.transition(ActorState::Provisioning);

        let handler = self.handler(&request.reference, Scope::Provide);
        match self.provider.on_provide(&request, &handler).await {
            Ok(()) => {
                self.unit = Some(Arc::new(request.template.unit.clone()));
                self.transition(ActorState::Provisioned);
                metrics::record_provision("success");
                info!(unit = %request.template.unit.qualified_name(), "Provisioned");
                handler.pass_done(None).await;
                Ok(())
            }
            Err(e) => {
                self.transition(ActorState::Unprovisioned);
                metrics::record_provision("error");
                error!(error = %e, "Provisioning failed");
                handler.pass_critical(e.to_fault()).await;
                Err(Error::ProvisionFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Provision, then serve the mailbox until shutdown
    pub async fn run(
        mut self,
        provide: ProvideRequest,
        mailbox: MailboxReceiver,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.provide(provide).await?;
        self.serve(mailbox, shutdown).await
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Serve the mailbox of a provisioned actor
    ///
    /// Returns `Err(Cancelled)` when `shutdown` fires, `Ok(())` once every
    /// mailbox sender is gone, and the fault itself on a protocol violation.
    /// Teardown runs in all three cases.
    #[instrument(skip_all, fields(unit = ?self.unit.as_ref().map(|u| u.qualified_name())))]
    pub async fn serve(&mut self, mut mailbox: MailboxReceiver, shutdown: CancellationToken) -> Result<()> {
        if self.state != ActorState::Provisioned {
            return Err(Error::NotProvisioned);
        }
        self.transition(ActorState::Running);
        info!("Actor running");

        let exit = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break Err(Error::Cancelled);
                }

                Some(joined) = self.assignments.join_next(), if !self.assignments.is_empty() => {
                    self.assignments.reap(joined);
                }

                envelope = mailbox.recv() => {
                    let Some(envelope) = envelope else {
                        info!("Mailbox closed");
                        break Ok(());
                    };
                    debug!(
                        reference = %envelope.message.reference(),
                        scope = %envelope.message.scope(),
                        wait_ms = envelope.wait_time_ms(self.time.as_ref()),
                        "Handling message"
                    );
                    let result = self.handle(envelope.message).await;
                    mailbox.task_done();
                    if let Err(e) = result {
                        error!(error = %e, "Actor stopping on fatal fault");
                        break Err(e);
                    }
                }
            }
        };

        self.teardown(&mut mailbox).await;
        exit
    }

    /// Handle one inbound message
    ///
    /// An error is fatal: the caller is expected to stop the actor.
    pub async fn handle(&mut self, message: ActorMessage) -> Result<()> {
        match message {
            ActorMessage::Provide(request) => {
                let err = Error::protocol_violation("actor is already provisioned");
                self.handler(&request.reference, Scope::Provide)
                    .pass_exception(err.to_fault())
                    .await;
                Err(err)
            }
            ActorMessage::Reserve(request) => self.on_reserve_message(request).await,
            ActorMessage::Unreserve(request) => self.on_unreserve_message(request).await,
            ActorMessage::Assign(request) => self.on_assign_message(request).await,
            ActorMessage::Unassign(request) => self.on_unassign_message(request).await,
        }
    }

    async fn teardown(&mut self, mailbox: &mut MailboxReceiver) {
        mailbox.close();
        let mut discarded = 0usize;
        while let Ok(Some(envelope)) =
            tokio::time::timeout(Duration::ZERO, mailbox.recv()).await
        {
            debug!(reference = %envelope.message.reference(), "Discarding message");
            mailbox.task_done();
            discarded += 1;
        }
        if discarded > 0 {
            warn!(count = discarded, "Discarded queued messages on stop");
        }

        self.assignments
            .shutdown(Duration::from_millis(self.config.shutdown_grace_ms))
            .await;

        if let Err(e) = self.provider.on_unprovide().await {
            warn!(error = %e, "Unprovide hook failed");
        }
        self.transition(ActorState::Stopped);
        info!("Actor stopped");
    }

    // -------------------------------------------------------------------------
    // Reservations
    // -------------------------------------------------------------------------

    async fn on_reserve_message(&mut self, request: ReserveRequest) -> Result<()> {
        let handler = self.handler(&request.reference, Scope::Reserve);

        if self.reservations.contains(&request.reference) {
            let err = Error::protocol_violation(format!(
                "duplicate reservation {}",
                request.reference
            ));
            handler.pass_exception(err.to_fault()).await;
            return Err(err);
        }

        let unit = self.bound_unit()?;
        if unit.id != request.unit {
            let err = Error::negotiation(
                "UnitMismatch",
                format!("actor serves unit {}, not {}", unit.id, request.unit),
            );
            handler.pass_exception(err.to_fault()).await;
            return Ok(());
        }

        let record = ReservationRecord::new(
            request.reference.clone(),
            unit,
            request.params.clone(),
            self.time.now_ms(),
        );
        self.reservations.insert(record)?;

        handler.log("Reserving", LogLevel::Info).await;
        match self.provider.on_reserve(&request, &handler).await {
            Ok(context) => {
                if let (Some(context), Some(record)) =
                    (context, self.reservations.get_mut(&request.reference))
                {
                    record.context = Some(Arc::new(context));
                }
                metrics::record_reservation("reserve", "success");
                handler.log("Reserving Done", LogLevel::Info).await;
                handler.pass_done(None).await;
            }
            Err(e) => {
                // The record stays; the caller decides whether to unreserve
                metrics::record_reservation("reserve", "error");
                handler.pass_critical(e.to_fault()).await;
            }
        }
        Ok(())
    }

    async fn on_unreserve_message(&mut self, request: UnreserveRequest) -> Result<()> {
        let handler = self.handler(&request.reference, Scope::Unreserve);

        let Some(record) = self.reservations.get(&request.reservation) else {
            let err = Error::UnknownReservation {
                reference: request.reservation.to_string(),
            };
            warn!(reservation = %request.reservation, "Unreserve for unknown reservation");
            handler.pass_exception(err.to_fault()).await;
            return Ok(());
        };

        handler.log("Unreserving", LogLevel::Info).await;
        match self.provider.on_unreserve(&request, record, &handler).await {
            Ok(()) => {
                self.reservations.remove(&request.reservation);
                metrics::record_reservation("unreserve", "success");
                handler.pass_done(None).await;
            }
            Err(e) => {
                metrics::record_reservation("unreserve", "error");
                handler.pass_critical(e.to_fault()).await;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Assignments
    // -------------------------------------------------------------------------

    async fn on_assign_message(&mut self, request: AssignRequest) -> Result<()> {
        let handler = self.handler(&request.reference, Scope::Assign);

        let Some(record) = self.reservations.get(&request.reservation) else {
            let err = Error::protocol_violation(format!(
                "assignment arrived for an unknown reservation {}",
                request.reservation
            ));
            handler.pass_exception(err.to_fault()).await;
            return Err(err);
        };

        if self.assignments.contains(&request.reference) {
            let err = Error::protocol_violation(format!(
                "duplicate assignment {}",
                request.reference
            ));
            handler.pass_exception(err.to_fault()).await;
            return Err(err);
        }

        if self.assignments.len() >= self.config.assignments_count_max {
            let err = Error::AssignmentLimitReached {
                count: self.assignments.len(),
                limit: self.config.assignments_count_max,
            };
            warn!(assignment = %request.reference, error = %err, "Rejecting assignment");
            handler.pass_exception(err.to_fault()).await;
            return Ok(());
        }

        handler.log("Assignment received", LogLevel::Info).await;

        let context = record.context.clone();
        let unit = record.unit.clone();
        let provider = self.provider.clone();
        let codec = self.codec.clone();
        let AssignRequest {
            reference,
            reservation,
            args,
            kwargs,
        } = request;

        self.assignments.spawn(
            reference.clone(),
            reservation.clone(),
            move |token, latch| {
                let ctx = AssignContext::new(
                    reference,
                    reservation,
                    context,
                    unit,
                    token.clone(),
                    handler,
                    codec,
                );
                run_assignment(provider, ctx, args, kwargs, token, latch)
            },
        );
        Ok(())
    }

    async fn on_unassign_message(&mut self, request: UnassignRequest) -> Result<()> {
        let handler = self.handler(&request.reference, Scope::Unassign);

        match self.assignments.cancel(&request.assignment) {
            CancelOutcome::Cancelled => {
                handler
                    .log(
                        format!("Cancellation of assignment {}", request.assignment),
                        LogLevel::Info,
                    )
                    .await;
                handler.pass_cancelled_done().await;
                Ok(())
            }
            CancelOutcome::AlreadyDone => {
                debug!(assignment = %request.assignment, "Unassign after completion");
                handler
                    .pass_cancelled_failed(CANCELLATION_REASON_ALREADY_DONE)
                    .await;
                Ok(())
            }
            CancelOutcome::Unknown => {
                let err = Error::protocol_violation(format!(
                    "unassign for unknown assignment {}",
                    request.assignment
                ));
                handler.pass_exception(err.to_fault()).await;
                Err(err)
            }
        }
    }
}
