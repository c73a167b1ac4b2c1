//! Caller-side reservation
//!
//! TigerStyle: Explicit lifecycle states; readiness resolves at most once;
//! teardown is guaranteed by `release`, `scoped` or, as a last resort, `Drop`.
//!
//! ```text
//!   Unstarted --> Negotiating --> Ready  --> Ended
//!                      |                      ^
//!                      +------> Failed -------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use cairn_core::codec::{PortCodec, StructuralCodec};
use cairn_core::config::ReservationConfig;
use cairn_core::error::{Error, Fault, Result};
use cairn_core::message::{
    Args, AssignRequest, Kwargs, LogLevel, Outcome, ReserveParams, ReserveRequest,
    UnassignRequest, UnreserveRequest,
};
use cairn_core::metrics;
use cairn_core::reference::Reference;
use cairn_core::transport::{Postman, ReportStream};
use cairn_core::unit::{Unit, UnitKind};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::log::{LogEntry, Observer, ProgressCallback, ReservationLog};
use crate::negotiation::Negotiation;

/// Values yielded by a generator unit, one item per `yield`
pub type ValueStream = BoxStream<'static, Result<Vec<Value>>>;

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservationState {
    #[default]
    Unstarted,
    /// Reserve sent, waiting for confirmation
    Negotiating,
    Ready,
    /// Negotiation failed; only `release` remains
    Failed,
    Ended,
}

impl ReservationState {
    pub fn can_transition_to(&self, next: ReservationState) -> bool {
        matches!(
            (self, next),
            (ReservationState::Unstarted, ReservationState::Negotiating)
                | (ReservationState::Negotiating, ReservationState::Ready)
                | (ReservationState::Negotiating, ReservationState::Failed)
                | (ReservationState::Unstarted, ReservationState::Ended)
                | (ReservationState::Negotiating, ReservationState::Ended)
                | (ReservationState::Ready, ReservationState::Ended)
                | (ReservationState::Failed, ReservationState::Ended)
        )
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationState::Unstarted => write!(f, "unstarted"),
            ReservationState::Negotiating => write!(f, "negotiating"),
            ReservationState::Ready => write!(f, "ready"),
            ReservationState::Failed => write!(f, "failed"),
            ReservationState::Ended => write!(f, "ended"),
        }
    }
}

struct NegotiationTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// =============================================================================
// Unassign on drop
// =============================================================================

/// Sends an unassign upstream if dropped while still armed
struct UnassignGuard {
    postman: Arc<dyn Postman>,
    assignment: Option<Reference>,
}

impl UnassignGuard {
    fn new(postman: Arc<dyn Postman>, assignment: Reference) -> Self {
        Self {
            postman,
            assignment: Some(assignment),
        }
    }

    fn disarm(&mut self) {
        self.assignment = None;
    }
}

impl Drop for UnassignGuard {
    fn drop(&mut self) {
        let Some(assignment) = self.assignment.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(assignment = %assignment, "No runtime left to send unassign");
            return;
        };
        let postman = self.postman.clone();
        runtime.spawn(async move {
            let request = UnassignRequest {
                reference: Reference::generate(),
                assignment: assignment.clone(),
            };
            match postman.unassign(request).await {
                Ok(report) => {
                    debug!(assignment = %assignment, outcome = report.outcome.name(), "Unassigned")
                }
                Err(e) => warn!(assignment = %assignment, error = %e, "Unassign failed"),
            }
        });
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// A caller's claim on a provision of one unit
pub struct Reservation {
    postman: Arc<dyn Postman>,
    codec: Arc<dyn PortCodec>,
    unit: Arc<Unit>,
    params: ReserveParams,
    config: ReservationConfig,
    state: ReservationState,
    reference: Reference,
    reservation_id: Option<Reference>,
    /// Confirmation never arrived in time; the worker may still grant it
    timed_out: bool,
    broken: Arc<watch::Sender<Option<Fault>>>,
    negotiation: Option<NegotiationTask>,
    log: Arc<ReservationLog>,
    on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("reference", &self.reference)
            .field("unit", &self.unit.qualified_name())
            .field("state", &self.state)
            .finish()
    }
}

impl Reservation {
    /// Create an unstarted reservation for a unit
    pub fn new(postman: Arc<dyn Postman>, unit: Arc<Unit>) -> Self {
        let config = ReservationConfig::default();
        let (broken, _) = watch::channel(None);
        Self {
            postman,
            codec: Arc::new(StructuralCodec::new()),
            unit,
            params: ReserveParams::default(),
            log: Arc::new(ReservationLog::new(config.log_entries_count_max)),
            config,
            state: ReservationState::Unstarted,
            reference: Reference::generate(),
            reservation_id: None,
            timed_out: false,
            broken: Arc::new(broken),
            negotiation: None,
            on_progress: None,
        }
    }

    pub fn with_params(mut self, params: ReserveParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_config(mut self, config: ReservationConfig) -> Self {
        self.log = Arc::new(ReservationLog::new(config.log_entries_count_max));
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn PortCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Use a caller-chosen reference for the reserve request
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }

    /// Receive every progress line as it arrives
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Reference of the reserve request
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Reservation id, once ready
    pub fn reservation_id(&self) -> Option<&Reference> {
        self.reservation_id.as_ref()
    }

    pub fn is_broken(&self) -> bool {
        self.broken.borrow().is_some()
    }

    /// Fault that broke the reservation, if any
    pub fn broken_fault(&self) -> Option<Fault> {
        self.broken.borrow().clone()
    }

    /// Watch the broken flag
    pub fn subscribe_broken(&self) -> watch::Receiver<Option<Fault>> {
        self.broken.subscribe()
    }

    /// Snapshot of the visible log
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    /// Whether the worker may still keep a record for this reservation
    ///
    /// True once confirmed, when a critical report broke it (the record is
    /// kept on a failed reserve hook), or when confirmation timed out. An
    /// unreserve for a record that does not exist is answered harmlessly.
    fn may_hold_worker_record(&self) -> bool {
        self.reservation_id.is_some() || self.timed_out || self.is_broken()
    }

    fn observer(&self) -> Observer {
        Observer {
            reservation: self.reference.clone(),
            log: self.log.clone(),
            on_progress: self.on_progress.clone(),
        }
    }

    fn transition(&mut self, next: ReservationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid reservation transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Negotiate the reservation and wait until it is confirmed
    ///
    /// Returns the reservation id. Fails with `Error::Negotiation` when the
    /// worker rejects or faults before confirming, when the report stream
    /// ends early, or when `reserve_timeout_ms` elapses.
    #[instrument(skip(self), fields(reservation = %self.reference, unit = %self.unit.qualified_name()))]
    pub async fn acquire(&mut self) -> Result<Reference> {
        if self.state != ReservationState::Unstarted {
            return Err(Error::internal(format!(
                "acquire called on a {} reservation",
                self.state
            )));
        }
        self.transition(ReservationState::Negotiating);

        let request = ReserveRequest {
            reference: self.reference.clone(),
            unit: self.unit.id.clone(),
            params: self.params.clone(),
        };
        let stream = match self.postman.reserve_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.transition(ReservationState::Failed);
                metrics::record_reservation("acquire", "error");
                return Err(Error::negotiation(e.kind(), e.to_string()));
            }
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let negotiation = Negotiation {
            reference: self.reference.clone(),
            ready: Some(ready_tx),
            broken: self.broken.clone(),
            observer: self.observer(),
            token: token.clone(),
        };
        let handle = tokio::spawn(negotiation.run(stream));
        self.negotiation = Some(NegotiationTask { token, handle });

        let ready = async move {
            ready_rx.await.unwrap_or_else(|_| {
                Err(Error::negotiation(
                    "StreamEnded",
                    "negotiation ended before confirmation",
                ))
            })
        };
        let result = match self.config.reserve_timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), ready).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.timed_out = true;
                        Err(Error::negotiation(
                            "Timeout",
                            format!("not confirmed within {} ms", timeout_ms),
                        ))
                    }
                }
            }
            None => ready.await,
        };

        match result {
            Ok(reservation_id) => {
                self.reservation_id = Some(reservation_id.clone());
                self.transition(ReservationState::Ready);
                metrics::record_reservation("acquire", "success");
                info!("Reservation ready");
                Ok(reservation_id)
            }
            Err(e) => {
                self.transition(ReservationState::Failed);
                metrics::record_reservation("acquire", "error");
                warn!(error = %e, "Reservation failed");
                Err(e)
            }
        }
    }

    /// Tear the reservation down; calling it again does nothing
    #[instrument(skip(self), fields(reservation = %self.reference))]
    pub async fn release(&mut self) {
        if self.state == ReservationState::Ended {
            return;
        }

        if let Some(negotiation) = self.negotiation.take() {
            negotiation.token.cancel();
            if let Err(e) = negotiation.handle.await {
                warn!(error = %e, "Negotiation task did not finish cleanly");
            }
        }

        if self.may_hold_worker_record() && self.config.unreserve_on_release {
            let request = UnreserveRequest {
                reference: Reference::generate(),
                reservation: self.reference.clone(),
            };
            match self.postman.unreserve(request).await {
                Ok(report) if matches!(report.outcome, Outcome::Done { .. }) => {
                    metrics::record_reservation("release", "success");
                    debug!("Unreserved");
                }
                Ok(report) => {
                    metrics::record_reservation("release", "error");
                    warn!(outcome = ?report.outcome, "Unreserve was not confirmed");
                }
                Err(e) => {
                    metrics::record_reservation("release", "error");
                    warn!(error = %e, "Unreserve failed");
                }
            }
        }

        self.transition(ReservationState::Ended);
        info!("Reservation released");
    }

    /// Acquire, run `f`, and always release
    pub async fn scoped<T, F>(&mut self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a Reservation) -> BoxFuture<'a, Result<T>>,
    {
        if let Err(e) = self.acquire().await {
            self.release().await;
            return Err(e);
        }
        let result = f(self).await;
        self.release().await;
        result
    }

    // -------------------------------------------------------------------------
    // Assignments
    // -------------------------------------------------------------------------

    /// Reservation id if calls may be made right now
    fn usable(&self, kind: UnitKind) -> Result<Reference> {
        self.unit.expect_kind(kind)?;
        if let Some(fault) = self.broken.borrow().as_ref() {
            return Err(Error::ReservationBroken {
                reason: fault.to_string(),
            });
        }
        match (&self.state, &self.reservation_id) {
            (ReservationState::Ready, Some(reservation_id)) => Ok(reservation_id.clone()),
            _ => Err(Error::ReservationNotReady {
                state: self.state.to_string(),
            }),
        }
    }

    /// Invoke a function unit and wait for its result
    ///
    /// Dropping the returned future before the result arrives cancels the
    /// assignment upstream.
    #[instrument(skip(self, args, kwargs), fields(reservation = %self.reference))]
    pub async fn call(&self, args: Args, kwargs: Kwargs) -> Result<Option<Vec<Value>>> {
        let reservation = self.usable(UnitKind::Function)?;
        let (args, kwargs) = self.codec.shrink_inputs(&self.unit, args, kwargs).await?;

        let request = AssignRequest {
            reference: Reference::generate(),
            reservation,
            args,
            kwargs,
        };
        let assignment = request.reference.clone();
        let mut reports = self.postman.assign_stream(request).await?;
        let mut guard = UnassignGuard::new(self.postman.clone(), assignment.clone());
        let observer = self.observer();

        let outcome = loop {
            match next_report(&mut reports).await? {
                Outcome::Progress { level, message } => observer.progress(level, &message),
                Outcome::Yield { .. } => {
                    debug!(assignment = %assignment, "Ignoring yield from a function unit")
                }
                terminal => break terminal,
            }
        };
        guard.disarm();

        match outcome {
            Outcome::Done { returns: Some(returns) } => {
                Ok(Some(self.codec.expand_outputs(&self.unit, returns).await?))
            }
            Outcome::Done { returns: None } => Ok(None),
            Outcome::Critical { kind, message } => {
                observer.progress(LogLevel::Error, &format!("Assignment failed: {}: {}", kind, message));
                if self.config.ignore_node_exceptions {
                    return Ok(None);
                }
                Err(Error::assignment(kind, message))
            }
            Outcome::Exception { kind, message } => Err(Error::assignment(kind, message)),
            Outcome::CancelledDone => Err(Error::Cancelled),
            other => Err(Error::protocol_violation(format!(
                "unexpected {} report for assignment {}",
                other.name(),
                assignment
            ))),
        }
    }

    /// Invoke a generator unit
    ///
    /// Nothing is sent until the stream is first polled. Items arrive in
    /// emission order; the stream ends at `Done`. Dropping it early cancels
    /// the assignment upstream.
    pub fn stream(&self, args: Args, kwargs: Kwargs) -> Result<ValueStream> {
        let reservation = self.usable(UnitKind::Generator)?;

        let postman = self.postman.clone();
        let codec = self.codec.clone();
        let unit = self.unit.clone();
        let observer = self.observer();
        let ignore_node_exceptions = self.config.ignore_node_exceptions;

        let stream = async_stream::try_stream! {
            let (args, kwargs) = codec.shrink_inputs(&unit, args, kwargs).await?;
            let assignment = Reference::generate();
            let request = AssignRequest {
                reference: assignment.clone(),
                reservation,
                args,
                kwargs,
            };
            let mut reports = postman.assign_stream(request).await?;
            let mut guard = UnassignGuard::new(postman.clone(), assignment.clone());

            let finished: Result<()> = loop {
                match next_report(&mut reports).await? {
                    Outcome::Yield { returns } => {
                        let values = codec.expand_outputs(&unit, returns).await?;
                        yield values;
                    }
                    Outcome::Progress { level, message } => observer.progress(level, &message),
                    Outcome::Done { .. } => break Ok(()),
                    Outcome::Critical { kind, message } => {
                        observer.progress(LogLevel::Error, &format!("Assignment failed: {}: {}", kind, message));
                        if ignore_node_exceptions {
                            break Ok(());
                        }
                        break Err(Error::assignment(kind, message));
                    }
                    Outcome::Exception { kind, message } => break Err(Error::assignment(kind, message)),
                    Outcome::CancelledDone => break Err(Error::Cancelled),
                    Outcome::CancelledFailed { reason } => {
                        break Err(Error::protocol_violation(format!(
                            "unexpected cancellation report for assignment {}: {}",
                            assignment, reason
                        )));
                    }
                }
            };
            guard.disarm();
            finished?;
        };
        Ok(stream.boxed())
    }
}

/// Next report from an assignment stream; running dry is a protocol error
async fn next_report(reports: &mut ReportStream) -> Result<Outcome> {
    match reports.next().await {
        Some(report) => Ok(report?.outcome),
        None => Err(Error::protocol_violation(
            "assignment stream ended before a terminal report",
        )),
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(negotiation) = self.negotiation.take() else {
            return;
        };
        negotiation.token.cancel();
        warn!(reservation = %self.reference, "Reservation dropped without release");

        // Best effort; there is no one left to report a failure to
        if self.may_hold_worker_record() && self.config.unreserve_on_release {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let postman = self.postman.clone();
                let request = UnreserveRequest {
                    reference: Reference::generate(),
                    reservation: self.reference.clone(),
                };
                runtime.spawn(async move {
                    if let Err(e) = postman.unreserve(request).await {
                        warn!(error = %e, "Unreserve on drop failed");
                    }
                });
            }
        }
    }
}
