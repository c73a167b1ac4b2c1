//! Background negotiation
//!
//! Consumes the reserve report stream for the lifetime of a reservation.
//! The first `Done` resolves readiness; a `Critical` marks the reservation
//! broken; an `Exception` ends negotiation.

use std::sync::Arc;

use cairn_core::error::{Error, Fault, Result};
use cairn_core::message::{LogLevel, Outcome};
use cairn_core::reference::Reference;
use cairn_core::transport::ReportStream;
use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::log::Observer;

pub(crate) type ReadySender = oneshot::Sender<Result<Reference>>;

pub(crate) struct Negotiation {
    pub(crate) reference: Reference,
    pub(crate) ready: Option<ReadySender>,
    pub(crate) broken: Arc<watch::Sender<Option<Fault>>>,
    pub(crate) observer: Observer,
    pub(crate) token: CancellationToken,
}

impl Negotiation {
    /// Fail readiness if nobody resolved it yet
    fn fail(&mut self, error: Error) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(error));
        }
    }

    fn resolve(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(self.reference.clone()));
        }
    }

    pub(crate) async fn run(mut self, mut stream: ReportStream) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    self.observer.progress(LogLevel::Info, "Unreserved");
                    return;
                }
                next = stream.next() => next,
            };

            let report = match next {
                Some(Ok(report)) => report,
                Some(Err(e)) => {
                    self.observer
                        .progress(LogLevel::Error, &format!("Reservation transport failed: {}", e));
                    self.fail(Error::negotiation(e.kind(), e.to_string()));
                    return;
                }
                None => {
                    debug!(reservation = %self.reference, "Reservation stream ended");
                    self.fail(Error::negotiation(
                        "StreamEnded",
                        "reservation stream ended before confirmation",
                    ));
                    return;
                }
            };

            match report.outcome {
                Outcome::Progress { level, message } => {
                    self.observer.progress(level, &message);
                }
                Outcome::Done { .. } => {
                    // Nobody is waiting any more once acquire has timed out
                    if self.ready.as_ref().is_some_and(|ready| !ready.is_closed()) {
                        self.observer.progress(LogLevel::Info, "Reservation ready");
                    }
                    self.resolve();
                }
                Outcome::Critical { kind, message } => {
                    let fault = Fault::new(kind, message);
                    self.observer
                        .progress(LogLevel::Critical, &format!("Reservation failed: {}", fault));
                    self.broken.send_replace(Some(fault.clone()));
                    self.fail(Error::negotiation(fault.kind, fault.message));
                }
                Outcome::Exception { kind, message } => {
                    self.observer
                        .progress(LogLevel::Error, &format!("Reservation rejected: {}: {}", kind, message));
                    self.fail(Error::negotiation(kind, message));
                    return;
                }
                other => {
                    debug!(
                        reservation = %self.reference,
                        outcome = other.name(),
                        "Ignoring report on reserve scope"
                    );
                }
            }
        }
    }
}
