//! In-process broker
//!
//! Binds callers directly to one actor's mailbox. Requests are enqueued as
//! actor messages; reports coming back through the connector half are routed
//! to whoever subscribed to their reference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::error::{Error, Result};
use cairn_core::message::{
    ActorMessage, AssignRequest, Outcome, Report, ReserveRequest, UnassignRequest,
    UnreserveRequest,
};
use cairn_core::reference::Reference;
use cairn_core::transport::{Connector, Postman, ReportStream};
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use crate::mailbox::MailboxSender;

#[derive(Debug)]
struct Route {
    tx: mpsc::UnboundedSender<Report>,
    /// Reserve subscriptions outlive their first terminal report
    persistent: bool,
}

type Routes = Arc<RwLock<HashMap<Reference, Route>>>;

/// Caller-facing half: implements [`Postman`]
#[derive(Debug, Clone)]
pub struct LoopbackBroker {
    mailbox: MailboxSender,
    routes: Routes,
}

/// Worker-facing half: implements [`Connector`]
///
/// Holds no mailbox sender, so an actor owning it still sees its mailbox
/// close once every broker handle is dropped.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    routes: Routes,
}

impl LoopbackBroker {
    pub fn new(mailbox: MailboxSender) -> Self {
        Self {
            mailbox,
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Connector to hand to the actor
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector {
            routes: self.routes.clone(),
        }
    }

    /// Number of live subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.routes.read().await.len()
    }

    async fn subscribe(
        &self,
        reference: &Reference,
        persistent: bool,
    ) -> Result<mpsc::UnboundedReceiver<Report>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes.write().await;
        if routes.contains_key(reference) {
            return Err(Error::InvalidReference {
                reference: reference.to_string(),
                reason: "reference already in flight".into(),
            });
        }
        routes.insert(reference.clone(), Route { tx, persistent });
        Ok(rx)
    }

    fn subscription(&self, reference: Reference) -> Subscription {
        Subscription {
            routes: self.routes.clone(),
            reference,
        }
    }

    async fn unsubscribe(&self, reference: &Reference) {
        self.routes.write().await.remove(reference);
    }

    /// Subscribe, then enqueue; the order matters so no report is missed
    async fn dispatch(
        &self,
        reference: &Reference,
        message: ActorMessage,
        persistent: bool,
    ) -> Result<mpsc::UnboundedReceiver<Report>> {
        let rx = self.subscribe(reference, persistent).await?;
        if let Err(e) = self.mailbox.send(message).await {
            self.unsubscribe(reference).await;
            return Err(e);
        }
        Ok(rx)
    }

    async fn request(&self, reference: &Reference, message: ActorMessage) -> Result<Report> {
        let mut rx = self.dispatch(reference, message, false).await?;
        while let Some(report) = rx.recv().await {
            if report.is_terminal() {
                return Ok(report);
            }
            trace!(reference = %reference, outcome = report.outcome.name(), "Skipping report");
        }
        Err(Error::channel_closed("loopback"))
    }
}

/// Removes a route once its subscriber stream is dropped
struct Subscription {
    routes: Routes,
    reference: Reference,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut routes) = self.routes.try_write() {
            routes.remove(&self.reference);
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let routes = self.routes.clone();
        let reference = self.reference.clone();
        runtime.spawn(async move {
            routes.write().await.remove(&reference);
        });
    }
}

fn into_stream(mut rx: mpsc::UnboundedReceiver<Report>, subscription: Subscription) -> ReportStream {
    let stream = async_stream::stream! {
        let _subscription = subscription;
        while let Some(report) = rx.recv().await {
            yield Ok::<_, Error>(report);
        }
    };
    stream.boxed()
}

#[async_trait]
impl Postman for LoopbackBroker {
    async fn reserve_stream(&self, request: ReserveRequest) -> Result<ReportStream> {
        let reference = request.reference.clone();
        let rx = self
            .dispatch(&reference, ActorMessage::Reserve(request), true)
            .await?;
        Ok(into_stream(rx, self.subscription(reference)))
    }

    async fn unreserve(&self, request: UnreserveRequest) -> Result<Report> {
        let reference = request.reference.clone();
        let reservation = request.reservation.clone();
        let report = self.request(&reference, ActorMessage::Unreserve(request)).await?;
        if matches!(report.outcome, Outcome::Done { .. }) {
            // The worker dropped its record; nothing more arrives on the reserve scope
            self.unsubscribe(&reservation).await;
        }
        Ok(report)
    }

    async fn assign(&self, request: AssignRequest) -> Result<Report> {
        let reference = request.reference.clone();
        self.request(&reference, ActorMessage::Assign(request)).await
    }

    async fn assign_stream(&self, request: AssignRequest) -> Result<ReportStream> {
        let reference = request.reference.clone();
        let rx = self
            .dispatch(&reference, ActorMessage::Assign(request), false)
            .await?;
        Ok(into_stream(rx, self.subscription(reference)))
    }

    async fn unassign(&self, request: UnassignRequest) -> Result<Report> {
        let reference = request.reference.clone();
        self.request(&reference, ActorMessage::Unassign(request)).await
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn send(&self, report: Report) -> Result<()> {
        let terminal = report.is_terminal();
        let reference = report.reference.clone();

        let delivered = {
            let routes = self.routes.read().await;
            match routes.get(&reference) {
                Some(route) => Some((route.tx.send(report).is_ok(), route.persistent)),
                None => None,
            }
        };

        let prune = match delivered {
            None => {
                debug!(reference = %reference, "No subscriber for report");
                false
            }
            // Subscriber went away
            Some((false, _)) => true,
            // One-shot request is complete
            Some((true, persistent)) => terminal && !persistent,
        };
        if prune {
            self.routes.write().await.remove(&reference);
        }
        Ok(())
    }
}
