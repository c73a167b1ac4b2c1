//! Transport seams
//!
//! The connector carries worker reports toward callers; the postman is the
//! caller's view of the broker. Both are implemented outside the core (network
//! transports) or by the in-process loopback broker.

use crate::error::{Error, Result};
use crate::message::{AssignRequest, Report, ReserveRequest, UnassignRequest, UnreserveRequest};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

/// Stream of reports about one request
pub type ReportStream = BoxStream<'static, Result<Report>>;

/// Worker-side outbound channel
#[async_trait]
pub trait Connector: Send + Sync {
    /// Deliver a report toward the caller that owns its reference
    async fn send(&self, report: Report) -> Result<()>;
}

/// Connector backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    tx: mpsc::UnboundedSender<Report>,
}

impl ChannelConnector {
    /// Create a connector and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Report>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn send(&self, report: Report) -> Result<()> {
        self.tx
            .send(report)
            .map_err(|_| Error::channel_closed("connector"))
    }
}

/// Caller-side view of the broker
#[async_trait]
pub trait Postman: Send + Sync {
    /// Send a reserve request; the stream carries every report about it
    /// until the caller drops it
    async fn reserve_stream(&self, request: ReserveRequest) -> Result<ReportStream>;

    /// Release a reservation and wait for the terminal report
    async fn unreserve(&self, request: UnreserveRequest) -> Result<Report>;

    /// Run an assignment and wait for its terminal report
    ///
    /// Progress and yields are skipped and nothing cancels the assignment if
    /// the caller gives up. For callers that need neither; a reservation's
    /// `call` uses `assign_stream` so it can forward progress and send an
    /// unassign when dropped.
    async fn assign(&self, request: AssignRequest) -> Result<Report>;

    /// Run an assignment; the stream carries progress, yields and the
    /// terminal report
    async fn assign_stream(&self, request: AssignRequest) -> Result<ReportStream>;

    /// Cancel an assignment and wait for the terminal report
    async fn unassign(&self, request: UnassignRequest) -> Result<Report>;
}
