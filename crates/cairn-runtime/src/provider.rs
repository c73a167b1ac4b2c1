//! Provider hooks
//!
//! TigerStyle: The actor owns protocol state; the provider owns the domain
//! work. Hook faults are returned, never thrown past the actor.

use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::codec::PortCodec;
use cairn_core::error::Result;
use cairn_core::message::{Args, Kwargs, LogLevel, ProvideRequest, ReserveRequest, UnreserveRequest};
use cairn_core::reference::Reference;
use cairn_core::unit::{Unit, UnitKind};
use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::handler::Handler;
use crate::record::ReservationRecord;

/// Domain hooks driven by an [`Actor`](crate::Actor)
///
/// Only `assign` is required; the lifecycle hooks default to no-ops.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Per-reservation state produced by `on_reserve`
    type Context: Send + Sync + 'static;

    /// Bring up the provision. A fault keeps the actor unprovisioned.
    async fn on_provide(&self, _request: &ProvideRequest, _handler: &Handler) -> Result<()> {
        Ok(())
    }

    /// Tear down the provision. Called exactly once when the actor stops.
    async fn on_unprovide(&self) -> Result<()> {
        Ok(())
    }

    /// Accept a reservation, optionally attaching context to it
    async fn on_reserve(
        &self,
        _request: &ReserveRequest,
        _handler: &Handler,
    ) -> Result<Option<Self::Context>> {
        Ok(None)
    }

    /// Release a reservation. A fault keeps the record.
    async fn on_unreserve(
        &self,
        _request: &UnreserveRequest,
        _record: &ReservationRecord<Self::Context>,
        _handler: &Handler,
    ) -> Result<()> {
        Ok(())
    }

    /// The work function
    ///
    /// Inputs arrive expanded. Function units return their values; generator
    /// units emit items through `ctx.yield_returns` and return `None`.
    async fn assign(
        &self,
        ctx: &AssignContext<Self::Context>,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<Option<Vec<Value>>>;
}

/// Everything a running assignment may see
pub struct AssignContext<C> {
    assignment: Reference,
    reservation: Reference,
    context: Option<Arc<C>>,
    unit: Arc<Unit>,
    token: CancellationToken,
    handler: Handler,
    codec: Arc<dyn PortCodec>,
}

impl<C> AssignContext<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        assignment: Reference,
        reservation: Reference,
        context: Option<Arc<C>>,
        unit: Arc<Unit>,
        token: CancellationToken,
        handler: Handler,
        codec: Arc<dyn PortCodec>,
    ) -> Self {
        Self {
            assignment,
            reservation,
            context,
            unit,
            token,
            handler,
            codec,
        }
    }

    pub fn assignment(&self) -> &Reference {
        &self.assignment
    }

    pub fn reservation(&self) -> &Reference {
        &self.reservation
    }

    /// Context attached by `on_reserve`, if any
    pub fn context(&self) -> Option<&C> {
        self.context.as_deref()
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Whether an unassign or shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once an unassign or shutdown has been requested
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Send a progress line to the caller
    pub async fn progress(&self, message: impl Into<String>, level: LogLevel) {
        self.handler.log(message, level).await;
    }

    /// Emit one item of a generator unit
    pub async fn yield_returns(&self, returns: Vec<Value>) -> Result<()> {
        self.unit.expect_kind(UnitKind::Generator)?;
        let returns = self.codec.shrink_outputs(&self.unit, returns).await?;
        self.handler.pass_yield(returns).await;
        Ok(())
    }

    pub(crate) fn handler(&self) -> &Handler {
        &self.handler
    }

    pub(crate) fn codec(&self) -> &Arc<dyn PortCodec> {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::codec::StructuralCodec;
    use cairn_core::message::{Outcome, Scope};
    use cairn_core::transport::ChannelConnector;
    use cairn_core::unit::{Port, PortKind, UnitId};
    use serde_json::json;

    fn context(kind: UnitKind) -> (AssignContext<u32>, tokio::sync::mpsc::UnboundedReceiver<cairn_core::Report>) {
        let (connector, rx) = ChannelConnector::new();
        let unit = Unit::builder(UnitId::new("1").unwrap(), "count", kind)
            .returns(Port::new("n", PortKind::Int))
            .build();
        let handler = Handler::new(Reference::new("a-1").unwrap(), Scope::Assign, Arc::new(connector));
        let ctx = AssignContext::new(
            Reference::new("a-1").unwrap(),
            Reference::new("r-1").unwrap(),
            Some(Arc::new(7)),
            Arc::new(unit),
            CancellationToken::new(),
            handler,
            Arc::new(StructuralCodec::new()),
        );
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_yield_requires_generator() {
        let (ctx, _rx) = context(UnitKind::Function);
        assert!(ctx.yield_returns(vec![json!(1)]).await.is_err());
    }

    #[tokio::test]
    async fn test_yield_is_checked_and_forwarded() {
        let (ctx, mut rx) = context(UnitKind::Generator);
        ctx.yield_returns(vec![json!(3)]).await.unwrap();
        assert!(ctx.yield_returns(vec![json!("three")]).await.is_err());

        let report = rx.recv().await.unwrap();
        assert_eq!(report.outcome, Outcome::Yield { returns: vec![json!(3)] });
        assert_eq!(ctx.context(), Some(&7));
        assert_eq!(ctx.reservation().as_str(), "r-1");
    }

    #[tokio::test]
    async fn test_cancellation_visible_to_work() {
        let (ctx, _rx) = context(UnitKind::Function);
        assert!(!ctx.is_cancelled());
        ctx.token.cancel();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
