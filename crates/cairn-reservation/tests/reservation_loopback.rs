//! Reservations against a live actor through the loopback broker

use async_trait::async_trait;
use cairn_core::{
    ActorConfig, Error, Kwargs, LogLevel, Port, PortKind, ProvideRequest, Reference,
    ReserveRequest, Result, Template, Unit, UnitId, UnitKind,
};
use cairn_reservation::{Reservation, ReservationState};
use cairn_runtime::{mailbox_from_config, Actor, AssignContext, Handler, LoopbackBroker, Provider};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counts up to `n` for generators, doubles `n` for functions
///
/// A negative count makes the generator fail after its first item.
#[derive(Default)]
struct CountProvider {
    refuse_reservations: bool,
    started: Arc<AtomicUsize>,
}

#[async_trait]
impl Provider for CountProvider {
    type Context = ();

    async fn on_reserve(&self, _request: &ReserveRequest, _handler: &Handler) -> Result<Option<()>> {
        if self.refuse_reservations {
            return Err(Error::internal("no capacity left"));
        }
        Ok(None)
    }

    async fn assign(
        &self,
        ctx: &AssignContext<()>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Option<Vec<Value>>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if kwargs.get("hold").and_then(Value::as_bool) == Some(true) {
            ctx.cancelled().await;
            return Err(Error::Cancelled);
        }
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        match ctx.unit().kind {
            UnitKind::Function => {
                ctx.progress("doubling", LogLevel::Info).await;
                Ok(Some(vec![json!(n * 2)]))
            }
            UnitKind::Generator => {
                if n < 0 {
                    ctx.yield_returns(vec![json!(0)]).await?;
                    return Err(Error::assignment("ValueError", "negative count"));
                }
                for i in 0..n {
                    ctx.yield_returns(vec![json!(i)]).await?;
                }
                Ok(None)
            }
        }
    }
}

fn unit(kind: UnitKind) -> Unit {
    Unit::builder(UnitId::new("count").unwrap(), "count", kind)
        .arg(Port::new("n", PortKind::Int))
        .kwarg(Port::new("hold", PortKind::Bool).optional())
        .returns(Port::new("value", PortKind::Int))
        .build()
}

struct Harness {
    broker: Arc<LoopbackBroker>,
    shutdown: CancellationToken,
    actor: JoinHandle<Result<()>>,
}

impl Harness {
    fn start(provider: CountProvider, kind: UnitKind) -> Self {
        let config = ActorConfig::default();
        let (tx, rx) = mailbox_from_config(&config);
        let broker = LoopbackBroker::new(tx);
        let actor = Actor::new(provider, Arc::new(broker.connector())).with_config(config);
        let shutdown = CancellationToken::new();
        let provide = ProvideRequest {
            reference: Reference::generate(),
            template: Template::new("count-template", unit(kind)),
            params: Default::default(),
        };
        let actor = tokio::spawn(actor.run(provide, rx, shutdown.clone()));
        Self {
            broker: Arc::new(broker),
            shutdown,
            actor,
        }
    }

    fn reservation(&self, kind: UnitKind) -> Reservation {
        Reservation::new(self.broker.clone(), Arc::new(unit(kind)))
    }
}

#[tokio::test]
async fn test_call_through_live_actor() {
    let harness = Harness::start(CountProvider::default(), UnitKind::Function);
    let mut reservation = harness.reservation(UnitKind::Function);

    reservation.acquire().await.unwrap();
    let returns = reservation.call(vec![json!(21)], Kwargs::new()).await.unwrap();
    assert_eq!(returns, Some(vec![json!(42)]));

    let messages: Vec<String> = reservation
        .log_entries()
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert!(messages.contains(&"Reserving".to_string()));
    assert!(messages.contains(&"doubling".to_string()));

    reservation.release().await;
    assert_eq!(reservation.state(), ReservationState::Ended);

    // Actor is still healthy after the unreserve
    let mut again = harness.reservation(UnitKind::Function);
    again.acquire().await.unwrap();
    again.release().await;
    assert!(!harness.actor.is_finished());
}

#[tokio::test]
async fn test_stream_through_live_actor() {
    let harness = Harness::start(CountProvider::default(), UnitKind::Generator);
    let mut reservation = harness.reservation(UnitKind::Generator);
    reservation.acquire().await.unwrap();

    let items: Vec<Value> = reservation
        .stream(vec![json!(3)], Kwargs::new())
        .unwrap()
        .map(|item| item.unwrap().remove(0))
        .collect()
        .await;
    assert_eq!(items, vec![json!(0), json!(1), json!(2)]);

    reservation.release().await;
}

#[tokio::test]
async fn test_stream_failure_through_live_actor() {
    let harness = Harness::start(CountProvider::default(), UnitKind::Generator);
    let mut reservation = harness.reservation(UnitKind::Generator);
    reservation.acquire().await.unwrap();

    let items: Vec<Result<Vec<Value>>> = reservation
        .stream(vec![json!(-1)], Kwargs::new())
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), &vec![json!(0)]);
    assert!(matches!(
        items[1],
        Err(Error::Assignment { ref kind, .. }) if kind == "ValueError"
    ));

    reservation.release().await;
    assert!(!harness.actor.is_finished());
}

#[tokio::test]
async fn test_release_leaves_no_subscriptions() {
    let harness = Harness::start(CountProvider::default(), UnitKind::Function);

    for _ in 0..5 {
        let mut reservation = harness.reservation(UnitKind::Function);
        reservation.acquire().await.unwrap();
        reservation.call(vec![json!(1)], Kwargs::new()).await.unwrap();
        reservation.release().await;
    }
    assert_eq!(harness.broker.subscription_count().await, 0);
}

#[tokio::test]
async fn test_abandoned_call_is_cancelled_upstream() {
    let provider = CountProvider::default();
    let started = provider.started.clone();
    let harness = Harness::start(provider, UnitKind::Function);
    let mut reservation = harness.reservation(UnitKind::Function);
    reservation.acquire().await.unwrap();

    let mut kwargs = Kwargs::new();
    kwargs.insert("hold".into(), json!(true));
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), reservation.call(vec![json!(1)], kwargs)).await;
    assert!(abandoned.is_err());
    assert_eq!(started.load(Ordering::SeqCst), 1);

    // The unassign reached the actor without killing it
    let returns = reservation.call(vec![json!(2)], Kwargs::new()).await.unwrap();
    assert_eq!(returns, Some(vec![json!(4)]));
    assert!(!harness.actor.is_finished());

    reservation.release().await;
}

#[tokio::test]
async fn test_refused_reservation_fails_acquire() {
    let provider = CountProvider {
        refuse_reservations: true,
        ..Default::default()
    };
    let harness = Harness::start(provider, UnitKind::Function);
    let mut reservation = harness.reservation(UnitKind::Function);

    let err = reservation.acquire().await.unwrap_err();
    assert!(matches!(err, Error::Negotiation { .. }));
    assert!(reservation.is_broken());
    assert!(reservation.call(vec![json!(1)], Kwargs::new()).await.is_err());

    reservation.release().await;
    assert!(!harness.actor.is_finished());
}

#[tokio::test]
async fn test_unit_mismatch_rejects_reservation() {
    let harness = Harness::start(CountProvider::default(), UnitKind::Function);
    let other = Unit::builder(UnitId::new("other").unwrap(), "other", UnitKind::Function).build();
    let mut reservation = Reservation::new(harness.broker.clone(), Arc::new(other));

    let err = reservation.acquire().await.unwrap_err();
    assert!(matches!(err, Error::Negotiation { ref kind, .. } if kind == "UnitMismatch"));
    assert!(!reservation.is_broken());
    reservation.release().await;
}

#[tokio::test]
async fn test_scoped_reservation_against_actor() {
    let harness = Harness::start(CountProvider::default(), UnitKind::Function);
    let mut reservation = harness.reservation(UnitKind::Function);

    let doubled = reservation
        .scoped(|r| Box::pin(async move { r.call(vec![json!(5)], Kwargs::new()).await }))
        .await
        .unwrap();
    assert_eq!(doubled, Some(vec![json!(10)]));
    assert_eq!(reservation.state(), ReservationState::Ended);

    harness.shutdown.cancel();
    assert!(harness.actor.await.unwrap().unwrap_err().is_cancelled());
}
