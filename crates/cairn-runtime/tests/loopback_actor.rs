//! Actor driven end to end through the loopback broker
//!
//! Every request goes through the mailbox and every report comes back
//! through the connector, the way a remote broker would see them.

use async_trait::async_trait;
use cairn_core::{
    AssignRequest, Error, Kwargs, LogLevel, Outcome, Port, PortKind, Postman, ProvideRequest, Reference,
    ReserveRequest, Result, Template, UnassignRequest, Unit, UnitId, UnitKind, UnreserveRequest,
};
use cairn_runtime::{mailbox, Actor, AssignContext, LoopbackBroker, Provider};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct SumProvider;

#[async_trait]
impl Provider for SumProvider {
    type Context = ();

    async fn assign(
        &self,
        ctx: &AssignContext<()>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Option<Vec<Value>>> {
        if kwargs.get("hold").and_then(Value::as_bool) == Some(true) {
            ctx.cancelled().await;
            return Err(Error::Cancelled);
        }
        ctx.progress("summing", LogLevel::Info).await;
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(Some(vec![json!(sum)]))
    }
}

fn sum_unit() -> Unit {
    Unit::builder(UnitId::new("sum").unwrap(), "sum", UnitKind::Function)
        .arg(Port::new("a", PortKind::Int))
        .arg(Port::new("b", PortKind::Int))
        .kwarg(Port::new("hold", PortKind::Bool).optional())
        .returns(Port::new("sum", PortKind::Int))
        .build()
}

fn start(
    provider: SumProvider,
) -> (LoopbackBroker, CancellationToken, JoinHandle<Result<()>>) {
    let (tx, rx) = mailbox(16);
    let broker = LoopbackBroker::new(tx);
    let actor = Actor::new(provider, Arc::new(broker.connector()));
    let shutdown = CancellationToken::new();
    let provide = ProvideRequest {
        reference: Reference::generate(),
        template: Template::new("sum-template", sum_unit()),
        params: Default::default(),
    };
    let handle = tokio::spawn(actor.run(provide, rx, shutdown.clone()));
    (broker, shutdown, handle)
}

async fn reserve(broker: &LoopbackBroker) -> Reference {
    let request = ReserveRequest {
        reference: Reference::generate(),
        unit: UnitId::new("sum").unwrap(),
        params: Default::default(),
    };
    let reservation = request.reference.clone();
    let mut reports = broker.reserve_stream(request).await.unwrap();
    loop {
        let report = reports.next().await.unwrap().unwrap();
        if report.is_terminal() {
            assert_eq!(report.outcome, Outcome::Done { returns: None });
            return reservation;
        }
    }
}

fn assign_request(reservation: &Reference, args: Vec<Value>, hold: bool) -> AssignRequest {
    let mut kwargs = Kwargs::new();
    if hold {
        kwargs.insert("hold".into(), json!(true));
    }
    AssignRequest {
        reference: Reference::generate(),
        reservation: reservation.clone(),
        args,
        kwargs,
    }
}

#[tokio::test]
async fn test_reserve_assign_unreserve() {
    let (broker, _shutdown, handle) = start(SumProvider);
    let reservation = reserve(&broker).await;

    let report = broker
        .assign(assign_request(&reservation, vec![json!(2), json!(3)], false))
        .await
        .unwrap();
    assert_eq!(
        report.outcome,
        Outcome::Done {
            returns: Some(vec![json!(5)])
        }
    );

    let report = broker
        .unreserve(UnreserveRequest {
            reference: Reference::generate(),
            reservation,
        })
        .await
        .unwrap();
    assert_eq!(report.outcome, Outcome::Done { returns: None });

    drop(broker);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_progress_precedes_done() {
    let (broker, _shutdown, _handle) = start(SumProvider);
    let reservation = reserve(&broker).await;

    let outcomes: Vec<Outcome> = broker
        .assign_stream(assign_request(&reservation, vec![json!(1), json!(1)], false))
        .await
        .unwrap()
        .map(|report| report.unwrap().outcome)
        .take_while(|outcome| futures::future::ready(!matches!(outcome, Outcome::Done { .. })))
        .collect()
        .await;
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Outcome::Progress { message, .. } if message == "summing")));
}

#[tokio::test]
async fn test_unassign_cancels_running_assignment() {
    let (broker, _shutdown, _handle) = start(SumProvider);
    let reservation = reserve(&broker).await;

    let request = assign_request(&reservation, vec![json!(1), json!(2)], true);
    let assignment = request.reference.clone();
    let mut reports = broker.assign_stream(request).await.unwrap();

    let report = broker
        .unassign(UnassignRequest {
            reference: Reference::generate(),
            assignment,
        })
        .await
        .unwrap();
    assert_eq!(report.outcome, Outcome::CancelledDone);

    let terminal = loop {
        let report = reports.next().await.unwrap().unwrap();
        if report.is_terminal() {
            break report;
        }
    };
    assert_eq!(terminal.outcome, Outcome::CancelledDone);
}

#[tokio::test]
async fn test_bad_input_is_reported_as_critical() {
    let (broker, _shutdown, _handle) = start(SumProvider);
    let reservation = reserve(&broker).await;

    let report = broker
        .assign(assign_request(&reservation, vec![json!("two"), json!(3)], false))
        .await
        .unwrap();
    match report.outcome {
        Outcome::Critical { kind, .. } => assert_eq!(kind, "PortMismatch"),
        other => panic!("expected critical, got {:?}", other),
    }

    // The actor keeps serving after a failed assignment
    let report = broker
        .assign(assign_request(&reservation, vec![json!(4), json!(4)], false))
        .await
        .unwrap();
    assert!(matches!(report.outcome, Outcome::Done { .. }));
}

#[tokio::test]
async fn test_unknown_reservation_stops_the_actor() {
    let (broker, _shutdown, handle) = start(SumProvider);

    let report = broker
        .assign(assign_request(&Reference::generate(), vec![json!(1), json!(1)], false))
        .await
        .unwrap();
    assert!(matches!(report.outcome, Outcome::Exception { .. }));

    let exit = handle.await.unwrap();
    assert!(exit.unwrap_err().is_protocol_violation());
}

#[tokio::test]
async fn test_shutdown_token_stops_the_actor() {
    let (broker, shutdown, handle) = start(SumProvider);
    let _reservation = reserve(&broker).await;

    shutdown.cancel();
    assert!(handle.await.unwrap().unwrap_err().is_cancelled());
}
