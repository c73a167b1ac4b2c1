//! Cairn Core
//!
//! Core types, messages, errors and constants for the Cairn reservation
//! protocol.
//!
//! # Overview
//!
//! A worker hosts an actor that serves one provision of a unit. Callers hold
//! reservations against that unit and invoke it through assignments. Both
//! sides speak the message set in [`message`], correlated by [`Reference`],
//! over the seams in [`transport`].
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `REFERENCE_LENGTH_BYTES_MAX`)
//! - No recursion (bounded iteration only)

pub mod clock;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod metrics;
pub mod reference;
pub mod telemetry;
pub mod transport;
pub mod unit;

pub use clock::{ManualClock, TimeProvider, WallClockTime};
pub use codec::{PortCodec, StructuralCodec};
pub use config::{ActorConfig, CairnConfig, ReservationConfig};
pub use constants::*;
pub use error::{Error, Fault, Result};
pub use message::{
    ActorMessage, Args, AssignRequest, Kwargs, LogLevel, Outcome, ProvideParams, ProvideRequest,
    Report, ReserveParams, ReserveRequest, Scope, UnassignRequest, UnreserveRequest,
};
pub use reference::Reference;
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
pub use transport::{ChannelConnector, Connector, Postman, ReportStream};
pub use unit::{Port, PortKind, Template, Unit, UnitBuilder, UnitId, UnitKind};
