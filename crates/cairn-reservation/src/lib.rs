//! Cairn Reservation
//!
//! Caller side of the Cairn reservation protocol.
//!
//! # Overview
//!
//! A [`Reservation`] claims a provision of a unit through a
//! [`Postman`](cairn_core::Postman). Once [`acquire`](Reservation::acquire)
//! resolves, the reservation accepts [`call`](Reservation::call) for
//! function units and [`stream`](Reservation::stream) for generator units.
//! A background task keeps consuming reserve reports so faults raised after
//! readiness mark the reservation broken.
//!
//! # TigerStyle
//! - Readiness resolves exactly once
//! - Abandoned assignments are cancelled upstream
//! - Bounded visible log

mod log;
mod negotiation;
pub mod reservation;

pub use log::{LogEntry, ProgressCallback, ReservationLog};
pub use reservation::{Reservation, ReservationState, ValueStream};
