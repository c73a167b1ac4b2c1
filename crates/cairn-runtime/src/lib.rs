//! Cairn Runtime
//!
//! Worker side of the Cairn reservation protocol.
//!
//! # Overview
//!
//! An [`Actor`] owns one provision of a unit. It consumes a bounded
//! [`mailbox`] one message at a time, keeps reservation records, and runs
//! each accepted assignment as its own cancellable task. Domain behavior is
//! supplied through the [`Provider`] hooks; reports flow back to callers
//! through a [`Handler`] bound to each request.
//!
//! # TigerStyle
//! - Exactly one provision per actor
//! - Explicit lifecycle states
//! - Bounded mailboxes (no silent message drops)
//! - Protocol violations stop the actor instead of being papered over

pub mod actor;
pub mod assignment;
pub mod handler;
pub mod loopback;
pub mod mailbox;
pub mod provider;
pub mod record;

pub use actor::{Actor, ActorState};
pub use assignment::{AssignmentStatus, AssignmentSupervisor, CancelOutcome, CompletionLatch};
pub use handler::Handler;
pub use loopback::{LoopbackBroker, LoopbackConnector};
pub use mailbox::{
    mailbox, mailbox_from_config, mailbox_with_time, Envelope, MailboxFullError, MailboxReceiver,
    MailboxSender,
};
pub use provider::{AssignContext, Provider};
pub use record::{ReservationRecord, ReservationTable};
