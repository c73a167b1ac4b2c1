//! Protocol message set
//!
//! TigerStyle: Closed tagged unions, matched exhaustively. Payloads are opaque
//! JSON values produced and consumed by a `PortCodec`.

use crate::error::Fault;
use crate::reference::Reference;
use crate::unit::{Template, UnitId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Positional wire arguments
pub type Args = Vec<Value>;

/// Keyword wire arguments
pub type Kwargs = Map<String, Value>;

// =============================================================================
// Requests
// =============================================================================

/// Parameters attached to a provide request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvideParams {
    /// Restrict provisioning to these providers
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters attached to a reserve request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReserveParams {
    /// Restrict the reservation to these providers
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Bring up one provision of a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvideRequest {
    pub reference: Reference,
    pub template: Template,
    #[serde(default)]
    pub params: ProvideParams,
}

/// Claim a provision of a unit (forwarded by the broker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub reference: Reference,
    pub unit: UnitId,
    #[serde(default)]
    pub params: ReserveParams,
}

/// Give a reservation back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreserveRequest {
    pub reference: Reference,
    pub reservation: Reference,
}

/// Invoke the unit against a reservation (forwarded by the broker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignRequest {
    pub reference: Reference,
    pub reservation: Reference,
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub kwargs: Kwargs,
}

/// Cancel a running assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnassignRequest {
    pub reference: Reference,
    pub assignment: Reference,
}

/// Messages delivered into an actor's inbound queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActorMessage {
    Provide(ProvideRequest),
    Reserve(ReserveRequest),
    Unreserve(UnreserveRequest),
    Assign(AssignRequest),
    Unassign(UnassignRequest),
}

impl ActorMessage {
    /// Reference of the request itself
    pub fn reference(&self) -> &Reference {
        match self {
            Self::Provide(m) => &m.reference,
            Self::Reserve(m) => &m.reference,
            Self::Unreserve(m) => &m.reference,
            Self::Assign(m) => &m.reference,
            Self::Unassign(m) => &m.reference,
        }
    }

    /// Scope reports about this message are filed under
    pub fn scope(&self) -> Scope {
        match self {
            Self::Provide(_) => Scope::Provide,
            Self::Reserve(_) => Scope::Reserve,
            Self::Unreserve(_) => Scope::Unreserve,
            Self::Assign(_) => Scope::Assign,
            Self::Unassign(_) => Scope::Unassign,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Which kind of request a report is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Provide,
    Reserve,
    Unreserve,
    Assign,
    Unassign,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Provide => "provide",
            Scope::Reserve => "reserve",
            Scope::Unreserve => "unreserve",
            Scope::Assign => "assign",
            Scope::Unassign => "unassign",
        };
        f.write_str(name)
    }
}

/// Severity of a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// What happened to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Progress { level: LogLevel, message: String },
    /// One item of a generator unit
    Yield { returns: Vec<Value> },
    Done { returns: Option<Vec<Value>> },
    /// Worker-reported fault; ends the positive outcome path
    Critical { kind: String, message: String },
    CancelledDone,
    CancelledFailed { reason: String },
    /// Protocol-level fault raised before the worker accepted the request
    Exception { kind: String, message: String },
}

impl Outcome {
    /// Build a critical outcome from a fault
    pub fn critical(fault: Fault) -> Self {
        Self::Critical {
            kind: fault.kind,
            message: fault.message,
        }
    }

    /// Build an exception outcome from a fault
    pub fn exception(fault: Fault) -> Self {
        Self::Exception {
            kind: fault.kind,
            message: fault.message,
        }
    }

    /// Whether no further reports follow for the same reference
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. } | Self::Yield { .. })
    }

    /// Short name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Yield { .. } => "yield",
            Self::Done { .. } => "done",
            Self::Critical { .. } => "critical",
            Self::CancelledDone => "cancelled_done",
            Self::CancelledFailed { .. } => "cancelled_failed",
            Self::Exception { .. } => "exception",
        }
    }
}

/// Outbound message from worker to caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub reference: Reference,
    pub scope: Scope,
    pub outcome: Outcome,
}

impl Report {
    /// Create a new report
    pub fn new(reference: Reference, scope: Scope, outcome: Outcome) -> Self {
        Self {
            reference,
            scope,
            outcome,
        }
    }

    /// Whether no further reports follow for the same reference
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }
}
