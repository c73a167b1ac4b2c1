//! Error types for Cairn
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for Cairn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Cairn error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Protocol Errors (fatal to the owning actor)
    // =========================================================================
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    // =========================================================================
    // Provision Errors
    // =========================================================================
    #[error("Provision failed: {reason}")]
    ProvisionFailed { reason: String },

    #[error("Actor not provisioned")]
    NotProvisioned,

    // =========================================================================
    // Reservation Errors
    // =========================================================================
    #[error("Reservation negotiation failed: {kind}: {message}")]
    Negotiation { kind: String, message: String },

    #[error("Unknown reservation: {reference}")]
    UnknownReservation { reference: String },

    #[error("Reservation is broken: {reason}")]
    ReservationBroken { reason: String },

    #[error("Reservation not ready, state: {state}")]
    ReservationNotReady { state: String },

    // =========================================================================
    // Assignment Errors
    // =========================================================================
    #[error("Assignment failed: {kind}: {message}")]
    Assignment { kind: String, message: String },

    #[error("Assignment limit reached: {count} running, limit: {limit}")]
    AssignmentLimitReached { count: usize, limit: usize },

    #[error("Unit {unit} is a {actual}, operation requires a {expected}")]
    WrongUnitKind {
        unit: String,
        expected: String,
        actual: String,
    },

    #[error("Port mismatch: {port}, reason: {reason}")]
    PortMismatch { port: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Mailbox full: depth: {depth}, max: {max}")]
    MailboxFull { depth: usize, max: usize },

    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid reference: {reference}, reason: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a protocol violation error
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Create a negotiation error
    pub fn negotiation(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Negotiation {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an assignment error
    pub fn assignment(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Assignment {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a port mismatch error
    pub fn port_mismatch(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortMismatch {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel closed error
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error means the broker and actor disagree about state
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Check if this error is a cancellation rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::MailboxFull { .. } | Self::AssignmentLimitReached { .. }
        )
    }

    /// Stable identifier used as the `kind` of critical and exception reports
    pub fn kind(&self) -> &str {
        match self {
            Self::ProtocolViolation { .. } => "ProtocolViolation",
            Self::ProvisionFailed { .. } => "ProvisionFailed",
            Self::NotProvisioned => "NotProvisioned",
            // Remote faults keep the kind the worker reported
            Self::Negotiation { kind, .. } => kind.as_str(),
            Self::Assignment { kind, .. } => kind.as_str(),
            Self::UnknownReservation { .. } => "UnknownReservation",
            Self::ReservationBroken { .. } => "ReservationBroken",
            Self::ReservationNotReady { .. } => "ReservationNotReady",
            Self::AssignmentLimitReached { .. } => "AssignmentLimitReached",
            Self::WrongUnitKind { .. } => "WrongUnitKind",
            Self::PortMismatch { .. } => "PortMismatch",
            Self::Cancelled => "Cancelled",
            Self::MailboxFull { .. } => "MailboxFull",
            Self::ChannelClosed { .. } => "ChannelClosed",
            Self::InvalidReference { .. } => "InvalidReference",
            Self::InvalidConfiguration { .. } => "InvalidConfiguration",
            Self::Internal { .. } => "Internal",
            Self::SerializationFailed { .. } => "SerializationFailed",
            Self::Other(_) => "Other",
        }
    }

    /// Convert into the serializable form that crosses the wire
    pub fn to_fault(&self) -> Fault {
        let message = match self {
            Self::Negotiation { message, .. } | Self::Assignment { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Fault {
            kind: self.kind().to_string(),
            message,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationFailed {
            reason: e.to_string(),
        }
    }
}

/// A fault as reported by the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Error kind (e.g. "PortMismatch", or a user-defined kind)
    pub kind: String,
    /// Human readable message
    pub message: String,
}

impl Fault {
    /// Create a new fault
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&Error> for Fault {
    fn from(e: &Error) -> Self {
        e.to_fault()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::protocol_violation("assignment arrived for an unknown reservation");
        assert!(err.to_string().contains("unknown reservation"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::protocol_violation("x").is_protocol_violation());
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::assignment("ValueError", "bad").is_cancelled());
        assert!(Error::MailboxFull { depth: 1, max: 1 }.is_retriable());
        assert!(!Error::NotProvisioned.is_retriable());
    }

    #[test]
    fn test_fault_keeps_remote_kind() {
        let err = Error::assignment("ValueError", "negative interval");
        let fault = err.to_fault();
        assert_eq!(fault.kind, "ValueError");
        assert_eq!(fault.message, "negative interval");
        assert_eq!(fault.to_string(), "ValueError: negative interval");
    }

    #[test]
    fn test_fault_from_local_error() {
        let fault = Fault::from(&Error::port_mismatch("interval", "expected int"));
        assert_eq!(fault.kind, "PortMismatch");
        assert!(fault.message.contains("interval"));
    }
}
