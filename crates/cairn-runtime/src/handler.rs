//! Report handlers
//!
//! A handler is bound to one request reference and scope and is the only way
//! the actor talks back to the caller about that request. Transport failures
//! while reporting are logged and swallowed.

use std::sync::Arc;

use cairn_core::error::Fault;
use cairn_core::message::{LogLevel, Outcome, Report, Scope};
use cairn_core::reference::Reference;
use cairn_core::transport::Connector;
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Reporting capability for one request
#[derive(Clone)]
pub struct Handler {
    reference: Reference,
    scope: Scope,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("reference", &self.reference)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Handler {
    pub fn new(reference: Reference, scope: Scope, connector: Arc<dyn Connector>) -> Self {
        Self {
            reference,
            scope,
            connector,
        }
    }

    /// Reference every report from this handler carries
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    async fn send(&self, outcome: Outcome) {
        let kind = outcome.name();
        let report = Report::new(self.reference.clone(), self.scope, outcome);
        if let Err(e) = self.connector.send(report).await {
            warn!(
                reference = %self.reference,
                scope = %self.scope,
                outcome = kind,
                error = %e,
                "Failed to deliver report"
            );
        }
    }

    /// Log locally and forward the line to the caller as progress
    pub async fn log(&self, message: impl Into<String>, level: LogLevel) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(reference = %self.reference, scope = %self.scope, "{}", message),
            LogLevel::Info => info!(reference = %self.reference, scope = %self.scope, "{}", message),
            LogLevel::Warn => warn!(reference = %self.reference, scope = %self.scope, "{}", message),
            LogLevel::Error | LogLevel::Critical => {
                error!(reference = %self.reference, scope = %self.scope, "{}", message)
            }
        }
        self.send(Outcome::Progress { level, message }).await;
    }

    /// Forward progress without logging it locally
    pub async fn pass_progress(&self, message: impl Into<String>, level: LogLevel) {
        self.send(Outcome::Progress {
            level,
            message: message.into(),
        })
        .await;
    }

    /// One item of a generator
    pub async fn pass_yield(&self, returns: Vec<Value>) {
        self.send(Outcome::Yield { returns }).await;
    }

    pub async fn pass_done(&self, returns: Option<Vec<Value>>) {
        self.send(Outcome::Done { returns }).await;
    }

    /// Report a worker-side fault
    pub async fn pass_critical(&self, fault: Fault) {
        self.send(Outcome::critical(fault)).await;
    }

    /// Report a protocol-level fault
    pub async fn pass_exception(&self, fault: Fault) {
        self.send(Outcome::exception(fault)).await;
    }

    pub async fn pass_cancelled_done(&self) {
        self.send(Outcome::CancelledDone).await;
    }

    pub async fn pass_cancelled_failed(&self, reason: impl Into<String>) {
        self.send(Outcome::CancelledFailed {
            reason: reason.into(),
        })
        .await;
    }
}
