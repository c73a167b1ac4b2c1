//! Visible reservation log
//!
//! TigerStyle: Bounded; the oldest entry is evicted first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use cairn_core::message::LogLevel;
use cairn_core::reference::Reference;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Called for every progress line seen by a reservation
pub type ProgressCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// One line of the visible log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Bounded log shared between a reservation and its negotiation task
#[derive(Debug)]
pub struct ReservationLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl ReservationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            level,
            message: message.into(),
        });
        debug_assert!(entries.len() <= self.capacity);
    }

    /// Snapshot of the current entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fans a progress line out to the log, `tracing` and the callback
#[derive(Clone)]
pub(crate) struct Observer {
    pub(crate) reservation: Reference,
    pub(crate) log: Arc<ReservationLog>,
    pub(crate) on_progress: Option<ProgressCallback>,
}

impl Observer {
    pub(crate) fn progress(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(reservation = %self.reservation, "{}", message),
            LogLevel::Info => info!(reservation = %self.reservation, "{}", message),
            LogLevel::Warn => warn!(reservation = %self.reservation, "{}", message),
            LogLevel::Error | LogLevel::Critical => {
                error!(reservation = %self.reservation, "{}", message)
            }
        }
        self.log.push(level, message);
        if let Some(callback) = &self.on_progress {
            callback(level, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_log_is_bounded() {
        let log = ReservationLog::new(2);
        log.push(LogLevel::Info, "one");
        log.push(LogLevel::Info, "two");
        log.push(LogLevel::Warn, "three");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "two");
        assert_eq!(entries[1].level, LogLevel::Warn);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let log = ReservationLog::new(0);
        log.push(LogLevel::Info, "dropped");
        assert!(log.is_empty());
    }

    #[test]
    fn test_observer_invokes_callback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let observer = Observer {
            reservation: Reference::new("r-1").unwrap(),
            log: Arc::new(ReservationLog::new(8)),
            on_progress: Some(Arc::new(move |_level, _message| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        };
        observer.progress(LogLevel::Info, "Reserving");
        observer.progress(LogLevel::Debug, "Reserving Done");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(observer.log.len(), 2);
    }
}
