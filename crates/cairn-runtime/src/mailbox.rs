//! Actor mailbox implementation
//!
//! TigerStyle: Bounded queues with explicit limits, no silent drops.
//!
//! Many producers, one consumer. Every message taken off the queue must be
//! acknowledged with `task_done`; `join` resolves once all enqueued messages
//! have been acknowledged.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use cairn_core::clock::{TimeProvider, WallClockTime};
use cairn_core::config::ActorConfig;
use cairn_core::constants::MAILBOX_DEPTH_MAX;
use cairn_core::error::{Error, Result};
use cairn_core::message::ActorMessage;

/// Error when mailbox is full
#[derive(Debug, Clone)]
pub struct MailboxFullError {
    pub mailbox_depth: usize,
    pub limit: usize,
}

impl std::fmt::Display for MailboxFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mailbox full: {} messages (limit: {})",
            self.mailbox_depth, self.limit
        )
    }
}

impl std::error::Error for MailboxFullError {}

impl From<MailboxFullError> for Error {
    fn from(e: MailboxFullError) -> Self {
        Error::MailboxFull {
            depth: e.mailbox_depth,
            max: e.limit,
        }
    }
}

/// A message in the mailbox
#[derive(Debug)]
pub struct Envelope {
    pub message: ActorMessage,
    /// When the message was enqueued (monotonic timestamp in ms)
    pub enqueued_at_ms: u64,
}

impl Envelope {
    /// Wrap a message, stamping it with the given clock
    pub fn new(message: ActorMessage, time: &dyn TimeProvider) -> Self {
        Self {
            message,
            enqueued_at_ms: time.monotonic_ms(),
        }
    }

    /// Time this message has been waiting in milliseconds
    pub fn wait_time_ms(&self, time: &dyn TimeProvider) -> u64 {
        time.monotonic_ms().saturating_sub(self.enqueued_at_ms)
    }
}

#[derive(Debug)]
struct MailboxShared {
    capacity: usize,
    enqueued_count: AtomicU64,
    acknowledged_count: AtomicU64,
    /// Enqueued but not yet acknowledged
    unfinished: AtomicUsize,
    idle: Notify,
}

impl MailboxShared {
    fn acknowledge(&self) {
        let previous = self.unfinished.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "task_done called more often than recv");
        self.acknowledged_count.fetch_add(1, Ordering::SeqCst);
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Create a bounded mailbox using the wall clock
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    mailbox_with_time(capacity, Arc::new(WallClockTime::new()))
}

/// Create a mailbox sized by `ActorConfig::mailbox_depth_max`
pub fn mailbox_from_config(config: &ActorConfig) -> (MailboxSender, MailboxReceiver) {
    mailbox(config.mailbox_depth_max)
}

/// Create a bounded mailbox with an injected clock
pub fn mailbox_with_time(
    capacity: usize,
    time: Arc<dyn TimeProvider>,
) -> (MailboxSender, MailboxReceiver) {
    assert!(capacity > 0, "capacity must be positive");
    assert!(
        capacity <= MAILBOX_DEPTH_MAX,
        "capacity exceeds MAILBOX_DEPTH_MAX"
    );

    let (tx, rx) = mpsc::channel(capacity);
    let shared = Arc::new(MailboxShared {
        capacity,
        enqueued_count: AtomicU64::new(0),
        acknowledged_count: AtomicU64::new(0),
        unfinished: AtomicUsize::new(0),
        idle: Notify::new(),
    });

    (
        MailboxSender {
            tx,
            shared: shared.clone(),
            time,
        },
        MailboxReceiver { rx, shared },
    )
}

/// Producer half of the mailbox
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Envelope>,
    shared: Arc<MailboxShared>,
    time: Arc<dyn TimeProvider>,
}

impl MailboxSender {
    /// Enqueue a message, waiting for capacity
    ///
    /// Nothing is counted until a slot is held, so a send dropped while
    /// waiting leaves `join` unaffected.
    pub async fn send(&self, message: ActorMessage) -> Result<()> {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| Error::channel_closed("mailbox"))?;
        self.enqueue(permit, message);
        Ok(())
    }

    /// Enqueue a message without waiting
    ///
    /// Returns `Error::MailboxFull` when at capacity.
    pub fn try_send(&self, message: ActorMessage) -> Result<()> {
        match self.tx.try_reserve() {
            Ok(permit) => {
                self.enqueue(permit, message);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => Err(MailboxFullError {
                mailbox_depth: self.len(),
                limit: self.shared.capacity,
            }
            .into()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(Error::channel_closed("mailbox")),
        }
    }

    fn enqueue(&self, permit: mpsc::Permit<'_, Envelope>, message: ActorMessage) {
        self.shared.unfinished.fetch_add(1, Ordering::SeqCst);
        self.shared.enqueued_count.fetch_add(1, Ordering::SeqCst);
        permit.send(Envelope::new(message, self.time.as_ref()));
    }

    /// Wait until every enqueued message has been acknowledged
    pub async fn join(&self) {
        loop {
            // Register before checking so a concurrent ack is not missed
            let notified = self.shared.idle.notified();
            if self.shared.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of messages waiting in the queue
    pub fn len(&self) -> usize {
        self.shared.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Total messages enqueued
    pub fn enqueued_count(&self) -> u64 {
        self.shared.enqueued_count.load(Ordering::SeqCst)
    }

    /// Total messages acknowledged
    pub fn acknowledged_count(&self) -> u64 {
        self.shared.acknowledged_count.load(Ordering::SeqCst)
    }
}

/// Consumer half of the mailbox, owned by the actor
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Envelope>,
    shared: Arc<MailboxShared>,
}

impl MailboxReceiver {
    /// Take the next message; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Acknowledge one message taken with `recv`
    pub fn task_done(&self) {
        self.shared.acknowledge();
    }

    /// Stop accepting messages; queued ones can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Total messages acknowledged
    pub fn acknowledged_count(&self) -> u64 {
        self.shared.acknowledged_count.load(Ordering::SeqCst)
    }
}
