//! Assignment supervision
//!
//! TigerStyle: Every running assignment is a tracked task with its own
//! cancellation token. Tasks are reaped by the actor loop, so the table is
//! only mutated from one place.
//!
//! Completion and cancellation race through a latch: whichever side claims it
//! first decides the outcome the caller sees.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cairn_core::error::{Error, Fault};
use cairn_core::message::{Args, Kwargs};
use cairn_core::metrics;
use cairn_core::reference::Reference;
use futures::FutureExt;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::provider::{AssignContext, Provider};

// =============================================================================
// Status
// =============================================================================

/// How an assignment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    Succeeded,
    Failed,
    Cancelled,
    Panicked,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Succeeded => "succeeded",
            AssignmentStatus::Failed => "failed",
            AssignmentStatus::Cancelled => "cancelled",
            AssignmentStatus::Panicked => "panicked",
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an unassign lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was delivered to a running task
    Cancelled,
    /// The task had already produced its outcome
    AlreadyDone,
    /// No task with that reference was ever seen
    Unknown,
}

// =============================================================================
// Completion latch
// =============================================================================

const LATCH_RUNNING: u8 = 0;
const LATCH_FINISHED: u8 = 1;
const LATCH_CANCELLED: u8 = 2;

/// One-shot decision between completion and cancellation
#[derive(Debug, Clone, Default)]
pub struct CompletionLatch(Arc<AtomicU8>);

impl CompletionLatch {
    /// Claim the outcome for the task; false if cancellation won
    pub fn claim_finish(&self) -> bool {
        self.0
            .compare_exchange(LATCH_RUNNING, LATCH_FINISHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Claim the outcome for an unassign; false if the task already finished
    pub fn claim_cancel(&self) -> bool {
        self.0
            .compare_exchange(LATCH_RUNNING, LATCH_CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.0.load(Ordering::SeqCst) != LATCH_RUNNING
    }
}

// =============================================================================
// Supervisor
// =============================================================================

#[derive(Debug)]
struct AssignmentTask {
    reservation: Reference,
    token: CancellationToken,
    latch: CompletionLatch,
    abort: AbortHandle,
    started_at: Instant,
}

/// Table of running assignments plus a bounded memory of finished ones
#[derive(Debug)]
pub struct AssignmentSupervisor {
    tasks: HashMap<Reference, AssignmentTask>,
    set: JoinSet<(Reference, AssignmentStatus)>,
    finished: VecDeque<Reference>,
    finished_index: HashSet<Reference>,
    finished_retained_max: usize,
}

impl AssignmentSupervisor {
    pub fn new(finished_retained_max: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            set: JoinSet::new(),
            finished: VecDeque::new(),
            finished_index: HashSet::new(),
            finished_retained_max,
        }
    }

    /// Number of tasks not yet reaped
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.tasks.contains_key(reference)
    }

    /// Reservation a tracked task runs against
    pub fn reservation_of(&self, reference: &Reference) -> Option<&Reference> {
        self.tasks.get(reference).map(|task| &task.reservation)
    }

    /// Spawn a task and register it in the same step
    ///
    /// The builder receives the task's cancellation token and latch.
    pub fn spawn<B, F>(&mut self, reference: Reference, reservation: Reference, build: B)
    where
        B: FnOnce(CancellationToken, CompletionLatch) -> F,
        F: Future<Output = AssignmentStatus> + Send + 'static,
    {
        debug_assert!(!self.tasks.contains_key(&reference));

        let token = CancellationToken::new();
        let latch = CompletionLatch::default();
        let task = build(token.clone(), latch.clone());
        let task_reference = reference.clone();
        let abort = self
            .set
            .spawn(async move { (task_reference, task.await) });

        self.tasks.insert(
            reference,
            AssignmentTask {
                reservation,
                token,
                latch,
                abort,
                started_at: Instant::now(),
            },
        );
    }

    /// Deliver cancellation to a task
    pub fn cancel(&mut self, reference: &Reference) -> CancelOutcome {
        match self.tasks.get(reference) {
            Some(task) => {
                if task.latch.claim_cancel() {
                    task.token.cancel();
                    CancelOutcome::Cancelled
                } else {
                    CancelOutcome::AlreadyDone
                }
            }
            None if self.finished_index.contains(reference) => CancelOutcome::AlreadyDone,
            None => CancelOutcome::Unknown,
        }
    }

    /// Wait for the next task to finish; `None` when nothing is tracked
    pub async fn join_next(&mut self) -> Option<Result<(Reference, AssignmentStatus), JoinError>> {
        self.set.join_next().await
    }

    /// Remove a finished task from the table and remember its reference
    pub fn reap(&mut self, joined: Result<(Reference, AssignmentStatus), JoinError>) {
        let (reference, status) = match joined {
            Ok(finished) => finished,
            Err(e) => {
                // Only aborted tasks land here; panics are caught inside the task
                warn!(error = %e, "Assignment task aborted");
                self.forget_aborted();
                return;
            }
        };

        let Some(task) = self.tasks.remove(&reference) else {
            return;
        };
        let duration = task.started_at.elapsed();
        log_completion(&reference, &task.reservation, status, duration);
        metrics::record_assignment(status.as_str(), duration.as_secs_f64());
        self.remember_finished(reference);
    }

    /// Cancel every task and wait up to `grace` for them to unwind; anything
    /// still running afterwards is aborted
    pub async fn shutdown(&mut self, grace: Duration) {
        for task in self.tasks.values() {
            if task.latch.claim_cancel() {
                task.token.cancel();
            }
        }

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.set.join_next().await {
                self.reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                count = self.tasks.len(),
                grace_ms = grace.as_millis() as u64,
                "Assignments did not unwind in time, aborting"
            );
            self.set.abort_all();
            while let Some(joined) = self.set.join_next().await {
                self.reap(joined);
            }
        }
        self.tasks.clear();
    }

    fn forget_aborted(&mut self) {
        let aborted: Vec<Reference> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.abort.is_finished())
            .map(|(reference, _)| reference.clone())
            .collect();
        for reference in aborted {
            self.tasks.remove(&reference);
            self.remember_finished(reference);
        }
    }

    fn remember_finished(&mut self, reference: Reference) {
        if self.finished_retained_max == 0 {
            return;
        }
        if self.finished.len() >= self.finished_retained_max {
            if let Some(oldest) = self.finished.pop_front() {
                self.finished_index.remove(&oldest);
            }
        }
        self.finished_index.insert(reference.clone());
        self.finished.push_back(reference);
        debug_assert_eq!(self.finished.len(), self.finished_index.len());
    }
}

fn log_completion(reference: &Reference, reservation: &Reference, status: AssignmentStatus, duration: Duration) {
    let duration_ms = duration.as_millis() as u64;
    match status {
        AssignmentStatus::Succeeded => {
            info!(assignment = %reference, reservation = %reservation, status = %status, duration_ms, "Assignment finished")
        }
        AssignmentStatus::Cancelled => {
            warn!(assignment = %reference, reservation = %reservation, status = %status, duration_ms, "Assignment finished")
        }
        AssignmentStatus::Failed | AssignmentStatus::Panicked => {
            error!(assignment = %reference, reservation = %reservation, status = %status, duration_ms, "Assignment finished")
        }
    }
}

// =============================================================================
// Task body
// =============================================================================

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "assignment panicked".to_string()
    }
}

/// Run one assignment to its terminal report
///
/// Expands inputs, calls the work function and shrinks its outputs. The work
/// is raced against the token (token first) and panics are caught and
/// reported as critical.
pub(crate) async fn run_assignment<P: Provider>(
    provider: Arc<P>,
    ctx: AssignContext<P::Context>,
    args: Args,
    kwargs: Kwargs,
    token: CancellationToken,
    latch: CompletionLatch,
) -> AssignmentStatus {
    let work = async {
        let unit = ctx.unit();
        let (args, kwargs) = ctx.codec().expand_inputs(unit, args, kwargs).await?;
        let returns = match provider.assign(&ctx, args, kwargs).await? {
            Some(returns) => Some(ctx.codec().shrink_outputs(unit, returns).await?),
            None => None,
        };
        Ok::<_, Error>(returns)
    };

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = AssertUnwindSafe(work).catch_unwind() => Some(result),
    };

    let handler = ctx.handler();
    match outcome {
        Some(result) if latch.claim_finish() => match result {
            Ok(Ok(returns)) => {
                handler.pass_done(returns).await;
                AssignmentStatus::Succeeded
            }
            Ok(Err(Error::Cancelled)) => {
                handler.pass_cancelled_done().await;
                AssignmentStatus::Cancelled
            }
            Ok(Err(e)) => {
                handler.pass_critical(e.to_fault()).await;
                AssignmentStatus::Failed
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                handler.pass_critical(Fault::new("Panicked", message)).await;
                AssignmentStatus::Panicked
            }
        },
        // Token fired, or an unassign claimed the latch first
        _ => {
            handler.pass_cancelled_done().await;
            AssignmentStatus::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(value: &str) -> Reference {
        Reference::new(value).unwrap()
    }

    #[test]
    fn test_latch_decides_once() {
        let latch = CompletionLatch::default();
        assert!(!latch.is_settled());
        assert!(latch.claim_finish());
        assert!(!latch.claim_cancel());
        assert!(latch.is_settled());

        let latch = CompletionLatch::default();
        assert!(latch.claim_cancel());
        assert!(!latch.claim_finish());
    }

    #[tokio::test]
    async fn test_spawn_reap_and_late_cancel() {
        let mut supervisor = AssignmentSupervisor::new(4);
        supervisor.spawn(reference("a-1"), reference("r-1"), |_token, latch| async move {
            latch.claim_finish();
            AssignmentStatus::Succeeded
        });
        assert!(supervisor.contains(&reference("a-1")));
        assert_eq!(supervisor.reservation_of(&reference("a-1")), Some(&reference("r-1")));

        let joined = supervisor.join_next().await.unwrap();
        supervisor.reap(joined);
        assert!(supervisor.is_empty());
        assert_eq!(supervisor.cancel(&reference("a-1")), CancelOutcome::AlreadyDone);
        assert_eq!(supervisor.cancel(&reference("a-2")), CancelOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let mut supervisor = AssignmentSupervisor::new(4);
        supervisor.spawn(reference("a-1"), reference("r-1"), |token, _latch| async move {
            token.cancelled().await;
            AssignmentStatus::Cancelled
        });

        assert_eq!(supervisor.cancel(&reference("a-1")), CancelOutcome::Cancelled);
        // A second unassign loses against the first
        assert_eq!(supervisor.cancel(&reference("a-1")), CancelOutcome::AlreadyDone);

        let (finished, status) = supervisor.join_next().await.unwrap().unwrap();
        assert_eq!(finished, reference("a-1"));
        assert_eq!(status, AssignmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_finished_ring_is_bounded() {
        let mut supervisor = AssignmentSupervisor::new(2);
        for i in 0..3 {
            supervisor.spawn(reference(&format!("a-{}", i)), reference("r-1"), |_t, _l| async {
                AssignmentStatus::Succeeded
            });
            let joined = supervisor.join_next().await.unwrap();
            supervisor.reap(joined);
        }
        assert_eq!(supervisor.cancel(&reference("a-0")), CancelOutcome::Unknown);
        assert_eq!(supervisor.cancel(&reference("a-2")), CancelOutcome::AlreadyDone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_stubborn_tasks() {
        let mut supervisor = AssignmentSupervisor::new(4);
        supervisor.spawn(reference("a-1"), reference("r-1"), |_token, _latch| async {
            // Ignores cancellation
            tokio::time::sleep(Duration::from_secs(3600)).await;
            AssignmentStatus::Succeeded
        });
        supervisor.shutdown(Duration::from_millis(100)).await;
        assert!(supervisor.is_empty());
    }
}
