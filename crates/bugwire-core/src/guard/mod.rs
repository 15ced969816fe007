//! Self-protection: recursion latches, the submission deadline race and
//! the process exit hook.
//!
//! The agent must stay observable when it is itself the thing failing,
//! without ever looping on its own reports or keeping a known-bad process
//! alive. Three mechanisms cooperate:
//!
//! - Two process-wide latches mark "an uncaught exception is already being
//!   handled" and "an agent crash is already being reported". They are set
//!   on first occurrence and stay set until an explicit engine reset,
//!   because once either fires the process is expected to terminate.
//! - Every latched submission races a deadline. The transport call is not
//!   forcibly aborted: it keeps running in its own task, and a
//!   first-completion latch decides whether its eventual result still
//!   matters. A result arriving after the deadline fired is a no-op.
//! - Process termination goes through an injectable exit hook so the
//!   policy ("exit non-zero after an uncaught exception is handled") is
//!   testable without dying.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

/// Per-process anti-recursion latches.
#[derive(Debug, Default)]
pub struct SelfProtection {
    uncaught_exception: AtomicBool,
    agent_crash: AtomicBool,
}

impl SelfProtection {
    /// Creates both latches unlatched.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the uncaught-exception flag. Returns `true` when this call
    /// was the first; later calls must not start another submission.
    pub fn latch_uncaught(&self) -> bool {
        self.uncaught_exception
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether an uncaught exception is already being handled.
    #[must_use]
    pub fn uncaught_latched(&self) -> bool {
        self.uncaught_exception.load(Ordering::Acquire)
    }

    /// Latches the agent-crash flag. Returns `true` when this call was the
    /// first.
    pub fn latch_crash(&self) -> bool {
        self.agent_crash
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the agent-crash latch after a crash submission timed out,
    /// so a later, unrelated crash can still be reported.
    pub fn unlatch_crash(&self) {
        self.agent_crash.store(false, Ordering::Release);
    }

    /// Clears both latches. Only the explicit engine reset path calls
    /// this.
    pub fn reset(&self) {
        self.uncaught_exception.store(false, Ordering::Release);
        self.agent_crash.store(false, Ordering::Release);
    }
}

/// First-completion latch deciding a deadline race.
#[derive(Debug, Default)]
pub struct CompletionLatch(AtomicBool);

impl CompletionLatch {
    /// Creates an open latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims completion. Returns `true` for exactly one caller.
    pub fn try_complete(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Outcome of racing a submission against its deadline.
#[derive(Debug)]
pub enum RaceOutcome<T> {
    /// The work completed before the deadline.
    Completed(T),
    /// The deadline fired first; the work keeps running detached and its
    /// eventual result is discarded.
    TimedOut,
}

/// Races `work` against `deadline`.
///
/// The work runs in its own task and is never aborted; whichever side
/// claims the completion latch first decides the outcome, and the losing
/// side's result is dropped. This mirrors the cancellation model of the
/// engine: cancelling is a latched flag checked by the later-arriving
/// branch, not a forced abort.
pub async fn race_deadline<T, F>(deadline: Duration, work: F) -> RaceOutcome<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let latch = Arc::new(CompletionLatch::new());
    let (tx, mut rx) = oneshot::channel();

    let task_latch = Arc::clone(&latch);
    tokio::spawn(async move {
        let result = work.await;
        if task_latch.try_complete() {
            let _ = tx.send(result);
        }
    });

    match tokio::time::timeout(deadline, &mut rx).await {
        Ok(Ok(result)) => RaceOutcome::Completed(result),
        // The worker task died without reporting (it panicked); treat as
        // timed out so the caller runs its failure path.
        Ok(Err(_)) => RaceOutcome::TimedOut,
        Err(_elapsed) => {
            if latch.try_complete() {
                RaceOutcome::TimedOut
            } else {
                // The work won the latch in the instant the deadline
                // fired; its result is sitting in the channel.
                let mut rx = rx;
                rx.try_recv()
                    .map_or(RaceOutcome::TimedOut, RaceOutcome::Completed)
            }
        },
    }
}

/// Hook invoked to terminate the process after a fatal event is handled.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// The production exit hook.
#[must_use]
pub fn default_exit_hook() -> ExitHook {
    Arc::new(|code| std::process::exit(code))
}
