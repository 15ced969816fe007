//! Sequential submission filter chain.
//!
//! Before a payload reaches the transport, user-supplied filters get a
//! chance to transform it: scrub fields, attach data, rewrite titles. The
//! chain is strictly sequential. Each filter receives the payload plus a
//! [`FilterNext`] continuation and must eventually resolve it with the
//! transformed payload, synchronously or after an arbitrary delay; the
//! resolved value feeds the following filter.
//!
//! The continuation is a consuming slot: the first `resolve` wins and
//! every later call (including from a filter that resolves and then
//! panics) is a no-op. A filter that panics before resolving, or drops its
//! continuation without resolving, fails the chain with a
//! [`FilterChainError`]; the submission coordinator then purges the
//! context timeline and submits a diagnostic report instead, so faulty
//! user code degrades a report rather than losing it.
//!
//! The coordinator runs the whole chain inside a transient isolated
//! context (discarded on completion), keeping filter failures and any
//! events tracked during filtering out of the caller's context.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::report::AgentData;

/// A user-supplied payload transform.
///
/// Shared so that global and context-scoped filter lists can be snapshotted
/// cheaply when a chain run starts.
pub type SubmissionFilter = Arc<dyn Fn(AgentData, FilterNext) + Send + Sync>;

/// Continuation handed to each filter. First call wins; the slot consumes
/// itself on resolution.
#[derive(Clone)]
pub struct FilterNext {
    slot: Arc<Mutex<Option<oneshot::Sender<AgentData>>>>,
}

impl FilterNext {
    fn new() -> (Self, oneshot::Receiver<AgentData>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Passes the transformed payload to the next filter. Calls after the
    /// first are ignored.
    pub fn resolve(&self, data: AgentData) {
        let sender = self
            .slot
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(tx) = sender {
            // The receiver only disappears if the chain was abandoned.
            let _ = tx.send(data);
        }
    }
}

/// Ways a filter chain run can fail.
#[derive(Debug, Clone, Error)]
pub enum FilterChainError {
    /// A filter panicked before resolving its continuation.
    #[error("a submission filter panicked: {0}")]
    Panicked(String),

    /// A filter returned and dropped its continuation without resolving.
    #[error("a submission filter dropped its continuation without calling next")]
    AbandonedNext,
}

/// Runs `filters` over `initial` strictly in order.
///
/// An empty chain is the identity and completes without suspending. The
/// input payload should be a dedicated copy: filters own what they are
/// given and the coordinator's state must stay out of their reach.
pub async fn run_chain(
    filters: &[SubmissionFilter],
    initial: AgentData,
) -> Result<AgentData, FilterChainError> {
    let mut data = initial;

    for filter in filters {
        // The executor keeps no handle on the continuation: once the
        // filter returns, the only senders left are the ones the filter
        // itself kept alive. A filter that forgot to resolve is therefore
        // observable as a closed channel instead of a hang.
        let (next, rx) = FilterNext::new();
        let call = {
            let filter = Arc::clone(filter);
            let input = data;
            move || filter(input, next)
        };

        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(()) => match rx.await {
                Ok(transformed) => data = transformed,
                Err(_) => return Err(FilterChainError::AbandonedNext),
            },
            Err(panic) => {
                // A filter that resolved before panicking already produced
                // its output; the panic is its own problem.
                let mut rx = rx;
                match rx.try_recv() {
                    Ok(transformed) => data = transformed,
                    Err(_) => return Err(FilterChainError::Panicked(panic_message(&*panic))),
                }
            },
        }
    }

    Ok(data)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AgentData;

    fn empty_payload() -> AgentData {
        AgentData::anonymous_stub()
    }

    fn tag_appender(tag: &'static str) -> SubmissionFilter {
        Arc::new(move |mut data: AgentData, next: FilterNext| {
            data.tags.push(tag.to_owned());
            next.resolve(data);
        })
    }

    #[tokio::test]
    async fn filters_run_in_order() {
        let filters = vec![tag_appender("a"), tag_appender("b")];
        let result = run_chain(&filters, empty_payload()).await.unwrap();
        assert_eq!(result.tags, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let result = run_chain(&[], empty_payload()).await.unwrap();
        assert!(result.tags.is_empty());
    }

    #[tokio::test]
    async fn delayed_resolution_is_awaited() {
        let delayed: SubmissionFilter = Arc::new(|mut data: AgentData, next: FilterNext| {
            data.tags.push("late".to_owned());
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                next.resolve(data);
            });
        });

        let result = run_chain(&[delayed, tag_appender("after")], empty_payload())
            .await
            .unwrap();
        assert_eq!(result.tags, vec!["late".to_owned(), "after".to_owned()]);
    }

    #[tokio::test]
    async fn first_resolve_wins() {
        let double: SubmissionFilter = Arc::new(|data: AgentData, next: FilterNext| {
            let mut first = data.clone();
            first.tags.push("first".to_owned());
            next.resolve(first);

            let mut second = data;
            second.tags.push("second".to_owned());
            next.resolve(second);
        });

        let result = run_chain(&[double], empty_payload()).await.unwrap();
        assert_eq!(result.tags, vec!["first".to_owned()]);
    }

    #[tokio::test]
    async fn panic_before_resolve_fails_the_chain() {
        let exploding: SubmissionFilter =
            Arc::new(|_data: AgentData, _next: FilterNext| panic!("filter bug"));

        let err = run_chain(&[exploding], empty_payload()).await.unwrap_err();
        assert!(matches!(err, FilterChainError::Panicked(msg) if msg.contains("filter bug")));
    }

    #[tokio::test]
    async fn panic_after_resolve_keeps_the_payload() {
        let resolve_then_panic: SubmissionFilter = Arc::new(|mut data: AgentData, next: FilterNext| {
            data.tags.push("kept".to_owned());
            next.resolve(data);
            panic!("too late to matter");
        });

        let result = run_chain(&[resolve_then_panic], empty_payload())
            .await
            .unwrap();
        assert_eq!(result.tags, vec!["kept".to_owned()]);
    }

    #[tokio::test]
    async fn dropped_continuation_fails_the_chain() {
        let forgetful: SubmissionFilter = Arc::new(|_data: AgentData, _next: FilterNext| {
            // Returns without resolving; both handles drop here.
        });

        let err = run_chain(&[forgetful], empty_payload()).await.unwrap_err();
        assert!(matches!(err, FilterChainError::AbandonedNext));
    }
}
