//! Per-request tracking contexts and the store that owns them.
//!
//! A [`Context`] is the unit of isolation: one logical request (or other
//! unit of work) gets exactly one context, holding its timeline, linking
//! request id, tracked user, context-scoped filters and custom data.
//! Contexts never merge, and only one task owns a given context at a time,
//! so the interior mutex is uncontended in correct use; it exists to make
//! the handle cheaply clonable across the engine's own suspension points.
//!
//! The [`ContextStore`] resolves "the context to act on" for every
//! operation: an explicit handle when the caller is inside a tracked unit
//! of work, the process-global context when it is not, and a guarded
//! no-op when the handle was created by a different engine instance. That
//! last case is the foreign-context guard: writing through an unrecognized
//! handle would leak one task's data into another's, so such writes are
//! refused and reported once rather than acted on or crashed on.
//!
//! Context propagation is explicit. The engine re-binds the originating
//! context at every continuation it creates by cloning the handle into the
//! continuation ([`Context::bind`]); nothing is carried through ambient
//! task-local state.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::Stage;
use crate::filter::SubmissionFilter;
use crate::timeline::{Timeline, TimelineItem};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// The user a context's bug reports are attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedUser {
    /// Stable user identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Login name / email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logon: Option<String>,
    /// Peer address, filled from the inbound request when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ip: Option<String>,
}

impl TrackedUser {
    /// Whether no attribute is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.logon.is_none() && self.user_ip.is_none()
    }
}

/// How a context came to exist, which controls trimming behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Created for an inbound request; its first timeline item is expected
    /// to be the request marker and is preserved across trimming.
    Request,
    /// The process-global fallback context.
    Global,
    /// A transient context isolating engine-internal work (the filter
    /// chain, crash handling) from caller state.
    Isolated,
}

/// Mutable state of one context. Single-writer: only the task owning the
/// context mutates it.
#[derive(Default)]
pub struct ContextState {
    /// The bounded event log.
    pub timeline: Timeline,
    /// Frontend-linking request id, when the inbound request carried one.
    pub request_id: Option<String>,
    /// User attribution.
    pub user: Option<TrackedUser>,
    /// Context-scoped submission filters, run after the global ones.
    pub filters: Vec<SubmissionFilter>,
    /// Context-scoped custom data entries.
    pub custom_data: Vec<serde_json::Value>,
    /// Cached tags (set on the global context at init).
    pub tags: Vec<String>,
    /// Cached stage (set on the global context at init).
    pub stage: Option<Stage>,
}

impl std::fmt::Debug for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextState")
            .field("timeline_len", &self.timeline.len())
            .field("request_id", &self.request_id)
            .field("user", &self.user)
            .field("filters", &self.filters.len())
            .field("custom_data", &self.custom_data.len())
            .finish_non_exhaustive()
    }
}

struct ContextInner {
    engine_id: u64,
    kind: ContextKind,
    state: Mutex<ContextState>,
}

/// Handle to one context. Cloning shares the underlying state; handles are
/// what the engine passes through its asynchronous call chains.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("engine_id", &self.inner.engine_id)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl Context {
    fn new(engine_id: u64, kind: ContextKind) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                engine_id,
                kind,
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    /// Creates a context not owned by any engine instance, as an embedding
    /// layer would. Engine operations against it are guarded no-ops.
    #[must_use]
    pub fn foreign() -> Self {
        Self::new(0, ContextKind::Isolated)
    }

    /// How this context came to exist.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    /// Whether this context belongs to an inbound request, making its
    /// first timeline item preservable across trimming.
    #[must_use]
    pub fn is_request_bound(&self) -> bool {
        self.inner.kind == ContextKind::Request
    }

    /// Runs `f` with exclusive access to the context state.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder panicked while holding the lock; the
    /// single-writer ownership contract makes that an engine bug.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("context state lock poisoned");
        f(&mut state)
    }

    /// The linking request id, when present.
    #[must_use]
    pub fn request_id(&self) -> Option<String> {
        self.with_state(|state| state.request_id.clone())
    }

    /// Appends a timeline item under this context's trimming rules.
    pub(crate) fn append_item(&self, item: TimelineItem, limit: usize) {
        let request_bound = self.is_request_bound();
        self.with_state(|state| state.timeline.append(item, limit, request_bound));
    }

    /// Resets the timeline to its minimal scrubbed form.
    pub(crate) fn reset_timeline(&self) {
        let request_bound = self.is_request_bound();
        self.with_state(|state| state.timeline.reset(request_bound));
    }

    /// Binds a continuation to this context: the returned future runs `f`
    /// with a handle to the originating context, so work resumed after a
    /// suspension observes the same context that started it.
    pub fn bind<F, Fut>(&self, f: F) -> impl Future<Output = Fut::Output>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future,
    {
        let ctx = self.clone();
        async move { f(ctx).await }
    }

    fn engine_id(&self) -> u64 {
        self.inner.engine_id
    }
}

/// Result of resolving the context an operation should act on.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// An engine-owned context (explicit or the global fallback).
    Owned(Context),
    /// A context created outside this engine instance; the operation must
    /// not touch it.
    Foreign,
}

impl Resolution {
    /// The owned context, if resolution succeeded.
    #[must_use]
    pub fn owned(self) -> Option<Context> {
        match self {
            Self::Owned(ctx) => Some(ctx),
            Self::Foreign => None,
        }
    }
}

/// Creates and resolves contexts for one engine instance.
pub struct ContextStore {
    engine_id: u64,
    global: Context,
}

impl ContextStore {
    /// Creates a store with a fresh global context.
    #[must_use]
    pub fn new() -> Self {
        let engine_id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            engine_id,
            global: Context::new(engine_id, ContextKind::Global),
        }
    }

    /// The process-global context, used whenever no explicit context is
    /// active.
    #[must_use]
    pub fn global(&self) -> &Context {
        &self.global
    }

    /// Creates the context for one inbound request.
    #[must_use]
    pub fn create_request_context(&self, request_id: Option<String>) -> Context {
        let ctx = Context::new(self.engine_id, ContextKind::Request);
        ctx.with_state(|state| state.request_id = request_id.clone());
        ctx
    }

    /// Creates a transient context isolating engine-internal work.
    #[must_use]
    pub fn create_isolated(&self) -> Context {
        Context::new(self.engine_id, ContextKind::Isolated)
    }

    /// Whether `ctx` was created by this engine instance.
    #[must_use]
    pub fn is_owned(&self, ctx: &Context) -> bool {
        ctx.engine_id() == self.engine_id
    }

    /// Resolves the context an operation should act on: the explicit scope
    /// when given and owned, the global context when no scope is active,
    /// and [`Resolution::Foreign`] for unrecognized handles.
    #[must_use]
    pub fn resolve(&self, scope: Option<&Context>) -> Resolution {
        match scope {
            None => Resolution::Owned(self.global.clone()),
            Some(ctx) if self.is_owned(ctx) => Resolution::Owned(ctx.clone()),
            Some(_) => Resolution::Foreign,
        }
    }

    /// Replaces the global context with a fresh one, dropping accumulated
    /// state. Used by the `destroy` lifecycle.
    pub fn reset_global(&mut self) {
        self.global = Context::new(self.engine_id, ContextKind::Global);
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_global() {
        let store = ContextStore::new();
        let resolved = store.resolve(None).owned().expect("global expected");
        assert!(store.is_owned(&resolved));
        assert_eq!(resolved.kind(), ContextKind::Global);
    }

    #[test]
    fn resolve_returns_owned_scope() {
        let store = ContextStore::new();
        let ctx = store.create_request_context(Some("req-1".into()));
        let resolved = store.resolve(Some(&ctx)).owned().expect("owned expected");
        assert_eq!(resolved.request_id().as_deref(), Some("req-1"));
    }

    #[test]
    fn foreign_context_is_not_owned() {
        let store = ContextStore::new();
        let foreign = Context::foreign();
        assert!(!store.is_owned(&foreign));
        assert!(matches!(store.resolve(Some(&foreign)), Resolution::Foreign));
    }

    #[test]
    fn contexts_from_another_store_are_foreign() {
        let store_a = ContextStore::new();
        let store_b = ContextStore::new();
        let ctx_b = store_b.create_request_context(None);
        assert!(matches!(store_a.resolve(Some(&ctx_b)), Resolution::Foreign));
    }

    #[test]
    fn request_context_is_request_bound() {
        let store = ContextStore::new();
        assert!(store.create_request_context(None).is_request_bound());
        assert!(!store.create_isolated().is_request_bound());
        assert!(!store.global().is_request_bound());
    }

    #[test]
    fn reset_global_drops_state() {
        let mut store = ContextStore::new();
        store.global().with_state(|state| {
            state
                .timeline
                .append(TimelineItem::console("log", vec![]), 30, false);
        });
        assert_eq!(store.global().with_state(|state| state.timeline.len()), 1);

        store.reset_global();
        assert_eq!(store.global().with_state(|state| state.timeline.len()), 0);
        assert!(store.is_owned(store.global()));
    }

    #[tokio::test]
    async fn bind_carries_the_originating_context() {
        let store = ContextStore::new();
        let ctx = store.create_request_context(Some("req-7".into()));

        let request_id = ctx
            .bind(|bound| async move {
                tokio::task::yield_now().await;
                bound.request_id()
            })
            .await;

        assert_eq!(request_id.as_deref(), Some("req-7"));
    }
}
