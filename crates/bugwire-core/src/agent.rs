//! The process-wide engine object and the caller-facing reporting API.
//!
//! One [`Agent`] exists per process, created at startup and driven through
//! an explicit `init`/`destroy` lifecycle; there are no hidden statics.
//! Between `init` and `destroy` the agent owns the context store, the
//! global filter and custom-data lists, the self-protection latches and
//! the transport handle. `destroy` drops all of it, which is why every
//! operation re-resolves the engine instead of caching it.
//!
//! Instrumentation adapters feed the engine exclusively through the
//! [`EventSink`] write path and [`Agent::capture_unhandled`]; the core
//! never assumes how events are produced.
//!
//! Engine-internal failures never propagate into user code: the reporting
//! entry points run their work on an isolation boundary, and a panic
//! inside the engine's own control flow converts into an anonymized crash
//! report followed by the configured exit policy.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::config::{AgentConfig, AgentOptions};
use crate::context::{Context, ContextStore, Resolution, TrackedUser};
use crate::filter::{self, SubmissionFilter};
use crate::fingerprint;
use crate::guard::{self, ExitHook, RaceOutcome, SelfProtection, default_exit_hook};
use crate::report::{self, AgentData, IncidentSummary, ServerIdentity};
use crate::submission::{
    AgentError, FailureDisposition, SubmissionAcknowledge, classify_failure,
};
use crate::timeline::{ExceptionInfo, TimelineItem};
use crate::transport::{Transport, TransportError};

const FILTER_THREW_MSG: &str = "A submission filter threw while transforming the payload. The \
                                timeline was purged and a diagnostic report was submitted instead.";

const SCHEMA_REJECTED_MSG: &str = "The collector rejected the payload structure. The timeline was \
                                   purged and a diagnostic report was submitted instead.";

/// What a manual bug report is made from.
#[derive(Debug, Clone)]
pub enum BugInput {
    /// A plain message, tracked as a console error.
    Message(String),
    /// A captured exception.
    Exception(ExceptionInfo),
}

impl From<&str> for BugInput {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_owned())
    }
}

impl From<String> for BugInput {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}

impl From<ExceptionInfo> for BugInput {
    fn from(info: ExceptionInfo) -> Self {
        Self::Exception(info)
    }
}

/// The write path instrumentation adapters use.
///
/// Implementations must tolerate being called before the engine is
/// initialized (no-op) and with no active context (falls back to the
/// global context).
pub trait EventSink: Send + Sync {
    /// Records an observed event on the given context, or the global
    /// context when `scope` is `None`.
    fn append_timeline_item(&self, scope: Option<&Context>, item: TimelineItem);
}

/// The process-wide tracking agent.
pub struct Agent {
    engine: RwLock<Option<Arc<Engine>>>,
    exit_hook: ExitHook,
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent {
    /// Creates an uninitiated agent with the production exit hook.
    #[must_use]
    pub fn new() -> Self {
        Self::with_exit_hook(default_exit_hook())
    }

    /// Creates an uninitiated agent with a custom exit hook. Embedders and
    /// tests use this to observe the exit request instead of dying.
    #[must_use]
    pub fn with_exit_hook(exit_hook: ExitHook) -> Self {
        Self {
            engine: RwLock::new(None),
            exit_hook,
        }
    }

    /// Validates options and brings the engine up. Idempotent: a second
    /// call on an initiated agent is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the options fail validation;
    /// configuration errors are fatal to `init` and never retried.
    pub fn init(
        &self,
        options: AgentOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<(), AgentError> {
        let mut slot = self.engine.write().expect("agent engine lock poisoned");
        if slot.is_some() {
            return Ok(());
        }

        let config = options.validate()?;
        if !config.tracking_enabled {
            warn!("tracking is disabled; bugs will not be reported");
        }

        let store = ContextStore::new();
        store.global().with_state(|state| {
            state.tags = config.tags.clone();
            state.stage = config.stage;
        });

        *slot = Some(Arc::new(Engine {
            config,
            identity: ServerIdentity::detect(),
            transport,
            store,
            guard: SelfProtection::new(),
            filters: Mutex::new(Vec::new()),
            custom_data: Mutex::new(Vec::new()),
            alerts: Mutex::new(HashSet::new()),
            exit_hook: Arc::clone(&self.exit_hook),
        }));

        Ok(())
    }

    /// Tears the engine down: filters, custom data, contexts and the
    /// self-protection latches are all dropped. Idempotent.
    pub fn destroy(&self) {
        let mut slot = self.engine.write().expect("agent engine lock poisoned");
        *slot = None;
    }

    /// Whether `init` has completed and `destroy` has not.
    #[must_use]
    pub fn is_initiated(&self) -> bool {
        self.engine
            .read()
            .expect("agent engine lock poisoned")
            .is_some()
    }

    fn engine(&self) -> Option<Arc<Engine>> {
        self.engine
            .read()
            .expect("agent engine lock poisoned")
            .clone()
    }

    /// Creates the context for one inbound request. Returns `None` before
    /// `init`.
    #[must_use]
    pub fn begin_request(&self, request_id: Option<String>) -> Option<Context> {
        let engine = self.engine()?;
        if !engine.config.tracking_enabled {
            return None;
        }
        Some(engine.store.create_request_context(request_id))
    }

    /// Attributes the current context's reports to a user. Invalid users
    /// (neither id nor logon) are rejected with a tracked diagnostic.
    pub fn set_user(&self, scope: Option<&Context>, user: TrackedUser) {
        let Some(engine) = self.engine() else {
            warn!("set_user: initiate the agent first");
            return;
        };
        if !engine.config.tracking_enabled {
            return;
        }

        let Some(ctx) = engine.resolve_or_alert(scope) else {
            return;
        };

        if user.user_id.is_none() && user.logon.is_none() {
            engine.track_console_error(
                &ctx,
                vec![serde_json::json!(
                    "cannot track the user: neither `userId` nor `logon` is set"
                )],
            );
            return;
        }

        ctx.with_state(|state| state.user = Some(user));
    }

    /// Registers a process-wide submission filter, run before any
    /// context-scoped ones.
    pub fn add_filter(&self, filter: SubmissionFilter) {
        let Some(engine) = self.engine() else {
            warn!("add_filter: initiate the agent first");
            return;
        };
        if !engine.config.tracking_enabled {
            return;
        }
        engine
            .filters
            .lock()
            .expect("filter list lock poisoned")
            .push(filter);
    }

    /// Registers a submission filter scoped to the given context.
    pub fn add_context_filter(&self, scope: Option<&Context>, filter: SubmissionFilter) {
        let Some(engine) = self.engine() else {
            warn!("add_context_filter: initiate the agent first");
            return;
        };
        if !engine.config.tracking_enabled {
            return;
        }
        if let Some(ctx) = engine.resolve_or_alert(scope) {
            ctx.with_state(|state| state.filters.push(filter));
        }
    }

    /// Attaches process-wide custom data to every subsequent report.
    pub fn add_custom_data(&self, data: serde_json::Value) {
        let Some(engine) = self.engine() else {
            warn!("add_custom_data: initiate the agent first");
            return;
        };
        if !engine.config.tracking_enabled {
            return;
        }
        engine
            .custom_data
            .lock()
            .expect("custom data lock poisoned")
            .push(data);
    }

    /// Attaches custom data to reports from the given context.
    pub fn add_context_custom_data(&self, scope: Option<&Context>, data: serde_json::Value) {
        let Some(engine) = self.engine() else {
            warn!("add_context_custom_data: initiate the agent first");
            return;
        };
        if !engine.config.tracking_enabled {
            return;
        }
        if let Some(ctx) = engine.resolve_or_alert(scope) {
            ctx.with_state(|state| state.custom_data.push(data));
        }
    }

    /// Reports a bug manually.
    ///
    /// Resolves with an acknowledge code for every recoverable outcome;
    /// fails only before `init` and for fatal transport problems. Runs on
    /// an isolation boundary: a panic inside the engine converts into a
    /// crash report instead of reaching the caller.
    ///
    /// # Errors
    ///
    /// [`AgentError::NotInitiated`] before `init`, and
    /// [`AgentError::FatalSubmission`] when the collector is unreachable
    /// for a reason no retry can fix.
    pub async fn report_bug(
        &self,
        bug: impl Into<BugInput>,
        scope: Option<&Context>,
    ) -> Result<SubmissionAcknowledge, AgentError> {
        let Some(engine) = self.engine() else {
            return Err(AgentError::NotInitiated);
        };

        let bug = bug.into();
        let scope = scope.cloned();
        let task_engine = Arc::clone(&engine);
        let isolated =
            tokio::spawn(async move { task_engine.report_bug_inner(bug, scope).await });

        match isolated.await {
            Ok(result) => result,
            Err(join_err) => engine.handle_internal_panic(join_err).await,
        }
    }

    /// Runs a unit of work inside a fresh owned context.
    ///
    /// Any error returned by the work, and any panic escaping it, is
    /// funneled to the uncaught-exception capture path exactly once
    /// (driving the configured exit policy). Returns the work's value, or
    /// `None` when the work failed or the agent is not initiated.
    pub async fn run_isolated<T, E, F, Fut>(
        &self,
        request_id: Option<String>,
        work: F,
    ) -> Option<T>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<ExceptionInfo> + Send + 'static,
    {
        let engine = self.engine()?;
        let ctx = engine.store.create_request_context(request_id);

        let task_ctx = ctx.clone();
        let isolated = tokio::spawn(async move { work(task_ctx).await });

        match isolated.await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                self.capture_unhandled(err.into(), Some(&ctx)).await;
                None
            },
            Err(join_err) if join_err.is_panic() => {
                let message = match join_err.into_panic().downcast::<String>() {
                    Ok(msg) => *msg,
                    Err(payload) => payload
                        .downcast::<&str>()
                        .map_or_else(|_| "unknown panic".to_owned(), |msg| (*msg).to_owned()),
                };
                self.capture_unhandled(ExceptionInfo::new("Panic", message), Some(&ctx))
                    .await;
                None
            },
            Err(_) => None,
        }
    }

    /// Handles an uncaught process-level exception: exactly one bounded
    /// submission attempt, then the configured exit policy.
    ///
    /// Fire-and-forget: all outcomes are logged, none returned. When
    /// `exit_on_uncaught_exceptions` is set, the process terminates with a
    /// non-zero status after the report is handled, success or not.
    pub async fn capture_unhandled(&self, error: ExceptionInfo, scope: Option<&Context>) {
        let Some(engine) = self.engine() else {
            return;
        };

        let scope = scope.cloned();
        let task_engine = Arc::clone(&engine);
        let isolated =
            tokio::spawn(async move { task_engine.capture_unhandled_inner(error, scope).await });

        if let Err(join_err) = isolated.await {
            let _ = engine.handle_internal_panic(join_err).await;
        }
    }
}

impl EventSink for Agent {
    fn append_timeline_item(&self, scope: Option<&Context>, item: TimelineItem) {
        // Tolerates pre-init calls: instrumentation may fire before the
        // embedder finished wiring the agent.
        let Some(engine) = self.engine() else {
            return;
        };
        if !engine.config.tracking_enabled {
            return;
        }
        engine.append(scope, item);
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Initialized engine state. Everything here is dropped on `destroy`.
struct Engine {
    config: AgentConfig,
    identity: ServerIdentity,
    transport: Arc<dyn Transport>,
    store: ContextStore,
    guard: SelfProtection,
    filters: Mutex<Vec<SubmissionFilter>>,
    custom_data: Mutex<Vec<serde_json::Value>>,
    alerts: Mutex<HashSet<String>>,
    exit_hook: ExitHook,
}

impl Engine {
    // ------------------------------------------------------------------
    // Context plumbing
    // ------------------------------------------------------------------

    /// Resolves the context to act on, alerting once and refusing when the
    /// scope was created outside this engine.
    fn resolve_or_alert(&self, scope: Option<&Context>) -> Option<Context> {
        match self.store.resolve(scope) {
            Resolution::Owned(ctx) => Some(ctx),
            Resolution::Foreign => {
                self.alert_once(
                    "nested foreign context; tracking disabled for the current request",
                );
                None
            },
        }
    }

    fn append(&self, scope: Option<&Context>, item: TimelineItem) {
        if let Some(ctx) = self.resolve_or_alert(scope) {
            ctx.append_item(item, self.config.timeline_limit);
        }
    }

    /// Records an engine diagnostic: logged for the operator and appended
    /// to the context timeline as a console error, so degraded reports
    /// still carry the evidence.
    fn track_console_error(
        &self,
        ctx: &Context,
        params: Vec<serde_json::Value>,
    ) -> IncidentSummary {
        warn!(diagnostic = ?params, "tracking diagnostic");
        let item = TimelineItem::console("error", params);
        let summary = IncidentSummary::of(&item);
        ctx.append_item(item, self.config.timeline_limit);
        summary
    }

    fn alert_once(&self, message: &str) {
        let key = fingerprint::alert_key(message);
        let fresh = self
            .alerts
            .lock()
            .expect("alert table lock poisoned")
            .insert(key);
        if fresh {
            warn!("{message}");
        }
    }

    // ------------------------------------------------------------------
    // Manual bug path
    // ------------------------------------------------------------------

    async fn report_bug_inner(
        self: Arc<Self>,
        bug: BugInput,
        scope: Option<Context>,
    ) -> Result<SubmissionAcknowledge, AgentError> {
        if !self.config.tracking_enabled {
            return Ok(SubmissionAcknowledge::SkippedTrackingDisabled);
        }

        let ctx = match self.store.resolve(scope.as_ref()) {
            Resolution::Owned(ctx) => ctx,
            Resolution::Foreign => {
                self.alert_once(
                    "nested foreign context; tracking disabled for the current request",
                );
                return Ok(SubmissionAcknowledge::SkippedNestedContext);
            },
        };

        if !self.config.allow_auto_submission && ctx.request_id().is_none() {
            info!("auto-submission is disabled and no request id is linked; skipping");
            return Ok(SubmissionAcknowledge::SkippedNoRequestId);
        }

        let summary = match bug {
            BugInput::Exception(info) => {
                let item = info.into_item(self.config.stacktrace_limit);
                let summary = IncidentSummary::of(&item);
                ctx.append_item(item, self.config.timeline_limit);
                summary
            },
            BugInput::Message(msg) => {
                let item = TimelineItem::console("error", vec![serde_json::json!(msg)]);
                let summary = IncidentSummary::of(&item);
                ctx.append_item(item, self.config.timeline_limit);
                summary
            },
        };

        let payload = self.build_payload(&ctx, &summary);
        let result = self.process(&ctx, payload).await;

        if !self.config.allow_auto_submission {
            if let Err(err) = &result {
                debug!(%err, "temp bug submission failed");
            }
            return Ok(SubmissionAcknowledge::TempBugReported);
        }

        let ack = result?;
        match ack {
            SubmissionAcknowledge::BugReported => {
                info!(title = %summary.short_title, "bug reported");
            },
            SubmissionAcknowledge::UserFilterErrorReported => {
                info!(
                    "a submission filter is not configured properly; a detailed report was \
                     submitted"
                );
            },
            SubmissionAcknowledge::CrashReportSent => {
                info!("crash report submitted successfully");
            },
            SubmissionAcknowledge::CrashReportDisabled => {
                info!(
                    "the delivery failed and the crash report cannot be sent; enable \
                     `reportAgentCrashes` to help us fix this kind of problem"
                );
            },
            _ => {},
        }
        Ok(ack)
    }

    // ------------------------------------------------------------------
    // Uncaught exception path
    // ------------------------------------------------------------------

    async fn capture_unhandled_inner(self: Arc<Self>, error: ExceptionInfo, scope: Option<Context>) {
        if !self.config.tracking_enabled {
            return;
        }

        let ctx = match self.store.resolve(scope.as_ref()) {
            Resolution::Owned(ctx) => ctx,
            Resolution::Foreign => {
                self.alert_once(
                    "nested foreign context; tracking disabled for the current request",
                );
                self.after_fatal_handled();
                return;
            },
        };

        // One submission per process: once latched, later uncaught
        // exceptions are dropped because the process is about to exit.
        if self.config.exit_on_uncaught_exceptions && !self.guard.latch_uncaught() {
            return;
        }

        if !self.config.allow_auto_submission && ctx.request_id().is_none() {
            self.after_fatal_handled();
            return;
        }

        let item = error.into_item(self.config.stacktrace_limit);
        let summary = IncidentSummary::of(&item);
        ctx.append_item(item, self.config.timeline_limit);

        let payload = self.build_payload(&ctx, &summary);

        // The submission races the configured deadline: the process is in
        // a known-bad state and must not outlive it waiting on the
        // collector. A result arriving after the deadline is a no-op.
        let engine = Arc::clone(&self);
        let race_ctx = ctx.clone();
        let outcome = guard::race_deadline(self.config.submission_timeout, async move {
            engine.process(&race_ctx, payload).await
        })
        .await;

        match outcome {
            RaceOutcome::TimedOut => {
                warn!(
                    "an error has been tracked but not submitted: the tracking process timed out"
                );
            },
            RaceOutcome::Completed(Ok(ack)) => {
                info!(%ack, "uncaught exception reported");
            },
            RaceOutcome::Completed(Err(err)) => {
                warn!(%err, "uncaught exception could not be submitted");
            },
        }

        self.after_fatal_handled();
    }

    /// Runs the exit policy after a fatal event (uncaught exception or
    /// internal crash) has been fully handled.
    fn after_fatal_handled(&self) {
        if !self.config.exit_on_uncaught_exceptions {
            return;
        }
        info!("exiting the process");
        (self.exit_hook)(1);
    }

    // ------------------------------------------------------------------
    // Submission pipeline
    // ------------------------------------------------------------------

    fn build_payload(&self, scope: &Context, summary: &IncidentSummary) -> AgentData {
        let global_custom_data = self
            .custom_data
            .lock()
            .expect("custom data lock poisoned")
            .clone();
        report::build_payload(
            &self.config,
            &self.identity,
            self.store.global(),
            scope,
            &global_custom_data,
            summary,
        )
    }

    /// FILTERING and SENDING: runs the filter chain over the payload
    /// inside a transient context, then drives the transport and
    /// classifies the result.
    async fn process(
        &self,
        scope: &Context,
        payload: AgentData,
    ) -> Result<SubmissionAcknowledge, AgentError> {
        let filters = {
            let mut list = self
                .filters
                .lock()
                .expect("filter list lock poisoned")
                .clone();
            scope.with_state(|state| list.extend(state.filters.iter().cloned()));
            list
        };

        // The chain runs bound to its own transient context, discarded on
        // completion, so filter failures and anything tracked during
        // filtering stay out of the caller's context.
        let chain_ctx = self.store.create_isolated();
        let chain_result = chain_ctx
            .bind(move |_transient| async move { filter::run_chain(&filters, payload).await })
            .await;

        match chain_result {
            Ok(filtered) => match self.transport.send(&filtered, false).await {
                Ok(()) => Ok(SubmissionAcknowledge::BugReported),
                Err(err) => self.handle_send_failure(scope, err).await,
            },
            Err(chain_err) => {
                scope.reset_timeline();
                self.track_console_error(scope, vec![serde_json::json!(FILTER_THREW_MSG)]);

                let item = ExceptionInfo::new("FilterError", chain_err.to_string())
                    .into_item(self.config.stacktrace_limit);
                let summary = IncidentSummary::of(&item);
                scope.append_item(item, self.config.timeline_limit);

                self.send_diagnostic(scope, &summary).await
            },
        }
    }

    async fn handle_send_failure(
        &self,
        scope: &Context,
        err: TransportError,
    ) -> Result<SubmissionAcknowledge, AgentError> {
        debug!(
            code = ?err.code,
            status = ?err.status_code,
            "bug cannot be submitted: {err}"
        );

        match classify_failure(&err) {
            FailureDisposition::Fatal { hint } => Err(AgentError::FatalSubmission {
                hint,
                code: err.effective_code(),
                status_code: err.status_code,
            }),

            FailureDisposition::RetryAsDiagnostic => {
                // Purge the timeline first: the payload was rejected by
                // the collector's schema and may carry data that should
                // never have left the process.
                scope.reset_timeline();
                self.track_console_error(scope, vec![serde_json::json!(SCHEMA_REJECTED_MSG)]);
                self.track_console_error(
                    scope,
                    vec![
                        serde_json::json!(err.message.clone()),
                        serde_json::json!(
                            err.reasons
                                .iter()
                                .map(|reason| reason.keyword.clone())
                                .collect::<Vec<_>>()
                        ),
                    ],
                );
                if let Some(body) = &err.req_body {
                    self.track_console_error(
                        scope,
                        vec![serde_json::json!("the rejected payload"), body.clone()],
                    );
                }

                let summary = self.track_console_error(
                    scope,
                    vec![serde_json::json!(format!(
                        "a submission filter caused an error: {}",
                        err.message
                    ))],
                );

                self.send_diagnostic(scope, &summary).await
            },

            FailureDisposition::EscalateToCrashReport => {
                let info = ExceptionInfo::new("DeliveryFailure", err.message.clone());
                self.submit_crash_report(info).await
            },
        }
    }

    /// The single USER_FILTER_FAILED resend: the report built from the
    /// post-reset context, never the original payload. Best-effort; a
    /// second rejection is logged and not retried.
    async fn send_diagnostic(
        &self,
        scope: &Context,
        summary: &IncidentSummary,
    ) -> Result<SubmissionAcknowledge, AgentError> {
        let payload = self.build_payload(scope, summary);
        if let Err(send_err) = self.transport.send(&payload, false).await {
            debug!(
                %send_err,
                "the diagnostic report was itself rejected; the local schema may be out of date"
            );
        }
        Ok(SubmissionAcknowledge::UserFilterErrorReported)
    }

    // ------------------------------------------------------------------
    // Crash-report fallback
    // ------------------------------------------------------------------

    /// Submits an anonymized report about a failure of the agent itself,
    /// bounded by the submission deadline and guarded against recursion.
    async fn submit_crash_report(
        &self,
        info: ExceptionInfo,
    ) -> Result<SubmissionAcknowledge, AgentError> {
        debug!(error = %info.message, "submitting agent crash report");

        if !self.config.report_agent_crashes {
            return Ok(SubmissionAcknowledge::CrashReportDisabled);
        }

        if self.config.exit_on_uncaught_exceptions && !self.guard.latch_crash() {
            debug!("a crash report is already in flight");
            return Ok(SubmissionAcknowledge::CrashReportDisabled);
        }

        let item = info.into_item(self.config.stacktrace_limit);
        let summary = IncidentSummary::of(&item);
        let payload = report::build_crash_payload(&self.config.api_key, item, &summary);

        let transport = Arc::clone(&self.transport);
        let outcome = guard::race_deadline(self.config.submission_timeout, async move {
            transport.send(&payload, true).await
        })
        .await;

        match outcome {
            RaceOutcome::Completed(Ok(())) => Ok(SubmissionAcknowledge::CrashReportSent),
            RaceOutcome::Completed(Err(err)) => Err(AgentError::FatalSubmission {
                hint: err.message.clone(),
                code: err.effective_code(),
                status_code: err.status_code,
            }),
            RaceOutcome::TimedOut => {
                // Unlatch so a later, unrelated crash can still report.
                self.guard.unlatch_crash();
                Err(AgentError::FatalSubmission {
                    hint: "the crash report timed out; the current error is not tracked"
                        .to_owned(),
                    code: None,
                    status_code: None,
                })
            },
        }
    }

    /// Converts a panic inside the engine's own control flow into a crash
    /// report, then runs the exit policy.
    async fn handle_internal_panic(
        &self,
        join_err: tokio::task::JoinError,
    ) -> Result<SubmissionAcknowledge, AgentError> {
        let message = if join_err.is_panic() {
            match join_err.into_panic().downcast::<String>() {
                Ok(msg) => *msg,
                Err(payload) => payload
                    .downcast::<&str>()
                    .map_or_else(|_| "unknown panic".to_owned(), |msg| (*msg).to_owned()),
            }
        } else {
            "engine task cancelled".to_owned()
        };

        warn!(%message, "the agent crashed; submitting the crash report");

        let outcome = self
            .submit_crash_report(ExceptionInfo::new("AgentCrash", message))
            .await;

        self.after_fatal_handled();
        outcome
    }
}
