//! End-to-end submission pipeline tests.
//!
//! These drive the public agent API against scripted transport doubles and
//! verify the acknowledge codes, the retry/fallback taxonomy, the
//! user-filter-error degradation and the self-protection behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bugwire_core::{
    Agent, AgentData, AgentError, AgentOptions, ExceptionInfo, FilterNext, RejectionReason,
    SubmissionAcknowledge, Transport, TransportError, TransportErrorCode,
};
use secrecy::SecretString;

// ============================================================================
// Test doubles
// ============================================================================

/// Records every send and answers from a script (default: success).
struct ScriptedTransport {
    sent: Mutex<Vec<(AgentData, bool)>>,
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    never_resolves: bool,
}

impl ScriptedTransport {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            never_resolves: false,
        })
    }

    fn scripted(script: Vec<Result<(), TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
            never_resolves: false,
        })
    }

    fn stuck() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            never_resolves: true,
        })
    }

    fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn sent_at(&self, idx: usize) -> (AgentData, bool) {
        self.sent.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, payload: &AgentData, is_crash_report: bool) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((payload.clone(), is_crash_report));

        if self.never_resolves {
            std::future::pending::<()>().await;
        }

        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Records exit requests instead of terminating.
struct ExitRecorder(AtomicI32);

impl ExitRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(AtomicI32::new(-1)))
    }

    fn code(&self) -> Option<i32> {
        match self.0.load(Ordering::SeqCst) {
            -1 => None,
            code => Some(code),
        }
    }
}

fn agent_with(
    transport: Arc<ScriptedTransport>,
    exits: &Arc<ExitRecorder>,
    options: AgentOptions,
) -> Agent {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bugwire_core=debug")
        .with_test_writer()
        .try_init();

    let recorder = Arc::clone(exits);
    let agent = Agent::with_exit_hook(Arc::new(move |code| {
        recorder.0.store(code, Ordering::SeqCst);
    }));
    agent.init(options, transport).expect("init should succeed");
    agent
}

fn base_options() -> AgentOptions {
    AgentOptions {
        api_key: Some("key-1".into()),
        api_secret: Some(SecretString::new("secret-1".into())),
        ..AgentOptions::default()
    }
}

// ============================================================================
// Acknowledge codes
// ============================================================================

#[tokio::test]
async fn string_bug_with_succeeding_transport_reports_bug() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let ack = agent.report_bug("payment handler exploded", None).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::BugReported);
    assert_eq!(transport.calls(), 1);

    let (payload, is_crash) = transport.sent_at(0);
    assert!(!is_crash);
    assert_eq!(payload.api_key.as_deref(), Some("key-1"));

    let batch = &payload.agent_data_patch[0];
    assert_eq!(batch.bug_type, "console");
    assert!(!batch.hash.is_empty());
    assert!(batch.short_title.contains("payment handler exploded"));
    assert!(!batch.is_temp);
}

#[tokio::test]
async fn exception_bug_carries_exception_item() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let info = ExceptionInfo::new("TypeError", "x is not a function")
        .with_frames(vec!["at handler (app.rs:10)".into()]);
    let ack = agent.report_bug(info, None).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::BugReported);
    let (payload, _) = transport.sent_at(0);
    let batch = &payload.agent_data_patch[0];
    assert_eq!(batch.bug_type, "exception");
    assert!(batch.short_title.contains("TypeError"));
}

#[tokio::test]
async fn no_request_id_skips_when_auto_submission_disabled() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let options = AgentOptions {
        allow_auto_submission: Some(false),
        ..base_options()
    };
    let agent = agent_with(Arc::clone(&transport), &exits, options);

    let ack = agent.report_bug("no linking possible", None).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::SkippedNoRequestId);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn request_id_yields_temp_bug_when_auto_submission_disabled() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let options = AgentOptions {
        allow_auto_submission: Some(false),
        ..base_options()
    };
    let agent = agent_with(Arc::clone(&transport), &exits, options);

    let ctx = agent.begin_request(Some("req-42".into())).unwrap();
    let ack = agent.report_bug("linked bug", Some(&ctx)).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::TempBugReported);
    assert_eq!(transport.calls(), 1);

    let (payload, _) = transport.sent_at(0);
    let batch = &payload.agent_data_patch[0];
    assert!(batch.is_temp);
    assert_eq!(batch.request_id.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn tracking_disabled_skips_without_transport() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let options = AgentOptions {
        tracking_enabled: Some(false),
        ..base_options()
    };
    let agent = agent_with(Arc::clone(&transport), &exits, options);

    let ack = agent.report_bug("nobody listens", None).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::SkippedTrackingDisabled);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn foreign_context_is_skipped() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let foreign = bugwire_core::Context::foreign();
    let ack = agent.report_bug("wrong scope", Some(&foreign)).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::SkippedNestedContext);
    assert_eq!(transport.calls(), 0);
}

// ============================================================================
// Failure taxonomy
// ============================================================================

#[tokio::test]
async fn fatal_code_rejects_without_retry() {
    let transport = ScriptedTransport::scripted(vec![Err(TransportError::new("refused")
        .with_code(TransportErrorCode::ConnectionRefused))]);
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let err = agent.report_bug("unreachable", None).await.unwrap_err();

    match err {
        AgentError::FatalSubmission { hint, code, .. } => {
            assert!(hint.contains("`server` config"));
            assert_eq!(code, Some(TransportErrorCode::ConnectionRefused));
        },
        other => panic!("expected fatal submission error, got {other}"),
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn rate_limit_is_fatal() {
    let transport = ScriptedTransport::scripted(vec![Err(TransportError::new(
        "HTTP Error (429)",
    )
    .with_status(429))]);
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let err = agent.report_bug("spammy", None).await.unwrap_err();
    match err {
        AgentError::FatalSubmission { hint, .. } => assert!(hint.contains("too many requests")),
        other => panic!("expected fatal submission error, got {other}"),
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn schema_rejection_resets_timeline_and_sends_diagnostic() {
    let rejection = TransportError::new("HTTP Error (400)")
        .with_status(400)
        .with_reasons(vec![RejectionReason::new("additionalProperties")])
        .with_req_body(serde_json::json!({"bad": "payload"}));
    let transport = ScriptedTransport::scripted(vec![Err(rejection), Ok(())]);
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let ctx = agent.begin_request(Some("req-7".into())).unwrap();
    let ack = agent.report_bug("sensitive data here", Some(&ctx)).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::UserFilterErrorReported);
    assert_eq!(transport.calls(), 2);

    // The second payload is the diagnostic one, rebuilt after the purge:
    // the original console item is gone, the request marker is not (the
    // context is request-bound), and the diagnostics describe the
    // rejection.
    let (diag, _) = transport.sent_at(1);
    let timeline = &diag.agent_data_patch[0].timeline;
    let rendered = serde_json::to_string(timeline).unwrap();
    assert!(!rendered.contains("sensitive data here"));
    assert!(rendered.contains("rejected the payload structure"));
    assert!(rendered.contains("additionalProperties"));
    assert!(diag.agent_data_patch[0].short_title.contains("caused an error"));
}

#[tokio::test]
async fn server_error_escalates_to_crash_report() {
    let transport = ScriptedTransport::scripted(vec![
        Err(TransportError::new("HTTP Error (502)").with_status(502)),
        Ok(()),
    ]);
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let ack = agent.report_bug("a bug nobody will see", None).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::CrashReportSent);
    assert_eq!(transport.calls(), 2);

    let (crash, is_crash) = transport.sent_at(1);
    assert!(is_crash);
    assert!(crash.api_key.is_none());
    assert!(crash.api_secret.is_none());
    assert_eq!(crash.server_name, "Anonymous");
    assert_eq!(crash.agent_data_patch[0].custom_data[0]["apiKey"], "key-1");
}

#[tokio::test]
async fn failing_crash_send_surfaces_without_retry() {
    let transport = ScriptedTransport::scripted(vec![
        Err(TransportError::new("HTTP Error (500)").with_status(500)),
        Err(TransportError::new("HTTP Error (500)").with_status(500)),
    ]);
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let err = agent.report_bug("doubly unlucky", None).await.unwrap_err();

    assert!(matches!(err, AgentError::FatalSubmission { .. }));
    // Original send plus exactly one crash-report attempt, nothing more.
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn crash_reporting_disabled_skips_the_fallback() {
    let transport = ScriptedTransport::scripted(vec![Err(TransportError::new(
        "HTTP Error (500)",
    )
    .with_status(500))]);
    let exits = ExitRecorder::new();
    let options = AgentOptions {
        report_agent_crashes: Some(false),
        ..base_options()
    };
    let agent = agent_with(Arc::clone(&transport), &exits, options);

    let ack = agent.report_bug("lost cause", None).await.unwrap();

    assert_eq!(ack, SubmissionAcknowledge::CrashReportDisabled);
    assert_eq!(transport.calls(), 1);
}

// ============================================================================
// Filter chain
// ============================================================================

#[tokio::test]
async fn filters_transform_the_payload_in_order() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent.add_filter(Arc::new(|mut data: AgentData, next: FilterNext| {
        data.tags.push("a".to_owned());
        next.resolve(data);
    }));
    agent.add_filter(Arc::new(|mut data: AgentData, next: FilterNext| {
        data.tags.push("b".to_owned());
        next.resolve(data);
    }));

    let ack = agent.report_bug("filtered", None).await.unwrap();
    assert_eq!(ack, SubmissionAcknowledge::BugReported);

    let (payload, _) = transport.sent_at(0);
    assert_eq!(payload.tags, vec!["a".to_owned(), "b".to_owned()]);
}

#[tokio::test]
async fn context_filters_run_after_global_ones() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent.add_filter(Arc::new(|mut data: AgentData, next: FilterNext| {
        data.tags.push("global".to_owned());
        next.resolve(data);
    }));

    let ctx = agent.begin_request(None).unwrap();
    agent.add_context_filter(
        Some(&ctx),
        Arc::new(|mut data: AgentData, next: FilterNext| {
            data.tags.push("context".to_owned());
            next.resolve(data);
        }),
    );

    agent.report_bug("scoped", Some(&ctx)).await.unwrap();
    let (payload, _) = transport.sent_at(0);
    assert_eq!(payload.tags, vec!["global".to_owned(), "context".to_owned()]);
}

#[tokio::test]
async fn panicking_filter_degrades_to_diagnostic_report() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent.add_filter(Arc::new(|_data: AgentData, _next: FilterNext| {
        panic!("filter exploded");
    }));

    let ack = agent.report_bug("the original bug", None).await.unwrap();
    assert_eq!(ack, SubmissionAcknowledge::UserFilterErrorReported);
    assert_eq!(transport.calls(), 1);

    // The delivered report is the diagnostic, not the original payload.
    let (payload, _) = transport.sent_at(0);
    let rendered = serde_json::to_string(&payload.agent_data_patch[0].timeline).unwrap();
    assert!(!rendered.contains("the original bug"));
    assert!(rendered.contains("submission filter threw"));
    assert!(payload.agent_data_patch[0].short_title.contains("FilterError"));
}

#[tokio::test]
async fn filter_calling_next_twice_delivers_first_payload() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent.add_filter(Arc::new(|data: AgentData, next: FilterNext| {
        let mut first = data.clone();
        first.tags.push("first".to_owned());
        next.resolve(first);

        let mut second = data;
        second.tags.push("second".to_owned());
        next.resolve(second);
    }));

    let ack = agent.report_bug("double next", None).await.unwrap();
    assert_eq!(ack, SubmissionAcknowledge::BugReported);

    let (payload, _) = transport.sent_at(0);
    assert_eq!(payload.tags, vec!["first".to_owned()]);
}

// ============================================================================
// Self-protection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn stuck_transport_times_out_and_exits() {
    let transport = ScriptedTransport::stuck();
    let exits = ExitRecorder::new();
    let options = AgentOptions {
        submission_timeout_ms: Some(1_000),
        ..base_options()
    };
    let agent = agent_with(Arc::clone(&transport), &exits, options);

    agent
        .capture_unhandled(ExceptionInfo::new("Error", "the process is doomed"), None)
        .await;

    // The coordinator completed despite the transport never resolving,
    // and the exit policy ran.
    assert_eq!(transport.calls(), 1);
    assert_eq!(exits.code(), Some(1));
}

#[tokio::test]
async fn uncaught_exception_reports_then_exits() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent
        .capture_unhandled(ExceptionInfo::new("Error", "boom"), None)
        .await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(exits.code(), Some(1));
}

#[tokio::test]
async fn second_uncaught_exception_is_dropped() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent
        .capture_unhandled(ExceptionInfo::new("Error", "first"), None)
        .await;
    agent
        .capture_unhandled(ExceptionInfo::new("Error", "second"), None)
        .await;

    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn no_exit_when_policy_disabled() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let options = AgentOptions {
        exit_on_uncaught_exceptions: Some(false),
        ..base_options()
    };
    let agent = agent_with(Arc::clone(&transport), &exits, options);

    agent
        .capture_unhandled(ExceptionInfo::new("Error", "survivable"), None)
        .await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(exits.code(), None);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn destroyed_agent_rejects_reports() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent.destroy();
    agent.destroy();

    let err = agent.report_bug("too late", None).await.unwrap_err();
    assert!(matches!(err, AgentError::NotInitiated));
    assert!(!agent.is_initiated());
}

#[tokio::test]
async fn reinit_after_destroy_starts_clean() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    agent.add_filter(Arc::new(|mut data: AgentData, next: FilterNext| {
        data.tags.push("stale".to_owned());
        next.resolve(data);
    }));
    agent.destroy();

    let fresh = ScriptedTransport::succeeding();
    agent
        .init(base_options(), Arc::clone(&fresh) as Arc<dyn Transport>)
        .unwrap();

    agent.report_bug("clean slate", None).await.unwrap();
    let (payload, _) = fresh.sent_at(0);
    assert!(payload.tags.is_empty());
}

#[tokio::test]
async fn run_isolated_returns_value_on_success() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let agent = agent_with(Arc::clone(&transport), &exits, base_options());

    let value = agent
        .run_isolated(None, |_ctx| async { Ok::<_, std::io::Error>(7) })
        .await;

    assert_eq!(value, Some(7));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn run_isolated_captures_errors_exactly_once() {
    let transport = ScriptedTransport::succeeding();
    let exits = ExitRecorder::new();
    let options = AgentOptions {
        exit_on_uncaught_exceptions: Some(false),
        ..base_options()
    };
    let agent = agent_with(Arc::clone(&transport), &exits, options);

    let value: Option<()> = agent
        .run_isolated(Some("req-1".into()), |_ctx| async {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "worker died"))
        })
        .await;

    assert_eq!(value, None);
    assert_eq!(transport.calls(), 1);

    let (payload, _) = transport.sent_at(0);
    assert!(payload.agent_data_patch[0]
        .short_title
        .contains("worker died"));
    assert_eq!(
        payload.agent_data_patch[0].request_id.as_deref(),
        Some("req-1")
    );
}
