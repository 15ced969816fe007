//! bugwire-core - request-scoped context engine and submission pipeline.
//!
//! This crate is the core of the bugwire in-process bug tracking agent. It
//! isolates tracking state per logical request, accumulates a bounded
//! timeline of observed events per context, turns exceptions and manual
//! reports into deduplicated bug payloads, and drives those payloads through
//! a user filter chain and a transport with a fixed retry/fallback taxonomy.
//!
//! Instrumentation hooks (console/HTTP interceptors, framework middleware)
//! and the wire-level HTTP client live outside this crate; they interact
//! with the core only through [`agent::EventSink`] and the
//! [`transport::Transport`] trait.
//!
//! # Modules
//!
//! - [`agent`]: the process-wide engine object with its `init`/`destroy`
//!   lifecycle and the caller-facing reporting API
//! - [`config`]: strict option schema, defaults and hard-limit clamping
//! - [`context`]: per-request context store with ownership guarding
//! - [`filter`]: sequential user filter chain executor
//! - [`fingerprint`]: stable dedup hashing for exceptions and console events
//! - [`guard`]: self-protection latches and the submission timeout race
//! - [`report`]: submission payload assembly
//! - [`submission`]: the submission coordinator state machine
//! - [`timeline`]: timeline items and the bounded per-context buffer
//! - [`transport`]: the collector transport boundary and its error taxonomy
//!
//! # Runtime Requirements
//!
//! The engine is event-loop driven: every context is owned by exactly one
//! logical task at a time and all suspension points the engine controls
//! (filter continuations, transport calls, the anti-hang timeout) carry
//! their originating context explicitly. A current-thread tokio runtime is
//! sufficient.

pub mod agent;
pub mod config;
pub mod context;
pub mod filter;
pub mod fingerprint;
pub mod guard;
pub mod report;
pub mod submission;
pub mod timeline;
pub mod transport;

pub use agent::{Agent, BugInput, EventSink};
pub use config::{AgentConfig, AgentOptions, ConfigError, ProxyOptions, ServerOptions, Stage};
pub use context::{Context, ContextStore, TrackedUser};
pub use filter::{FilterChainError, FilterNext, SubmissionFilter};
pub use guard::ExitHook;
pub use report::{AgentBatchItem, AgentData, IncidentSummary, ServerIdentity};
pub use submission::{AgentError, SubmissionAcknowledge};
pub use timeline::{ExceptionInfo, TimelineItem};
pub use transport::{RejectionReason, Transport, TransportError, TransportErrorCode};

/// Agent identity reported in every payload and mixed into dedup hashes.
pub const AGENT_ID: &str = "backendAgent";

/// Platform identity reported in every payload.
pub const PLATFORM: &str = "rust";

/// Agent version reported in every payload.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
