//! The submission pipeline: build, filter, send, classify.
//!
//! Every submission walks the same state machine, driven by the engine:
//!
//! ```text
//!   ┌──────────┐     ┌───────────┐     ┌─────────┐  success  ┌───────────┐
//!   │ BUILDING │────▶│ FILTERING │────▶│ SENDING │──────────▶│ DELIVERED │
//!   └──────────┘     └─────┬─────┘     └────┬────┘           └───────────┘
//!                          │                │ failure
//!                   filter error            ▼
//!                          │         ┌──────────┐ fatal table / 429 / 4xx
//!                          │         │ classify │────────▶ FATAL_REJECTED
//!                          ▼         └──┬────┬──┘
//!            ┌────────────────────┐ 400 │    │ 5xx, network
//!            │ USER_FILTER_FAILED │◀────┘    ▼
//!            └─────────┬──────────┘   ┌──────────────────────┐
//!                      │              │ crash-report fallback │
//!                      ▼              └──────────────────────┘
//!          one diagnostic resend, then DELIVERED (degraded)
//! ```
//!
//! - **BUILDING** assembles the envelope from a context snapshot; pure, no
//!   I/O ([`crate::report`]).
//! - **FILTERING** runs the user filter chain over a dedicated copy
//!   ([`crate::filter`]). A filter failure purges the context timeline and
//!   degrades to a diagnostic report rather than dropping the bug.
//! - **SENDING** hands the payload to the transport and classifies any
//!   failure ([`disposition`]): a fixed table of unrecoverable codes
//!   surfaces to the caller, HTTP 400 retries once as a diagnostic report,
//!   429 and other 4xx are fatal with specific hints, and everything else
//!   escalates to an anonymized crash report about the delivery failure
//!   itself.
//!
//! The caller gets back one code from the closed
//! [`SubmissionAcknowledge`] set; only configuration and fatal transport
//! problems surface as [`AgentError`] values.

pub mod acknowledge;
pub mod disposition;
pub mod error;

pub use acknowledge::SubmissionAcknowledge;
pub use disposition::{FailureDisposition, classify_failure};
pub use error::AgentError;
