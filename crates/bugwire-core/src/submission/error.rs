//! Caller-facing submission errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportErrorCode;

/// Errors surfaced to callers of the reporting API.
///
/// Everything else resolves to a [`super::SubmissionAcknowledge`] code:
/// the reporting API only fails for configuration problems and for
/// transport failures that no retry can fix.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The engine has not been initialized (or was destroyed).
    #[error("the agent is not initiated; call init first")]
    NotInitiated,

    /// Option validation failed during `init`.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The bug cannot be submitted and retrying would not help.
    #[error("bug cannot be submitted: {hint}")]
    FatalSubmission {
        /// Operator-facing hint describing what to fix.
        hint: String,
        /// Classification code, when the transport assigned one.
        code: Option<TransportErrorCode>,
        /// HTTP status, when a response was received.
        status_code: Option<u16>,
    },
}
