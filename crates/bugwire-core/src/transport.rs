//! The collector transport boundary.
//!
//! The wire-level HTTP client lives outside this crate; the core only
//! defines the seam it talks through. A transport takes a fully-built
//! payload and resolves once the collector acknowledged or rejected it,
//! reporting failures as [`TransportError`] values carrying enough
//! structure for the submission coordinator to classify them (fatal,
//! retry-as-diagnostic, or escalate to a crash report).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::report::AgentData;

/// Sends payloads to the collector.
///
/// Implementations must not retry internally; retry and fallback policy
/// belongs to the submission coordinator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submits `payload`. `is_crash_report` selects the anonymous
    /// crash-report endpoint variant.
    async fn send(&self, payload: &AgentData, is_crash_report: bool) -> Result<(), TransportError>;
}

/// Structured reason attached to a schema-validation rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionReason {
    /// Validation keyword (`additionalProperties`, `isApiKeyValid`, ...).
    pub keyword: String,
    /// Human-readable detail, when the collector provided one.
    pub message: Option<String>,
}

impl RejectionReason {
    /// Builds a reason from its keyword.
    #[must_use]
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            message: None,
        }
    }
}

/// Classification codes a transport attaches to failures.
///
/// The first seven are the unrecoverable table: submission errors the
/// coordinator surfaces to the caller without retrying, because no later
/// attempt can succeed until the operator fixes the config or credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    /// The collector rejected the project credentials.
    InvalidApiKey,
    /// The collector answered with a redirect, which is not followed.
    UnsupportedRedirection,
    /// TLS/plaintext mismatch between proxy and collector connections.
    ProtocolMismatch,
    /// Self-signed certificate without a configured `ca` bundle.
    UnverifiedLeafSignature,
    /// The collector's certificate has expired.
    CertificateExpired,
    /// TCP connection refused.
    ConnectionRefused,
    /// DNS resolution failed.
    HostNotFound,

    /// Socket timed out; transient, escalates to a crash report.
    SocketTimeout,
    /// Host unreachable; transient, escalates to a crash report.
    HostUnreachable,
    /// Connection reset; transient, escalates to a crash report.
    ConnectionReset,
}

impl TransportErrorCode {
    /// The operator hint for unrecoverable codes, `None` for transient
    /// ones.
    #[must_use]
    pub const fn fatal_hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidApiKey => Some("`apiKey` or `apiSecret` is invalid"),
            Self::UnsupportedRedirection => Some("redirection is not supported"),
            Self::ProtocolMismatch => Some(
                "the connections to the proxy and the collector must both be secured or both \
                 plain; a mixed state will never work",
            ),
            Self::UnverifiedLeafSignature => Some(
                "the collector connection is secured with a self-signed certificate but no `ca` \
                 bundle was configured on the `server` object",
            ),
            Self::CertificateExpired => {
                Some("the certificate of the collector connection has expired")
            },
            Self::ConnectionRefused | Self::HostNotFound => {
                Some("make sure the `server` config is correct")
            },
            Self::SocketTimeout | Self::HostUnreachable | Self::ConnectionReset => None,
        }
    }

    /// Maps a schema-rejection keyword onto a code, for collectors that
    /// report credential failures as validation reasons.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "isApiKeyValid" => Some(Self::InvalidApiKey),
            _ => None,
        }
    }
}

/// A classified transport failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Human-readable description.
    pub message: String,
    /// Classification code, when the transport could assign one.
    pub code: Option<TransportErrorCode>,
    /// HTTP status, when a response was received.
    pub status_code: Option<u16>,
    /// Structured rejection reasons, present on schema failures.
    pub reasons: Vec<RejectionReason>,
    /// Echo of the rejected payload, for diagnostics.
    pub req_body: Option<Value>,
}

impl TransportError {
    /// Builds an unclassified error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status_code: None,
            reasons: Vec::new(),
            req_body: None,
        }
    }

    /// Attaches a classification code.
    #[must_use]
    pub fn with_code(mut self, code: TransportErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches the HTTP status.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Attaches schema-rejection reasons.
    #[must_use]
    pub fn with_reasons(mut self, reasons: Vec<RejectionReason>) -> Self {
        self.reasons = reasons;
        self
    }

    /// Attaches the rejected payload echo.
    #[must_use]
    pub fn with_req_body(mut self, body: Value) -> Self {
        self.req_body = Some(body);
        self
    }

    /// The code to classify on: the explicit code, or one derived from the
    /// first rejection reason's keyword.
    #[must_use]
    pub fn effective_code(&self) -> Option<TransportErrorCode> {
        self.code.or_else(|| {
            self.reasons
                .first()
                .and_then(|reason| TransportErrorCode::from_keyword(&reason.keyword))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_carry_hints() {
        assert!(TransportErrorCode::InvalidApiKey.fatal_hint().is_some());
        assert!(TransportErrorCode::HostNotFound.fatal_hint().is_some());
        assert!(TransportErrorCode::SocketTimeout.fatal_hint().is_none());
    }

    #[test]
    fn effective_code_falls_back_to_reason_keyword() {
        let err = TransportError::new("HTTP Error (400)")
            .with_status(400)
            .with_reasons(vec![RejectionReason::new("isApiKeyValid")]);
        assert_eq!(
            err.effective_code(),
            Some(TransportErrorCode::InvalidApiKey)
        );

        let err = TransportError::new("HTTP Error (400)")
            .with_status(400)
            .with_reasons(vec![RejectionReason::new("additionalProperties")]);
        assert_eq!(err.effective_code(), None);
    }

    #[test]
    fn explicit_code_wins_over_reasons() {
        let err = TransportError::new("refused")
            .with_code(TransportErrorCode::ConnectionRefused)
            .with_reasons(vec![RejectionReason::new("isApiKeyValid")]);
        assert_eq!(
            err.effective_code(),
            Some(TransportErrorCode::ConnectionRefused)
        );
    }
}
