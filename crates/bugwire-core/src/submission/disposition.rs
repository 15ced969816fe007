//! Classification of transport failures.
//!
//! The coordinator never inspects transport errors ad hoc; every failure
//! funnels through [`classify_failure`], which maps it onto one of four
//! dispositions. The mapping is fixed: a known-unrecoverable code beats
//! everything, then the HTTP status decides, and anything unclassified is
//! treated as an agent-health signal rather than retried.

use crate::transport::TransportError;

/// What to do about a failed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Surface to the caller; no retry can succeed until the operator
    /// fixes credentials or config.
    Fatal {
        /// Operator-facing hint.
        hint: String,
    },

    /// The collector rejected the payload schema (HTTP 400): purge the
    /// timeline and resend once as a diagnostic report.
    RetryAsDiagnostic,

    /// Transient or unknown failure (5xx, network errors): submit an
    /// anonymized crash report about the delivery failure itself instead
    /// of retrying the original bug.
    EscalateToCrashReport,
}

/// Classifies a transport failure.
#[must_use]
pub fn classify_failure(err: &TransportError) -> FailureDisposition {
    if let Some(hint) = err.effective_code().and_then(|code| code.fatal_hint()) {
        return FailureDisposition::Fatal {
            hint: hint.to_owned(),
        };
    }

    match err.status_code {
        Some(400) => FailureDisposition::RetryAsDiagnostic,
        Some(429) => FailureDisposition::Fatal {
            hint: "too many requests".to_owned(),
        },
        Some(status) if status < 500 => FailureDisposition::Fatal {
            hint: "make sure the `server` config is correct".to_owned(),
        },
        _ => FailureDisposition::EscalateToCrashReport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RejectionReason, TransportErrorCode};

    #[test]
    fn fatal_codes_beat_status() {
        let err = TransportError::new("refused")
            .with_code(TransportErrorCode::ConnectionRefused)
            .with_status(503);
        assert!(matches!(
            classify_failure(&err),
            FailureDisposition::Fatal { .. }
        ));
    }

    #[test]
    fn schema_rejection_retries_as_diagnostic() {
        let err = TransportError::new("HTTP Error (400)")
            .with_status(400)
            .with_reasons(vec![RejectionReason::new("additionalProperties")]);
        assert_eq!(classify_failure(&err), FailureDisposition::RetryAsDiagnostic);
    }

    #[test]
    fn credential_keyword_in_reasons_is_fatal_even_on_400() {
        let err = TransportError::new("HTTP Error (400)")
            .with_status(400)
            .with_reasons(vec![RejectionReason::new("isApiKeyValid")]);
        assert!(matches!(
            classify_failure(&err),
            FailureDisposition::Fatal { .. }
        ));
    }

    #[test]
    fn rate_limit_is_fatal_with_specific_hint() {
        let err = TransportError::new("HTTP Error (429)").with_status(429);
        match classify_failure(&err) {
            FailureDisposition::Fatal { hint } => assert!(hint.contains("too many requests")),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn other_4xx_is_fatal_with_config_hint() {
        let err = TransportError::new("HTTP Error (404)").with_status(404);
        match classify_failure(&err) {
            FailureDisposition::Fatal { hint } => assert!(hint.contains("`server` config")),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn server_errors_escalate() {
        let err = TransportError::new("HTTP Error (502)").with_status(502);
        assert_eq!(
            classify_failure(&err),
            FailureDisposition::EscalateToCrashReport
        );
    }

    #[test]
    fn unclassified_network_errors_escalate() {
        let err = TransportError::new("connection reset by peer")
            .with_code(TransportErrorCode::ConnectionReset);
        assert_eq!(
            classify_failure(&err),
            FailureDisposition::EscalateToCrashReport
        );
    }

    #[test]
    fn missing_status_and_code_escalates() {
        let err = TransportError::new("socket closed unexpectedly");
        assert_eq!(
            classify_failure(&err),
            FailureDisposition::EscalateToCrashReport
        );
    }
}
