//! Submission outcome codes.

use std::fmt;

/// How a submission was resolved. Returned to callers so they can branch
/// without exception handling; the set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionAcknowledge {
    /// The bug was delivered normally.
    BugReported,

    /// A user filter failed; the diagnostic report was delivered in place
    /// of the original payload.
    UserFilterErrorReported,

    /// Auto-submission is off; the bug was delivered as a temporary,
    /// frontend-linked report.
    TempBugReported,

    /// The delivery failed and an anonymized crash report about the
    /// failure was delivered instead.
    CrashReportSent,

    /// The delivery failed and crash reporting is disabled (or already in
    /// flight), so nothing was sent.
    CrashReportDisabled,

    /// Tracking is disabled; nothing was recorded or sent.
    SkippedTrackingDisabled,

    /// The call arrived inside a context this engine does not own;
    /// tracking was skipped to avoid leaking foreign state.
    SkippedNestedContext,

    /// Auto-submission is off and no linking request id was present, so
    /// there is nothing to attach a temporary bug to.
    SkippedNoRequestId,
}

impl SubmissionAcknowledge {
    /// Stable string form, for logs and embedders.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BugReported => "bug-reported",
            Self::UserFilterErrorReported => "user-filter-error-reported",
            Self::TempBugReported => "temp-bug-reported",
            Self::CrashReportSent => "crash-report-sent",
            Self::CrashReportDisabled => "crash-report-disabled",
            Self::SkippedTrackingDisabled => "skipped-tracking-disabled",
            Self::SkippedNestedContext => "skipped-nested-context",
            Self::SkippedNoRequestId => "skipped-no-request-id",
        }
    }
}

impl fmt::Display for SubmissionAcknowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
