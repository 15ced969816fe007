//! Timeline items and the bounded per-context event log.
//!
//! Every context accumulates an ordered log of observed events: console
//! calls, outbound/inbound HTTP activity, exceptions and synthetic trimming
//! markers. The log is bounded; once it overflows, the buffer switches to
//! ring behavior and a trimmed prefix preserves the request-identifying
//! first event plus a visible marker, so truncation never hides that
//! history was lost.
//!
//! Ordering is insertion order. Timestamps are stamped at append time and
//! are informational only; they are never used to reorder.

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fingerprint;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One name/value pair of a captured query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    /// Parameter name.
    pub name: String,
    /// Parameter value as it appeared on the URL.
    pub value: String,
}

/// A single observed event, tagged for the collector's wire schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "itemType")]
pub enum TimelineItem {
    /// A captured console/logger call.
    #[serde(rename = "console", rename_all = "camelCase")]
    Console {
        /// Millisecond epoch stamp, set at append time.
        timestamp: i64,
        /// The console method name (`log`, `warn`, `error`, ...).
        method: String,
        /// The call arguments, JSON-rendered.
        console_params: Vec<serde_json::Value>,
        /// Dedup fingerprint, present only for `error` calls.
        #[serde(skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },

    /// An inbound or outbound HTTP request.
    #[serde(rename = "httpReq", rename_all = "camelCase")]
    HttpRequest {
        /// Millisecond epoch stamp, set at append time.
        timestamp: i64,
        /// HTTP method.
        method: String,
        /// Absolute URL with the linking parameter stripped.
        url: String,
        /// Response status, when the exchange completed.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        /// Response status text, when the exchange completed.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_text: Option<String>,
        /// Request duration in milliseconds.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_time: Option<u64>,
        /// Frontend-linking request id extracted from the query string.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Peer address.
        #[serde(skip_serializing_if = "Option::is_none")]
        remote_addr: Option<String>,
        /// Captured query parameters.
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        query_params: Vec<QueryParam>,
    },

    /// A captured exception.
    #[serde(rename = "exception", rename_all = "camelCase")]
    Exception {
        /// Millisecond epoch stamp, set at append time.
        timestamp: i64,
        /// The error type name.
        #[serde(rename = "type")]
        type_name: String,
        /// Rendered `"{type}: {message}"` line.
        msg: String,
        /// Frame-limited stack rendering, agent-internal frames removed.
        stringified_stack: String,
        /// Dedup fingerprint.
        hash: String,
    },

    /// Synthetic marker inserted where older events were evicted.
    #[serde(rename = "trimming")]
    Trimming {
        /// Millisecond epoch stamp, set at insertion time.
        timestamp: i64,
    },
}

impl TimelineItem {
    /// Builds a console item. `error` calls get a dedup fingerprint so they
    /// can be promoted to bugs.
    #[must_use]
    pub fn console(method: &str, params: Vec<serde_json::Value>) -> Self {
        let hash = (method == "error").then(|| fingerprint::console_fingerprint(&params));
        Self::Console {
            timestamp: now_millis(),
            method: method.to_owned(),
            console_params: params,
            hash,
        }
    }

    /// Builds an inbound-request marker carrying the linking request id.
    #[must_use]
    pub fn request_marker(method: &str, url: &str, request_id: Option<String>) -> Self {
        Self::HttpRequest {
            timestamp: now_millis(),
            method: method.to_owned(),
            url: url.to_owned(),
            status: None,
            status_text: None,
            request_time: None,
            request_id,
            remote_addr: None,
            query_params: Vec::new(),
        }
    }

    /// Builds a fresh trimming marker.
    #[must_use]
    pub fn trimming() -> Self {
        Self::Trimming {
            timestamp: now_millis(),
        }
    }

    /// The wire name of this item's variant, reported as the bug type of a
    /// submission whose last event it is.
    #[must_use]
    pub const fn item_type(&self) -> &'static str {
        match self {
            Self::Console { .. } => "console",
            Self::HttpRequest { .. } => "httpReq",
            Self::Exception { .. } => "exception",
            Self::Trimming { .. } => "trimming",
        }
    }

    /// The dedup fingerprint carried by this item, if any.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Console { hash, .. } => hash.as_deref(),
            Self::Exception { hash, .. } => Some(hash),
            _ => None,
        }
    }

    /// The linking request id, for request markers.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::HttpRequest { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Whether this item identifies the inbound request of its context: an
    /// HTTP item carrying a linking request id.
    #[must_use]
    pub fn is_request_marker(&self) -> bool {
        self.request_id().is_some()
    }

    pub(crate) fn stamp(&mut self, ts: i64) {
        match self {
            Self::Console { timestamp, .. }
            | Self::HttpRequest { timestamp, .. }
            | Self::Exception { timestamp, .. }
            | Self::Trimming { timestamp } => *timestamp = ts,
        }
    }

    /// The timestamp stamped on this item.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::Console { timestamp, .. }
            | Self::HttpRequest { timestamp, .. }
            | Self::Exception { timestamp, .. }
            | Self::Trimming { timestamp } => *timestamp,
        }
    }
}

/// A captured exception, before frame limiting and fingerprinting.
///
/// Instrumentation adapters build one of these from whatever error value
/// they intercepted; the engine renders it into an [`TimelineItem::Exception`]
/// with a stable hash.
#[derive(Debug, Clone)]
pub struct ExceptionInfo {
    /// Error type name (`"Error"` when unknown).
    pub type_name: String,
    /// Error message (may be empty).
    pub message: String,
    /// Stack frames, topmost first (may be empty).
    pub frames: Vec<String>,
}

impl<E: std::error::Error> From<E> for ExceptionInfo {
    fn from(err: E) -> Self {
        Self::from_error(&err)
    }
}

impl ExceptionInfo {
    /// Captures type name and message from any error value.
    #[must_use]
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self {
            type_name: "Error".to_owned(),
            message: err.to_string(),
            frames: Vec::new(),
        }
    }

    /// Builds from explicit parts.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Attaches stack frames, topmost first.
    #[must_use]
    pub fn with_frames(mut self, frames: Vec<String>) -> Self {
        self.frames = frames;
        self
    }

    /// Attaches frames split out of a rendered backtrace.
    #[must_use]
    pub fn with_backtrace(self, backtrace: &str) -> Self {
        self.with_frames(backtrace.lines().map(str::to_owned).collect())
    }

    /// Renders into an exception timeline item.
    ///
    /// The stack is cut at `max_frames` and frames originating inside the
    /// agent itself are removed so user bugs never fingerprint against
    /// agent internals. The dedup hash covers the rendered message and the
    /// topmost original frame.
    #[must_use]
    pub fn into_item(self, max_frames: usize) -> TimelineItem {
        let msg = if self.message.is_empty() {
            format!("{}: [no message]", self.type_name)
        } else {
            format!("{}: {}", self.type_name, self.message)
        };

        let first_frame = self.frames.first().cloned().unwrap_or_default();
        let stack = self
            .frames
            .iter()
            .take(max_frames)
            .filter(|frame| !frame.contains("bugwire"))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");

        let hash = fingerprint::exception_fingerprint(&msg, &first_frame);

        TimelineItem::Exception {
            timestamp: now_millis(),
            type_name: self.type_name,
            msg,
            stringified_stack: stack,
            hash,
        }
    }
}

/// The bounded, ordered event log of one context.
///
/// In steady state the live portion holds at most `limit - 1` items, the
/// reserved slot accounting for the trimming marker merged in at
/// submission time. Once trimmed, the buffer behaves as a ring: every
/// append evicts the oldest live item.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    items: VecDeque<TimelineItem>,
    trimmed_prefix: Vec<TimelineItem>,
    is_trimmed: bool,
}

impl Timeline {
    /// Appends an item, stamping it with the current time.
    ///
    /// `limit` is the configured maximum item count; `request_bound`
    /// controls whether the first item is treated as a preservable inbound
    /// request marker when trimming starts.
    pub fn append(&mut self, mut item: TimelineItem, limit: usize, request_bound: bool) {
        item.stamp(now_millis());
        self.items.push_back(item);

        if self.is_trimmed {
            self.items.pop_front();
            return;
        }

        // Leave one slot for the trimming marker merged in on submission.
        if self.items.len() > limit.saturating_sub(1) {
            let preserved = if request_bound {
                self.items.pop_front()
            } else {
                None
            };

            let mut prefix = Vec::with_capacity(2);
            prefix.extend(preserved);
            prefix.push(TimelineItem::trimming());

            self.trimmed_prefix = prefix;
            self.is_trimmed = true;

            self.items.pop_front();
        }
    }

    /// Replaces the timeline with a minimal scrubbed form.
    ///
    /// Used when a payload failed validation downstream and must be purged
    /// of potentially sensitive data: the request-identifying first event
    /// (when present and request-bound) and a fresh trimming marker
    /// survive, nothing else. Calling twice is the same as calling once.
    pub fn reset(&mut self, request_bound: bool) {
        self.is_trimmed = false;
        self.trimmed_prefix.clear();

        let first = self.items.front().cloned();
        let marker = TimelineItem::trimming();

        self.items.clear();
        if let Some(first) = first {
            if request_bound && first.is_request_marker() {
                self.items.push_back(first);
            }
        }
        self.items.push_back(marker);
    }

    /// The items to submit: trimmed prefix (when trimming happened)
    /// followed by the live items.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TimelineItem> {
        if self.is_trimmed {
            self.trimmed_prefix
                .iter()
                .chain(self.items.iter())
                .cloned()
                .collect()
        } else {
            self.items.iter().cloned().collect()
        }
    }

    /// Number of live items (excludes the trimmed prefix).
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no live items have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether trimming has occurred since the last reset.
    #[must_use]
    pub const fn is_trimmed(&self) -> bool {
        self.is_trimmed
    }

    /// The preserved prefix, empty until trimming occurs.
    #[must_use]
    pub fn trimmed_prefix(&self) -> &[TimelineItem] {
        &self.trimmed_prefix
    }

    /// The last live item, if any.
    #[must_use]
    pub fn last(&self) -> Option<&TimelineItem> {
        self.items.back()
    }

    /// The first live item, if any.
    #[must_use]
    pub fn first(&self) -> Option<&TimelineItem> {
        self.items.front()
    }
}
