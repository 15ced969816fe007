//! Submission payload assembly.
//!
//! A bug report is an immutable snapshot: the context's merged timeline,
//! dedup hash, truncated titles and attribution, wrapped in the agent
//! envelope the collector expects. Payloads are assembled once per
//! submission attempt from a context snapshot plus the incident summary of
//! the triggering event, and never mutated afterwards; filters operate on
//! their own copy.
//!
//! Assembly is pure: server identity (hostname, local address) is detected
//! once at `init` and passed in, never looked up at build time.

use secrecy::ExposeSecret;
use serde::Serialize;

use crate::config::AgentConfig;
use crate::context::{Context, TrackedUser};
use crate::timeline::TimelineItem;
use crate::{AGENT_ID, AGENT_VERSION, PLATFORM};

/// Maximum title length; longer titles are cut at a char boundary.
pub const TITLE_MAX_LEN: usize = 255;

/// Hash algorithm reported with every payload.
pub const HASH_TYPE: &str = "sha256";

/// Identity of the submitting bug: dedup hash plus display titles, derived
/// from the timeline item of the triggering event.
#[derive(Debug, Clone)]
pub struct IncidentSummary {
    /// Dedup fingerprint.
    pub hash: String,
    /// Short display title, at most [`TITLE_MAX_LEN`] chars.
    pub short_title: String,
    /// Long display title, at most [`TITLE_MAX_LEN`] chars.
    pub long_title: String,
}

impl IncidentSummary {
    /// Derives the summary from a tracked item carrying a fingerprint
    /// (an exception, or a console `error` call).
    #[must_use]
    pub fn from_item(item: &TimelineItem) -> Option<Self> {
        let hash = item.hash()?.to_owned();
        let title = match item {
            TimelineItem::Exception { msg, .. } => msg.clone(),
            TimelineItem::Console { console_params, .. } => {
                serde_json::to_string(console_params).unwrap_or_default()
            },
            _ => return None,
        };

        let short_title = truncate_title(&title);
        Some(Self {
            hash,
            long_title: short_title.clone(),
            short_title,
        })
    }

    /// Derives the summary for any item. Items without a fingerprint of
    /// their own (request markers, trimming markers) get one computed from
    /// their JSON form so the incident still groups deterministically.
    #[must_use]
    pub fn of(item: &TimelineItem) -> Self {
        if let Some(summary) = Self::from_item(item) {
            return summary;
        }

        let rendered = serde_json::to_string(item).unwrap_or_default();
        let hash =
            crate::fingerprint::console_fingerprint(&[serde_json::Value::String(rendered.clone())]);
        let short_title = truncate_title(&rendered);
        Self {
            hash,
            long_title: short_title.clone(),
            short_title,
        }
    }
}

/// One bug snapshot inside the agent envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBatchItem {
    /// Variant name of the last timeline item.
    pub bug_type: String,
    /// Global plus context custom data, global first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_data: Vec<serde_json::Value>,
    /// Frontend-linking request id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Dedup fingerprint.
    pub hash: String,
    /// True when auto-submission is off and the bug only links a frontend
    /// session.
    pub is_temp: bool,
    /// Long display title.
    pub long_title: String,
    /// Short display title.
    pub short_title: String,
    /// Merged timeline: trimmed prefix followed by live items.
    pub timeline: Vec<TimelineItem>,
    /// User attribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<TrackedUser>,
}

/// The full submission envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentData {
    /// The bug snapshots (currently always exactly one).
    pub agent_data_patch: Vec<AgentBatchItem>,
    /// Agent identity.
    pub agent_id: String,
    /// Agent version.
    pub agent_version: String,
    /// Project key; absent on anonymous crash reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Project secret; absent on anonymous crash reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    /// Hash algorithm used for fingerprints.
    pub hash_type: String,
    /// Platform identity.
    pub platform: String,
    /// Platform toolchain version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    /// Release identifier, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Local address of the reporting server.
    pub server_local_ip: String,
    /// Hostname of the reporting server.
    pub server_name: String,
    /// Deployment stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Project tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Where the agent is running, detected once at `init`.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    /// Machine hostname.
    pub name: String,
    /// Local interface address.
    pub local_ip: String,
}

impl ServerIdentity {
    /// Detects hostname and local address. Failures degrade to loopback
    /// placeholders rather than failing `init`.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            name: std::env::var("HOSTNAME")
                .ok()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "unknown-host".to_owned()),
            local_ip: detect_local_ip().unwrap_or_else(|| "127.0.0.1".to_owned()),
        }
    }

    /// The identity reported on anonymous crash reports.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            name: "Anonymous".to_owned(),
            local_ip: "Anonymous".to_owned(),
        }
    }
}

/// Assembles the submission envelope for one incident.
///
/// `scope` is the resolved context of the incident; `global` supplies
/// fallbacks (request id, tags, stage) and the process-wide custom data.
#[must_use]
pub fn build_payload(
    config: &AgentConfig,
    identity: &ServerIdentity,
    global: &Context,
    scope: &Context,
    global_custom_data: &[serde_json::Value],
    summary: &IncidentSummary,
) -> AgentData {
    let timeline = scope.with_state(|state| state.timeline.snapshot());

    let request_id = scope
        .request_id()
        .or_else(|| global.request_id());

    let mut custom_data = global_custom_data.to_vec();
    scope.with_state(|state| custom_data.extend(state.custom_data.iter().cloned()));

    let user = scope.with_state(|state| state.user.clone()).filter(|user| !user.is_empty());

    let (tags, stage) = global.with_state(|state| (state.tags.clone(), state.stage));

    let bug_type = timeline
        .last()
        .map_or_else(|| "console".to_owned(), |item| item.item_type().to_owned());

    let batch_item = AgentBatchItem {
        bug_type,
        custom_data,
        is_temp: !config.allow_auto_submission && request_id.is_some(),
        request_id,
        hash: summary.hash.clone(),
        long_title: summary.long_title.clone(),
        short_title: summary.short_title.clone(),
        timeline,
        user,
    };

    AgentData {
        agent_data_patch: vec![batch_item],
        agent_id: AGENT_ID.to_owned(),
        agent_version: AGENT_VERSION.to_owned(),
        api_key: Some(config.api_key.clone()),
        api_secret: Some(config.api_secret.expose_secret().clone()),
        hash_type: HASH_TYPE.to_owned(),
        platform: PLATFORM.to_owned(),
        platform_version: Some(env!("CARGO_PKG_RUST_VERSION").to_owned()),
        release: config.release.clone(),
        server_local_ip: identity.local_ip.clone(),
        server_name: identity.name.clone(),
        stage: stage.map(|stage| stage.as_str().to_owned()),
        tags,
    }
}

/// Assembles the anonymous crash-report envelope describing a failure of
/// the agent itself. Credentials and release stay off the wire; the
/// project key rides inside custom data for collector-side correlation.
#[must_use]
pub fn build_crash_payload(
    api_key: &str,
    exception: TimelineItem,
    summary: &IncidentSummary,
) -> AgentData {
    let identity = ServerIdentity::anonymous();

    let batch_item = AgentBatchItem {
        bug_type: exception.item_type().to_owned(),
        custom_data: vec![serde_json::json!({ "apiKey": api_key })],
        request_id: None,
        hash: summary.hash.clone(),
        is_temp: false,
        long_title: summary.long_title.clone(),
        short_title: summary.short_title.clone(),
        timeline: vec![exception],
        user: None,
    };

    AgentData {
        agent_data_patch: vec![batch_item],
        agent_id: AGENT_ID.to_owned(),
        agent_version: AGENT_VERSION.to_owned(),
        api_key: None,
        api_secret: None,
        hash_type: HASH_TYPE.to_owned(),
        platform: PLATFORM.to_owned(),
        platform_version: Some(env!("CARGO_PKG_RUST_VERSION").to_owned()),
        release: None,
        server_local_ip: identity.local_ip,
        server_name: identity.name,
        stage: None,
        tags: Vec::new(),
    }
}

fn truncate_title(title: &str) -> String {
    if title.len() <= TITLE_MAX_LEN {
        return title.to_owned();
    }

    let mut cut = TITLE_MAX_LEN;
    while !title.is_char_boundary(cut) {
        cut -= 1;
    }
    title[..cut].to_owned()
}

fn detect_local_ip() -> Option<String> {
    // Connecting a UDP socket sends no packets; it only asks the OS which
    // interface would route there.
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("203.0.113.1:53").ok()?;
    let ip = socket.local_addr().ok()?.ip().to_string();
    (ip != "0.0.0.0").then_some(ip)
}

#[cfg(test)]
impl AgentData {
    /// Minimal payload for executor tests.
    pub(crate) fn anonymous_stub() -> Self {
        Self {
            agent_data_patch: Vec::new(),
            agent_id: AGENT_ID.to_owned(),
            agent_version: AGENT_VERSION.to_owned(),
            api_key: None,
            api_secret: None,
            hash_type: HASH_TYPE.to_owned(),
            platform: PLATFORM.to_owned(),
            platform_version: None,
            release: None,
            server_local_ip: "127.0.0.1".to_owned(),
            server_name: "test".to_owned(),
            stage: None,
            tags: Vec::new(),
        }
    }
}
