//! Agent configuration: strict option schema, defaults and clamping.
//!
//! Options arrive either as a literal [`AgentOptions`] value or as JSON via
//! [`AgentOptions::from_json`]. The schema is strict: unknown keys are
//! rejected at parse time rather than silently ignored, because a typoed
//! option name in a bug tracker config tends to surface months later as a
//! missing report. Validation happens once, inside `init`; every
//! [`ConfigError`] is fatal to the `init` call and never retried.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

/// Default collector hostname.
pub const DEFAULT_HOSTNAME: &str = "bugs.example-collector.io";

/// Default collector API path prefix.
pub const DEFAULT_API_PATH: &str = "/api";

/// Timeline item count used when the user does not configure one.
pub const TIMELINE_DEFAULT_LIMIT: usize = 30;

/// Hard upper bound for the timeline item count.
pub const TIMELINE_MAX_LIMIT: usize = 100;

/// Hard lower bound for the timeline item count: one live event plus the
/// reserved trimming-marker slot.
pub const TIMELINE_MIN_LIMIT: usize = 2;

/// Stack frame count used when the user does not configure one.
pub const STACKTRACE_DEFAULT_LIMIT: usize = 40;

/// Hard upper bound for the stack frame count.
pub const STACKTRACE_MAX_LIMIT: usize = 100;

/// Default submission timeout.
///
/// Deliberately small: after an uncaught exception the process is in a
/// known-bad state and must not stay alive waiting on the collector.
pub const SUBMISSION_TIMEOUT_DEFAULT_MS: u64 = 1_000;

/// Maximum number of tags.
pub const TAGS_LIMIT: usize = 10;

const TAG_MAX_LEN: usize = 45;
const RELEASE_MAX_LEN: usize = 100;

/// Deployment stage reported with every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Stage {
    /// Production.
    Prod,
    /// Staging.
    Stag,
    /// Development.
    Dev,
    /// Test.
    Test,
}

impl Stage {
    /// The wire name of this stage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prod => "Prod",
            Self::Stag => "Stag",
            Self::Dev => "Dev",
            Self::Test => "Test",
        }
    }
}

/// Collector endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Collector hostname.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Collector port; transport defaults it from `secure` when absent.
    #[serde(default)]
    pub port: Option<u16>,

    /// API path prefix.
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Whether to use TLS.
    #[serde(default = "default_true")]
    pub secure: bool,

    /// PEM bundle for a self-signed collector certificate.
    #[serde(default)]
    pub ca: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: None,
            api_path: default_api_path(),
            secure: true,
            ca: None,
        }
    }
}

/// Forward proxy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProxyOptions {
    /// Proxy hostname.
    pub hostname: String,

    /// Proxy port; defaulted from `secure` when absent.
    #[serde(default)]
    pub port: Option<u16>,

    /// Whether the proxy connection uses TLS.
    #[serde(default = "default_true")]
    pub secure: bool,

    /// PEM bundle for a self-signed proxy certificate.
    #[serde(default)]
    pub ca: Option<String>,
}

impl ProxyOptions {
    /// The effective proxy port: configured, or the scheme default.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 443 } else { 80 })
    }
}

/// User-supplied agent options.
///
/// Every field is optional; [`AgentOptions::validate`] merges in defaults
/// and enforces limits. Unknown keys fail deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AgentOptions {
    /// Project API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Project API secret.
    #[serde(default)]
    pub api_secret: Option<SecretString>,

    /// Kill switch for all tracking. Defaults to enabled.
    #[serde(default)]
    pub tracking_enabled: Option<bool>,

    /// Whether bugs submit automatically, or only link against a frontend
    /// session via a request id.
    #[serde(default)]
    pub allow_auto_submission: Option<bool>,

    /// Whether the process exits after an uncaught exception is handled.
    #[serde(default)]
    pub exit_on_uncaught_exceptions: Option<bool>,

    /// Whether failures of the agent itself are reported anonymously.
    #[serde(default)]
    pub report_agent_crashes: Option<bool>,

    /// Upper bound on a single submission attempt, in milliseconds.
    #[serde(default)]
    pub submission_timeout_ms: Option<u64>,

    /// Timeline item budget per context.
    #[serde(default)]
    pub timeline_limit: Option<usize>,

    /// Stack frame budget per exception.
    #[serde(default)]
    pub stacktrace_limit: Option<usize>,

    /// Project tags, at most [`TAGS_LIMIT`] unique entries of 1-45 chars.
    #[serde(default)]
    pub tags: Option<Vec<String>>,

    /// Deployment stage.
    #[serde(default)]
    pub stage: Option<Stage>,

    /// Release identifier, 1-100 chars.
    #[serde(default)]
    pub release: Option<String>,

    /// Collector endpoint override.
    #[serde(default)]
    pub server: Option<ServerOptions>,

    /// Forward proxy.
    #[serde(default)]
    pub proxy: Option<ProxyOptions>,
}

impl AgentOptions {
    /// Parses options from JSON, rejecting unknown keys.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Schema(err.to_string()))
    }

    /// Merges defaults and enforces limits, producing the runtime config.
    pub fn validate(self) -> Result<AgentConfig, ConfigError> {
        let tracking_enabled = self.tracking_enabled.unwrap_or(true);

        let (api_key, api_secret) = match (self.api_key, self.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() => (key, secret),
            _ if !tracking_enabled => (String::new(), SecretString::new(String::new())),
            _ => return Err(ConfigError::MissingCredentials),
        };

        let tags = self.tags.unwrap_or_default();
        validate_tags(&tags)?;

        if let Some(release) = &self.release {
            if release.is_empty() || release.len() > RELEASE_MAX_LEN {
                return Err(ConfigError::InvalidRelease);
            }
        }

        Ok(AgentConfig {
            api_key,
            api_secret,
            tracking_enabled,
            allow_auto_submission: self.allow_auto_submission.unwrap_or(true),
            exit_on_uncaught_exceptions: self.exit_on_uncaught_exceptions.unwrap_or(true),
            report_agent_crashes: self.report_agent_crashes.unwrap_or(true),
            submission_timeout: Duration::from_millis(
                self.submission_timeout_ms
                    .unwrap_or(SUBMISSION_TIMEOUT_DEFAULT_MS),
            ),
            timeline_limit: self
                .timeline_limit
                .unwrap_or(TIMELINE_DEFAULT_LIMIT)
                .clamp(TIMELINE_MIN_LIMIT, TIMELINE_MAX_LIMIT),
            stacktrace_limit: self
                .stacktrace_limit
                .unwrap_or(STACKTRACE_DEFAULT_LIMIT)
                .min(STACKTRACE_MAX_LIMIT),
            tags,
            stage: self.stage,
            release: self.release,
            server: self.server.unwrap_or_default(),
            proxy: self.proxy,
        })
    }
}

/// Validated, merged runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Project API key.
    pub api_key: String,
    /// Project API secret, only revealed at payload serialization.
    pub api_secret: SecretString,
    /// Kill switch for all tracking.
    pub tracking_enabled: bool,
    /// Whether bugs submit automatically.
    pub allow_auto_submission: bool,
    /// Whether the process exits after an uncaught exception is handled.
    pub exit_on_uncaught_exceptions: bool,
    /// Whether agent crashes are reported anonymously.
    pub report_agent_crashes: bool,
    /// Upper bound on a single submission attempt.
    pub submission_timeout: Duration,
    /// Timeline item budget per context.
    pub timeline_limit: usize,
    /// Stack frame budget per exception.
    pub stacktrace_limit: usize,
    /// Project tags.
    pub tags: Vec<String>,
    /// Deployment stage.
    pub stage: Option<Stage>,
    /// Release identifier.
    pub release: Option<String>,
    /// Collector endpoint.
    pub server: ServerOptions,
    /// Forward proxy.
    pub proxy: Option<ProxyOptions>,
}

/// Errors raised while validating agent options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Options failed schema validation (unknown key, wrong type, bad
    /// enum value). Carries the deserializer's description.
    #[error("options are not valid, bug tracking disabled: {0}")]
    Schema(String),

    /// `api_key`/`api_secret` missing while tracking is enabled.
    #[error("project keys are missing, bug tracking disabled")]
    MissingCredentials,

    /// A tag violated the length/count/uniqueness limits.
    #[error("invalid tag {tag:?}: {reason}")]
    InvalidTag {
        /// The offending tag (or a count description).
        tag: String,
        /// Which limit was violated.
        reason: &'static str,
    },

    /// `release` is empty or longer than 100 characters.
    #[error("`release` must be 1-100 characters")]
    InvalidRelease,
}

fn validate_tags(tags: &[String]) -> Result<(), ConfigError> {
    if tags.len() > TAGS_LIMIT {
        return Err(ConfigError::InvalidTag {
            tag: format!("{} tags", tags.len()),
            reason: "at most 10 tags are allowed",
        });
    }

    for (idx, tag) in tags.iter().enumerate() {
        if tag.is_empty() || tag.len() > TAG_MAX_LEN {
            return Err(ConfigError::InvalidTag {
                tag: tag.clone(),
                reason: "tags must be 1-45 characters",
            });
        }

        if tags[..idx].contains(tag) {
            return Err(ConfigError::InvalidTag {
                tag: tag.clone(),
                reason: "tags must be unique",
            });
        }
    }

    Ok(())
}

fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_owned()
}

fn default_api_path() -> String {
    DEFAULT_API_PATH.to_owned()
}

const fn default_true() -> bool {
    true
}
