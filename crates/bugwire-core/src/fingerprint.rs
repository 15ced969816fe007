//! Stable dedup identities for tracked events.
//!
//! The collector groups repeated occurrences of "the same" bug by a
//! client-computed fingerprint. Fingerprints are pure SHA-256 digests over
//! the agent identity, the tracker that observed the event and the parts of
//! the event that identify it (message and first stack frame for
//! exceptions, the stringified arguments for console errors). No time
//! component is mixed in: identical inputs always produce identical
//! fingerprints.

use sha2::{Digest, Sha256};

use crate::AGENT_ID;

/// Tracker name mixed into exception fingerprints.
pub const EXCEPTION_TRACKER: &str = "exceptionTracker";

/// Tracker name mixed into console fingerprints.
pub const CONSOLE_TRACKER: &str = "consoleTracker";

/// Fingerprint for an exception event.
///
/// `rendered_msg` is the `"{type}: {message}"` form stored on the timeline
/// item; `first_frame` is the topmost stack frame (empty when no stack was
/// available). Distinct messages or top frames produce distinct hashes
/// except by hash-space coincidence.
#[must_use]
pub fn exception_fingerprint(rendered_msg: &str, first_frame: &str) -> String {
    digest_parts(&[AGENT_ID, EXCEPTION_TRACKER, rendered_msg, first_frame])
}

/// Fingerprint for a console-error event.
///
/// The arguments are identified by their JSON rendering, so two calls with
/// structurally equal arguments collapse into one bug.
#[must_use]
pub fn console_fingerprint(params: &[serde_json::Value]) -> String {
    let rendered = serde_json::to_string(params).unwrap_or_default();
    digest_parts(&[AGENT_ID, CONSOLE_TRACKER, &rendered])
}

/// Key for alert-once deduplication of operator warnings.
#[must_use]
pub fn alert_key(message: &str) -> String {
    digest_parts(&[message])
}

fn digest_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_fingerprint_is_deterministic() {
        let a = exception_fingerprint("TypeError: x is not a function", "at handler (app.rs:10)");
        let b = exception_fingerprint("TypeError: x is not a function", "at handler (app.rs:10)");
        assert_eq!(a, b);
    }

    #[test]
    fn exception_fingerprint_differs_on_message() {
        let a = exception_fingerprint("TypeError: x is not a function", "at handler (app.rs:10)");
        let b = exception_fingerprint("TypeError: y is not a function", "at handler (app.rs:10)");
        assert_ne!(a, b);
    }

    #[test]
    fn exception_fingerprint_differs_on_frame() {
        let a = exception_fingerprint("TypeError: x is not a function", "at handler (app.rs:10)");
        let b = exception_fingerprint("TypeError: x is not a function", "at worker (job.rs:44)");
        assert_ne!(a, b);
    }

    #[test]
    fn console_fingerprint_is_deterministic() {
        let params = vec![serde_json::json!("boom"), serde_json::json!({"a": 1})];
        assert_eq!(console_fingerprint(&params), console_fingerprint(&params));
    }

    #[test]
    fn fingerprints_are_hex_sha256() {
        let hash = exception_fingerprint("Error: x", "");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
