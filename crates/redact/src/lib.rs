//! # Warden Redact
//!
//! L1 utilities shared by the audit trail and offline engine: a SHA-256
//! hashing helper (used for both content-addressed image verification and
//! audit-log hash chaining) and a three-level PII redactor.
//!
//! Redaction never changes structure — only string leaves are rewritten —
//! so a redacted summary can still be diffed, logged, and re-serialized
//! the same shape as its input.

use std::sync::LazyLock;

use regex::Regex;

/// Computes the lowercase hex-encoded SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Redaction aggressiveness. Each level is a strict superset of the
/// patterns scrubbed by the level below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedactionLevel {
    /// No redaction — passthrough.
    None,
    /// Emails, SSNs, API keys, credit-card-like numbers.
    #[default]
    Partial,
    /// Everything in `Partial`, plus phone numbers, IPv4 addresses, and
    /// two-capitalized-word name patterns.
    Full,
}

struct Patterns {
    email: Regex,
    ssn: Regex,
    openai_key: Regex,
    github_key: Regex,
    generic_token: Regex,
    credit_card: Regex,
    phone: Regex,
    ipv4: Regex,
    name: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
    ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
    openai_key: Regex::new(r"\bsk-[A-Za-z0-9]{32,}\b").unwrap(),
    github_key: Regex::new(r"\bgh[pousr]_[A-Za-z0-9]{36}\b").unwrap(),
    generic_token: Regex::new(r"\b[A-Za-z0-9_-]{32,}\b").unwrap(),
    credit_card: Regex::new(r"\b\d{4}[- ]\d{4}[- ]\d{4}[- ]\d{4}\b").unwrap(),
    phone: Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap(),
    ipv4: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap(),
    name: Regex::new(r"\b[A-Z][a-z]+\s[A-Z][a-z]+\b").unwrap(),
});

/// Redacts PII out of a single string according to `level`.
#[must_use]
pub fn redact_string(input: &str, level: RedactionLevel) -> String {
    if level == RedactionLevel::None {
        return input.to_string();
    }

    let p = &*PATTERNS;
    let mut out = input.to_string();
    out = p.email.replace_all(&out, "[REDACTED_EMAIL]").into_owned();
    out = p.ssn.replace_all(&out, "[REDACTED_SSN]").into_owned();
    out = p
        .openai_key
        .replace_all(&out, "[REDACTED_API_KEY]")
        .into_owned();
    out = p
        .github_key
        .replace_all(&out, "[REDACTED_API_KEY]")
        .into_owned();
    out = p
        .generic_token
        .replace_all(&out, "[REDACTED_TOKEN]")
        .into_owned();
    out = p
        .credit_card
        .replace_all(&out, "[REDACTED_CARD]")
        .into_owned();

    if level == RedactionLevel::Full {
        out = p.phone.replace_all(&out, "[REDACTED_PHONE]").into_owned();
        out = p.ipv4.replace_all(&out, "[REDACTED_IP]").into_owned();
        out = p.name.replace_all(&out, "[REDACTED_NAME]").into_owned();
    }

    out
}

/// Recursively redacts every string leaf of a [`serde_json::Value`],
/// preserving object/array structure and leaving non-string leaves
/// (numbers, booleans, null) untouched.
#[must_use]
pub fn redact_value(value: &serde_json::Value, level: RedactionLevel) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(redact_string(s, level)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| redact_value(v, level)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, level)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_deterministic_and_matches_known_vector() {
        // SHA-256("") is a well-known constant.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_hex_differs_for_different_inputs() {
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }

    #[test]
    fn none_level_is_passthrough() {
        let input = "email: a@b.com ssn: 123-45-6789";
        assert_eq!(redact_string(input, RedactionLevel::None), input);
    }

    #[test]
    fn partial_redacts_email_and_ssn() {
        let out = redact_string("contact a@b.com, ssn 123-45-6789", RedactionLevel::Partial);
        assert!(out.contains("[REDACTED_EMAIL]"));
        assert!(out.contains("[REDACTED_SSN]"));
    }

    #[test]
    fn partial_redacts_openai_and_github_keys() {
        let openai_key = format!("sk-{}", "a".repeat(40));
        let github_key = format!("ghp_{}", "b".repeat(36));
        let out = redact_string(&format!("k1={openai_key} k2={github_key}"), RedactionLevel::Partial);
        assert!(!out.contains(&openai_key));
        assert!(!out.contains(&github_key));
    }

    #[test]
    fn partial_does_not_redact_phone_or_ip() {
        let out = redact_string("call 555-123-4567 from 192.168.1.1", RedactionLevel::Partial);
        assert!(out.contains("555-123-4567") || out.contains("192.168.1.1"));
    }

    #[test]
    fn full_redacts_phone_ip_and_names() {
        let out = redact_string(
            "John Smith called from 192.168.1.1 at 555-123-4567",
            RedactionLevel::Full,
        );
        assert!(out.contains("[REDACTED_NAME]"));
        assert!(out.contains("[REDACTED_IP]"));
        assert!(out.contains("[REDACTED_PHONE]"));
    }

    #[test]
    fn redact_value_preserves_structure_and_non_string_leaves() {
        let value = serde_json::json!({
            "email": "a@b.com",
            "count": 3,
            "active": true,
            "tags": ["a@b.com", "plain"],
        });
        let redacted = redact_value(&value, RedactionLevel::Partial);
        assert_eq!(redacted["count"], serde_json::json!(3));
        assert_eq!(redacted["active"], serde_json::json!(true));
        assert_eq!(redacted["email"], serde_json::json!("[REDACTED_EMAIL]"));
        assert_eq!(redacted["tags"][1], serde_json::json!("plain"));
    }
}
