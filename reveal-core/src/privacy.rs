//! PII scrubbing applied before anything leaves the page for `/decide`.
//!
//! Key-based redaction: a key that looks like it holds personal data has its
//! whole value replaced, whatever the value's shape. Free-text values are
//! only touched by [`redact_emails`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::signal::{Primitive, SignalExtra};

pub const REDACTED: &str = "[REDACTED]";

static PII_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(e[-_]?mail|phone|mobile|passw(or)?d|pwd|ssn|social[-_]?security|credit[-_]?card|card[-_]?number|cvv|secret|token|api[-_]?key|authorization|address|birth[-_]?date|dob)",
    )
    .expect("PII_KEY_RE regex should compile")
});

/// Plain and percent-encoded (`%40`) email addresses.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+(@|%40)[a-z0-9.\-]+\.[a-z]{2,}")
        .expect("EMAIL_RE regex should compile")
});

pub fn is_pii_key(key: &str) -> bool {
    PII_KEY_RE.is_match(key)
}

/// Recursively redact values stored under PII-looking keys.
pub fn scrub_pii(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let scrubbed = if is_pii_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        scrub_pii(v)
                    };
                    (k.clone(), scrubbed)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(scrub_pii).collect()),
        other => other.clone(),
    }
}

/// Flat-map form of [`scrub_pii`]; string values also lose embedded emails.
pub fn scrub_extra(extra: &SignalExtra) -> SignalExtra {
    extra
        .iter()
        .map(|(k, v)| {
            let scrubbed = if is_pii_key(k) {
                Primitive::Str(REDACTED.to_string())
            } else {
                match v {
                    Primitive::Str(s) => Primitive::Str(redact_emails(s)),
                    other => other.clone(),
                }
            };
            (k.clone(), scrubbed)
        })
        .collect()
}

pub fn redact_emails(text: &str) -> String {
    EMAIL_RE.replace_all(text, REDACTED).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pii_keys_case_insensitive() {
        let input = json!({
            "Email": "a@b.co",
            "userPhone": "555",
            "PASSWORD": "hunter2",
            "plan": "pro",
        });
        let out = scrub_pii(&input);
        assert_eq!(out["Email"], REDACTED);
        assert_eq!(out["userPhone"], REDACTED);
        assert_eq!(out["PASSWORD"], REDACTED);
        assert_eq!(out["plan"], "pro");
    }

    #[test]
    fn test_nesting_preserved() {
        let input = json!({
            "user": { "id": 7, "billing_address": { "line1": "x" } },
            "items": [ { "sku": "a", "api_key": "k" }, 3, "text" ],
        });
        let out = scrub_pii(&input);
        assert_eq!(out["user"]["id"], 7);
        assert_eq!(out["user"]["billing_address"], REDACTED);
        assert_eq!(out["items"][0]["sku"], "a");
        assert_eq!(out["items"][0]["api_key"], REDACTED);
        assert_eq!(out["items"][1], 3);
        assert_eq!(out["items"][2], "text");
    }

    #[test]
    fn test_non_pii_document_unchanged() {
        let input = json!({ "a": 1, "b": [true, null], "c": { "d": "e" } });
        assert_eq!(scrub_pii(&input), input);
    }

    #[test]
    fn test_redact_emails_in_urls() {
        assert_eq!(
            redact_emails("https://app.test/invite?to=jane.doe@example.com&x=1"),
            "https://app.test/invite?to=[REDACTED]&x=1"
        );
        assert_eq!(
            redact_emails("https://app.test/u/jane%40example.org/profile"),
            "https://app.test/u/[REDACTED]/profile"
        );
        assert_eq!(redact_emails("https://app.test/plain"), "https://app.test/plain");
    }

    #[test]
    fn test_scrub_extra() {
        let extra = crate::extra! {
            "context" => "contact to bob@corp.io",
            "user_email" => "bob@corp.io",
            "idleMs" => 5i64,
        };
        let out = scrub_extra(&extra);
        assert_eq!(out["context"], Primitive::from("contact to [REDACTED]"));
        assert_eq!(out["user_email"], Primitive::from(REDACTED));
        assert_eq!(out["idleMs"], Primitive::Int(5));
    }
}
