//! Secret leak guard and field masking.
//!
//! Every payload passes through [`SecretGuard`] before it is handed to the
//! emitter. The guard replaces:
//! - values stored under credential-bearing keys (`hash`, `password`, ...)
//! - strings that look like credentials: serialized base64 blobs, bcrypt
//!   hashes, JWTs and PEM private keys
//!
//! Each replacement increments a trip counter. A trip is never an error
//! for the audited request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use regex::Regex;
use serde_json::Value;

use crate::pattern::Matcher;

/// Marker written in place of any withheld value.
pub const REDACTED: &str = "[REDACTED]";

static SENSITIVE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:hash|password|passwd|pwd|secret|salt|credentials?|private_?key|api_?key|token|[a-z0-9_]*_(?:password|secret|token|key))$",
    )
    .expect("static pattern")
});

static BCRYPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$2[abxy]?\$\d{2}\$[./A-Za-z0-9]{53}").expect("static pattern")
});

static JWT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}")
        .expect("static pattern")
});

static PEM_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)-----BEGIN (?:[A-Z]+ )?PRIVATE KEY-----.*?(?:-----END (?:[A-Z]+ )?PRIVATE KEY-----|$)")
        .expect("static pattern")
});

static BASE64_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/]{16,}={0,2}").expect("static pattern"));

/// Returns `true` if a key name conventionally holds credential material.
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY.is_match(key)
}

/// Returns `true` if a base64-alphabet run looks like an encoded blob
/// rather than a word or a path.
fn is_encoded_blob(run: &str) -> bool {
    let trimmed = run.trim_end_matches('=');
    if trimmed.starts_with("eyJ") {
        return STANDARD_NO_PAD.decode(trimmed).is_ok();
    }
    let has_upper = trimmed.bytes().any(|b| b.is_ascii_uppercase());
    let has_lower = trimmed.bytes().any(|b| b.is_ascii_lowercase());
    let has_digit = trimmed.bytes().any(|b| b.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        return false;
    }
    STANDARD_NO_PAD.decode(trimmed).is_ok()
}

/// Returns `true` if the whole string looks like a credential.
pub fn looks_like_credential(value: &str) -> bool {
    let value = value.trim();
    if BCRYPT.is_match(value) || JWT.is_match(value) || PEM_KEY.is_match(value) {
        return true;
    }
    BASE64_RUN
        .find(value)
        .is_some_and(|m| m.as_str().len() == value.len() && is_encoded_blob(value))
}

/// Scrubs credential material from audit payloads and counts trips.
#[derive(Debug, Default)]
pub struct SecretGuard {
    trips: AtomicU64,
}

impl SecretGuard {
    /// Creates a guard with a zero trip count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values replaced since creation.
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }

    fn trip(&self) {
        self.trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Scrubs a JSON value in place.
    pub fn scrub_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if is_sensitive_key(key) && !child.is_null() {
                        *child = Value::String(REDACTED.to_string());
                        self.trip();
                    } else {
                        self.scrub_value(child);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|v| self.scrub_value(v)),
            Value::String(s) => {
                if let Some(clean) = self.scrub_str(s) {
                    *s = clean;
                }
            }
            _ => {}
        }
    }

    /// Scrubs a value that will be logged under `key`.
    pub fn scrub_keyed(&self, key: &str, value: &mut Value) {
        if is_sensitive_key(key) && !value.is_null() {
            *value = Value::String(REDACTED.to_string());
            self.trip();
        } else {
            self.scrub_value(value);
        }
    }

    /// Scrubs free text, replacing each credential-looking substring.
    pub fn scrub_text(&self, text: &str) -> String {
        self.scrub_str(text).unwrap_or_else(|| text.to_string())
    }

    /// Returns the scrubbed string, or `None` if nothing had to change.
    fn scrub_str(&self, text: &str) -> Option<String> {
        if looks_like_credential(text) {
            self.trip();
            return Some(REDACTED.to_string());
        }

        let mut out: Option<String> = None;
        for re in [&*PEM_KEY, &*BCRYPT, &*JWT] {
            let current = out.as_deref().unwrap_or(text);
            if re.is_match(current) {
                let hits = re.find_iter(current).count() as u64;
                self.trips.fetch_add(hits, Ordering::Relaxed);
                out = Some(re.replace_all(current, REDACTED).into_owned());
            }
        }

        let current = out.as_deref().unwrap_or(text);
        let mut hits = 0u64;
        let replaced = BASE64_RUN.replace_all(current, |caps: &regex::Captures<'_>| {
            let run = &caps[0];
            if is_encoded_blob(run) {
                hits += 1;
                REDACTED.to_string()
            } else {
                run.to_string()
            }
        });
        if hits > 0 {
            self.trips.fetch_add(hits, Ordering::Relaxed);
            out = Some(replaced.into_owned());
        }

        out
    }
}

/// Replaces the values of masked fields in a document, in place.
///
/// Paths are dotted (`customer.ssn`); a masked object is replaced as a
/// whole. Returns the number of fields masked.
pub fn mask_fields(document: &mut Value, masked: &Matcher) -> usize {
    mask_below(document, "", masked)
}

/// Masks the descendants of a value that sits at dotted path `prefix`.
///
/// Array elements share their array's path.
pub(crate) fn mask_below(value: &mut Value, prefix: &str, masked: &Matcher) -> usize {
    if masked.is_empty() {
        return 0;
    }
    let mut count = 0;
    mask_walk(value, prefix, masked, &mut count);
    count
}

fn mask_walk(value: &mut Value, prefix: &str, masked: &Matcher, count: &mut usize) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                if masked.matches(&path) {
                    *child = Value::String(REDACTED.to_string());
                    *count += 1;
                } else {
                    mask_walk(child, &path, masked, count);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mask_walk(item, prefix, masked, count);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;

    fn encoded(value: &Value) -> String {
        STANDARD.encode(value.to_string())
    }

    #[test]
    fn sensitive_keys() {
        assert!(is_sensitive_key("hash"));
        assert!(is_sensitive_key("Password"));
        assert!(is_sensitive_key("bind_password"));
        assert!(is_sensitive_key("client_secret"));
        assert!(!is_sensitive_key("Designation"));
        assert!(!is_sensitive_key("hashed_index_count_x"));
    }

    #[test]
    fn detects_base64_json_blob() {
        let blob = encoded(&json!({"searchguard": {"dynamic": true}}));
        assert!(blob.starts_with("eyJ"));
        assert!(looks_like_credential(&blob));
    }

    #[test]
    fn plain_words_and_actions_are_not_credentials() {
        assert!(!looks_like_credential("opendistro_security_all_access"));
        assert!(!looks_like_credential("indices:data/read/suggest"));
        assert!(!looks_like_credential("female"));
        assert!(!looks_like_credential("anonymous_auth_enabled"));
    }

    #[test]
    fn detects_bcrypt_hash() {
        let hash = "$2y$12$4s2nx1j0rYzG0ZqV0bfZ5eB7pQ9YcJ1Tj1b4Jf7sH8Xm0qQwFJ6Gm";
        assert!(looks_like_credential(hash));
    }

    #[test]
    fn scrubs_sensitive_keys_recursively() {
        let guard = SecretGuard::new();
        let mut doc = json!({
            "admin": {"hash": "$2y$12$abc", "backend_roles": ["admin"]},
            "kibanaro": {"password": "secret", "reserved": false}
        });

        guard.scrub_value(&mut doc);

        assert_eq!(doc["admin"]["hash"], REDACTED);
        assert_eq!(doc["kibanaro"]["password"], REDACTED);
        assert_eq!(doc["admin"]["backend_roles"][0], "admin");
        assert_eq!(guard.trips(), 2);
    }

    #[test]
    fn scrubs_embedded_blob_in_text() {
        let guard = SecretGuard::new();
        let blob = encoded(&json!({"ALL": ["indices:*"]}));
        let text = format!("stored value {blob} end");

        let clean = guard.scrub_text(&text);

        assert!(!clean.contains(&blob));
        assert!(clean.contains(REDACTED));
        assert!(clean.starts_with("stored value"));
        assert_eq!(guard.trips(), 1);
    }

    #[test]
    fn scrub_text_leaves_clean_text_alone() {
        let guard = SecretGuard::new();
        assert_eq!(guard.scrub_text("GET /emp/_search"), "GET /emp/_search");
        assert_eq!(guard.trips(), 0);
    }

    #[test]
    fn scrub_keyed_uses_key_name() {
        let guard = SecretGuard::new();
        let mut value = json!("hunter2");
        guard.scrub_keyed("password", &mut value);
        assert_eq!(value, REDACTED);
    }

    #[test]
    fn masks_nested_fields() {
        let masked = Matcher::compile(["customer.ssn", "Salary"]).unwrap();
        let mut doc = json!({
            "customer": {"ssn": "123-45-6789", "name": "Ann"},
            "Salary": 100,
            "Gender": "female"
        });

        let count = mask_fields(&mut doc, &masked);

        assert_eq!(count, 2);
        assert_eq!(doc["customer"]["ssn"], REDACTED);
        assert_eq!(doc["customer"]["name"], "Ann");
        assert_eq!(doc["Salary"], REDACTED);
        assert_eq!(doc["Gender"], "female");
    }

    #[test]
    fn masking_descends_into_arrays() {
        let masked = Matcher::compile(["accounts.iban"]).unwrap();
        let mut doc = json!({"accounts": [{"iban": "DE89370400440532013000"}, {"iban": "x", "bank": "B"}]});

        assert_eq!(mask_fields(&mut doc, &masked), 2);
        assert_eq!(doc["accounts"][0]["iban"], REDACTED);
        assert_eq!(doc["accounts"][1]["bank"], "B");
    }

    #[test]
    fn masking_with_empty_matcher_is_noop() {
        let mut doc = json!({"Salary": 100});
        assert_eq!(mask_fields(&mut doc, &Matcher::default()), 0);
        assert_eq!(doc["Salary"], 100);
    }
}
