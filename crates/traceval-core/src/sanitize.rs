//! Secret redaction and length bounding for any text that ends up in an item or a
//! judge prompt.

use std::sync::OnceLock;

use regex::Regex;
use traceval_types::{MetaValue, Metadata};

pub const REDACTED: &str = "[REDACTED]";

// Applied in order; provider key shapes first so the generic assignments see the
// already-redacted marker.
const SENSITIVE_PATTERNS: &[&str] = &[
    r"sk-[a-zA-Z0-9]{20,}",
    r"sk-ant-[a-zA-Z0-9-]+",
    r"OPENAI_API_KEY\s*=\s*\S+",
    r"api[_-]?key\s*[=:]\s*\S+",
    r"password\s*[=:]\s*\S+",
    r"secret\s*[=:]\s*\S+",
    r"token\s*[=:]\s*[a-zA-Z0-9_-]{20,}",
];

const SENSITIVE_KEYS: &[&str] = &["api_key", "password", "secret", "token", "credential", "auth"];

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SENSITIVE_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("static redaction pattern"))
            .collect()
    })
}

/// Replace every secret-like substring with [`REDACTED`].
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for re in patterns() {
        if re.is_match(&out) {
            out = re.replace_all(&out, REDACTED).into_owned();
        }
    }
    out
}

/// Keep the first `limit` characters and note how many were dropped.
pub fn truncate(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str(&format!("\n... [TRUNCATED - {} chars removed]", total - limit));
    out
}

/// Redact a decoded attribute map: values under credential-looking keys are dropped
/// wholesale, other strings go through [`redact`].
pub fn redact_attributes(attrs: &Metadata) -> Metadata {
    attrs
        .iter()
        .map(|(key, value)| {
            let lower = key.to_lowercase();
            let value = if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                MetaValue::String(REDACTED.to_string())
            } else {
                match value {
                    MetaValue::String(s) => MetaValue::String(redact(s)),
                    other => other.clone(),
                }
            };
            (key.clone(), value)
        })
        .collect()
}
