//! Detail sanitization for audit entries.
//!
//! Known-sensitive field names are redacted and oversized string values
//! truncated before anything reaches the audit trail. Sanitization happens
//! on the write path only; stored entries are already safe to display.

use serde_json::Value;

/// Placeholder written over redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Suffix appended to truncated values.
const TRUNCATED: &str = "...[truncated]";

/// Field-name fragments redacted by default. The governed domain handles
/// Australian identity material, so TFN and Medicare numbers are included.
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "private_key",
    "credential",
    "ssn",
    "tfn",
    "medicare",
];

/// Recursively sanitize a details payload.
///
/// Object values whose key contains any sensitive fragment (case
/// insensitive) are replaced with [`REDACTED`]; string values longer than
/// `max_len` are truncated.
pub fn sanitize_details(details: &Value, sensitive_keys: &[String], max_len: usize) -> Value {
    match details {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                let lower = key.to_lowercase();
                if sensitive_keys.iter().any(|s| lower.contains(s.as_str())) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), sanitize_details(value, sensitive_keys, max_len));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| sanitize_details(v, sensitive_keys, max_len))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > max_len => {
            let truncated: String = s.chars().take(max_len).collect();
            Value::String(format!("{}{}", truncated, TRUNCATED))
        }
        other => other.clone(),
    }
}
