//! Content fingerprinting, redaction-safe summaries and dedup keys.
//!
//! Pure functions, no state. The fingerprint is computed over a canonical
//! serialization (object keys sorted at every depth), so payloads that are
//! structurally equal hash identically regardless of key order.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Width of the coarse time bucket used for indexed range queries.
pub const BUCKET_WIDTH_SECS: i64 = 3_600;

/// Payload fields tried, in order, as the event's identity.
pub const IDENTITY_FIELDS: [&str; 8] = [
    "id",
    "eventId",
    "event_id",
    "externalId",
    "transactionId",
    "orderId",
    "messageId",
    "uuid",
];

/// Length of the serialized-payload prefix used when no identity field is present.
pub const IDENTITY_FALLBACK_LEN: usize = 200;

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEY_FRAGMENTS: [&str; 12] = [
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "authorization",
    "credential",
    "privatekey",
    "private_key",
    "cardnumber",
    "cvv",
];
const SUMMARY_MAX_DEPTH: usize = 8;
const SUMMARY_MAX_STRING: usize = 256;
const SUMMARY_MAX_ARRAY: usize = 20;

/// SHA-256 of the canonical serialization, hex-encoded.
pub fn hash_payload(payload: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(payload).as_bytes()))
}

/// Serialize with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Size of the payload's compact serialization, in bytes.
pub fn payload_size(payload: &Value) -> u64 {
    payload.to_string().len() as u64
}

/// Redacted projection of a payload for display.
///
/// Values under sensitive keys become `[REDACTED]`; long strings and arrays
/// are truncated; nesting beyond a fixed depth collapses. Structure is otherwise
/// preserved, and the result is deterministic for a given input.
pub fn extract_safe_payload(payload: &Value) -> Value {
    summarize(payload, 0)
}

fn summarize(value: &Value, depth: usize) -> Value {
    if depth >= SUMMARY_MAX_DEPTH {
        return Value::String("[MAX_DEPTH]".to_string());
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let v = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        summarize(v, depth + 1)
                    };
                    (key.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(SUMMARY_MAX_ARRAY)
                .map(|v| summarize(v, depth + 1))
                .collect();
            if items.len() > SUMMARY_MAX_ARRAY {
                out.push(Value::String(format!(
                    "[{} more]",
                    items.len() - SUMMARY_MAX_ARRAY
                )));
            }
            Value::Array(out)
        }
        Value::String(s) if s.chars().count() > SUMMARY_MAX_STRING => {
            let truncated: String = s.chars().take(SUMMARY_MAX_STRING).collect();
            Value::String(format!("{truncated}..."))
        }
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| normalized.contains(fragment))
}

/// Best-effort identity of a payload: the first present identity field
/// (string or number), else a truncated canonical serialization.
pub fn payload_identity(payload: &Value) -> String {
    if let Value::Object(map) = payload {
        for field in IDENTITY_FIELDS {
            match map.get(field) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::Number(n)) => return n.to_string(),
                _ => {}
            }
        }
    }
    canonical_json(payload)
        .chars()
        .take(IDENTITY_FALLBACK_LEN)
        .collect()
}

/// Dedup key: `eventType + payloadIdentity + orgId`.
pub fn derive_event_key(event_type: &str, payload: &Value, org_id: &str) -> String {
    compose_key(&[event_type, &payload_identity(payload), org_id])
}

/// Join key parts so that no two part lists produce the same key: each part
/// carries its byte length, so separators inside a part are never ambiguous.
pub fn compose_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| format!("{}:{part}", part.len()))
        .collect::<Vec<_>>()
        .join("|")
}

/// Floor a timestamp to its bucket. Pure and stable.
pub fn get_bucket_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(BUCKET_WIDTH_SECS);
    Utc.timestamp_opt(floored, 0)
        .single()
        .unwrap_or(ts)
}
