//! Canonical message identity
//!
//! Derives the deterministic message id that keys every log record and DLQ
//! entry. Volatile correlation fields are stripped, object keys are
//! serialized in sorted order, and the identity tuple plus canonical
//! payload bytes are hashed with SHA-256. Identical logical signals always
//! produce the same id regardless of field order or volatile values.

use crate::error::{RouterError, RouterResult};
use crate::signal::{MessageId, Signal};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Field names excluded from identity computation at any nesting depth
const VOLATILE_FIELDS: &[&str] = &["trace_id", "timestamp", "ts", "received_at", "request_id"];

/// Separator between identity tuple components; cannot appear in JSON output
const TUPLE_SEP: u8 = 0x1f;

/// Compute the canonical message id for a signal
///
/// The identity tuple is `(sender_id, event_id | user_id+timestamp,
/// payload_version, canonical_payload)`. Fails with `InvalidPayload` if the
/// content payload is not a JSON object; use [`fallback_message_id`] to
/// keep such signals addressable in the DLQ.
pub fn message_id(signal: &Signal) -> RouterResult<MessageId> {
    if !signal.payload.is_object() {
        return Err(RouterError::invalid_payload(
            "content payload must be a JSON object",
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(signal.sender_id.as_bytes());
    hasher.update([TUPLE_SEP]);
    match &signal.event_id {
        Some(event_id) => hasher.update(event_id.as_bytes()),
        None => {
            if let Some(user_id) = &signal.user_id {
                hasher.update(user_id.as_bytes());
            }
            hasher.update([TUPLE_SEP]);
            if let Some(ts) = &signal.timestamp {
                hasher.update(ts.to_rfc3339().as_bytes());
            }
        }
    }
    hasher.update([TUPLE_SEP]);
    hasher.update(signal.payload_version.as_bytes());
    hasher.update([TUPLE_SEP]);
    hasher.update(canonical_json(&signal.payload).as_bytes());

    Ok(format!("{:x}", hasher.finalize()))
}

/// Addressable identity for signals whose payload could not be canonicalized
///
/// Hashes the raw sender, timestamp and serialized payload so the DLQ entry
/// still has a stable key. Distinct from any canonical id because the
/// canonical path only accepts object payloads.
pub fn fallback_message_id(signal: &Signal) -> MessageId {
    let mut hasher = Sha256::new();
    hasher.update(b"fallback");
    hasher.update([TUPLE_SEP]);
    hasher.update(signal.sender_id.as_bytes());
    hasher.update([TUPLE_SEP]);
    if let Some(ts) = &signal.timestamp {
        hasher.update(ts.to_rfc3339().as_bytes());
    }
    hasher.update([TUPLE_SEP]);
    hasher.update(signal.payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialize a value with volatile fields stripped and keys sorted
///
/// Sorting is applied explicitly rather than relying on map iteration
/// order, so the output is stable under any `serde_json` configuration.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !VOLATILE_FIELDS.contains(&k.as_str()))
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
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
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn signal_with_payload(payload: Value) -> Signal {
        Signal::new("tenant-1", payload).with_event_id("evt-42")
    }

    #[test]
    fn test_key_order_does_not_change_id() {
        let a = signal_with_payload(json!({"message": "help", "priority": 2}));
        let b = signal_with_payload(json!({"priority": 2, "message": "help"}));
        assert_eq!(message_id(&a).unwrap(), message_id(&b).unwrap());
    }

    #[test]
    fn test_volatile_fields_do_not_change_id() {
        let a = signal_with_payload(json!({"message": "help", "trace_id": "t-1", "ts": 1}));
        let b = signal_with_payload(json!({"message": "help", "trace_id": "t-2", "ts": 9}));
        let c = signal_with_payload(json!({"message": "help"}));
        assert_eq!(message_id(&a).unwrap(), message_id(&b).unwrap());
        assert_eq!(message_id(&a).unwrap(), message_id(&c).unwrap());
    }

    #[test]
    fn test_nested_volatile_fields_stripped() {
        let a = signal_with_payload(json!({"meta": {"request_id": "r1", "source": "web"}}));
        let b = signal_with_payload(json!({"meta": {"request_id": "r2", "source": "web"}}));
        assert_eq!(message_id(&a).unwrap(), message_id(&b).unwrap());
    }

    #[test]
    fn test_content_change_changes_id() {
        let a = signal_with_payload(json!({"message": "help"}));
        let b = signal_with_payload(json!({"message": "help!"}));
        assert_ne!(message_id(&a).unwrap(), message_id(&b).unwrap());
    }

    #[test]
    fn test_event_id_part_of_identity() {
        let a = Signal::new("tenant-1", json!({"m": 1})).with_event_id("evt-1");
        let b = Signal::new("tenant-1", json!({"m": 1})).with_event_id("evt-2");
        assert_ne!(message_id(&a).unwrap(), message_id(&b).unwrap());
    }

    #[test]
    fn test_user_id_and_timestamp_identity() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut a = Signal::new("tenant-1", json!({"m": 1}));
        a.user_id = Some("u1".to_string());
        a.timestamp = Some(ts);
        let mut b = a.clone();
        b.trace_id = Some("different-trace".to_string());
        assert_eq!(message_id(&a).unwrap(), message_id(&b).unwrap());

        let mut c = a.clone();
        c.user_id = Some("u2".to_string());
        assert_ne!(message_id(&a).unwrap(), message_id(&c).unwrap());
    }

    #[test]
    fn test_id_is_fixed_width_hex() {
        let id = message_id(&signal_with_payload(json!({"m": 1}))).unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let signal = Signal::new("tenant-1", json!("just a string"));
        let err = message_id(&signal).unwrap_err();
        assert!(matches!(err, RouterError::InvalidPayload { .. }));
    }

    #[test]
    fn test_fallback_id_is_deterministic() {
        let signal = Signal::new("tenant-1", json!([1, 2, 3]));
        assert_eq!(fallback_message_id(&signal), fallback_message_id(&signal));
        let other = Signal::new("tenant-2", json!([1, 2, 3]));
        assert_ne!(fallback_message_id(&signal), fallback_message_id(&other));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
