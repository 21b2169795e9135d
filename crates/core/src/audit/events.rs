//! Event record type and hash-chain primitives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `prev_hash` of the first event in the log: a digest-length run of zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Event kinds emitted by the engine.
pub mod kind {
    pub const TICKET_CREATE: &str = "ticket.create";
    pub const TICKET_STATE_CHANGE: &str = "ticket.state_change";
    pub const TICKET_ACK: &str = "ticket.ack";
    pub const INTENT_SIGN: &str = "intent.sign";
    pub const TICKET_CANCEL: &str = "ticket.cancel";
    pub const TICKET_TIMEOUT: &str = "ticket.timeout";
}

/// An immutable audit record, hash-chained to its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique identifier (`evt_` prefix).
    pub id: String,
    /// Event category, e.g. `ticket.create`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Creation timestamp.
    pub ts: DateTime<Utc>,
    /// Event-specific facts.
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Hash of the immediately preceding event, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// Digest binding this event's payload to `prev_hash`.
    pub hash: String,
}

/// Deterministic JSON serialization: object keys sorted lexicographically
/// at every nesting level, no insignificant whitespace.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Digest of an event: sha256 over the previous hash and the canonical
/// payload serialization, joined by a `||` separator.
pub fn compute_event_hash(
    payload: &serde_json::Map<String, serde_json::Value>,
    prev_hash: &str,
) -> String {
    let canonical = canonical_json(&serde_json::Value::Object(payload.clone()));
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"||");
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
