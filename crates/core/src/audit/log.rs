//! Hash-chained event log.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::{compute_event_hash, AuditError, Event, EventStore, GENESIS_HASH};

/// Append-only, tamper-evident log of domain events.
///
/// Each appended event records the hash of its predecessor and a digest
/// binding its own payload to that hash, forming a singly linked chain from
/// the genesis sentinel to the newest event. The chain detects retroactive
/// edits but does not authenticate authorship.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn EventStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Append an event, chaining it to the most recent one.
    pub fn append(
        &self,
        kind: &str,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Event, AuditError> {
        let prev_hash = match self.store.last()? {
            Some(last) => last.hash,
            None => GENESIS_HASH.to_string(),
        };

        let hash = compute_event_hash(&payload, &prev_hash);
        let event = Event {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            kind: kind.to_string(),
            ts: Utc::now(),
            payload,
            prev_hash,
            hash,
        };

        self.store.append(&event)?;
        debug!(event_id = %event.id, kind = %event.kind, "Appended audit event");
        Ok(event)
    }

    /// Replay the full chain from genesis, recomputing every digest.
    ///
    /// Each event's expected digest is derived from its stored payload and
    /// the previous event's stored hash; any retroactive edit, reordering or
    /// deletion of an interior entry breaks the recomputation.
    pub fn verify_integrity(&self) -> Result<bool, AuditError> {
        let events = self.store.get_all()?;

        let mut prev_hash = GENESIS_HASH.to_string();
        for event in events {
            let expected = compute_event_hash(&event.payload, &prev_hash);
            if event.hash != expected {
                debug!(event_id = %event.id, "Event hash mismatch during verification");
                return Ok(false);
            }
            prev_hash = event.hash;
        }
        Ok(true)
    }

    /// All events in append order, oldest first.
    pub fn get_all(&self) -> Result<Vec<Event>, AuditError> {
        self.store.get_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{kind, SqliteEventStore};
    use serde_json::json;

    fn create_log() -> EventLog {
        EventLog::new(Arc::new(SqliteEventStore::in_memory().unwrap()))
    }

    fn payload(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_first_event_chains_from_genesis() {
        let log = create_log();

        let event = log
            .append(kind::TICKET_CREATE, payload(&[("ticket_id", json!("tk_1"))]))
            .unwrap();

        assert_eq!(event.prev_hash, GENESIS_HASH);
        assert!(event.id.starts_with("evt_"));
        assert_eq!(event.hash, compute_event_hash(&event.payload, GENESIS_HASH));
    }

    #[test]
    fn test_second_event_chains_from_first() {
        let log = create_log();

        let first = log
            .append(kind::TICKET_CREATE, payload(&[("ticket_id", json!("tk_1"))]))
            .unwrap();
        let second = log
            .append(
                kind::TICKET_STATE_CHANGE,
                payload(&[("ticket_id", json!("tk_1")), ("to_state", json!("DELIVERED"))]),
            )
            .unwrap();

        assert_eq!(second.prev_hash, first.hash);
    }

    #[test]
    fn test_empty_log_verifies() {
        let log = create_log();
        assert!(log.verify_integrity().unwrap());
    }

    #[test]
    fn test_chain_verifies_after_appends() {
        let log = create_log();
        for i in 0..10 {
            log.append(
                kind::TICKET_STATE_CHANGE,
                payload(&[("ticket_id", json!(format!("tk_{i}")))]),
            )
            .unwrap();
        }
        assert!(log.verify_integrity().unwrap());
        assert_eq!(log.get_all().unwrap().len(), 10);
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("events.db");

        let log = EventLog::new(Arc::new(SqliteEventStore::new(&db_path).unwrap()));
        for i in 0..5 {
            log.append(
                kind::TICKET_CREATE,
                payload(&[("ticket_id", json!(format!("tk_{i}")))]),
            )
            .unwrap();
        }
        assert!(log.verify_integrity().unwrap());

        // Rewrite one stored payload behind the log's back.
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE events SET payload = ? WHERE rowid = 3",
            rusqlite::params![r#"{"ticket_id":"tk_evil"}"#],
        )
        .unwrap();

        assert!(!log.verify_integrity().unwrap());
    }

    #[test]
    fn test_tampered_hash_fails_verification() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("events.db");

        let log = EventLog::new(Arc::new(SqliteEventStore::new(&db_path).unwrap()));
        for i in 0..5 {
            log.append(
                kind::TICKET_CREATE,
                payload(&[("ticket_id", json!(format!("tk_{i}")))]),
            )
            .unwrap();
        }

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE events SET hash = ? WHERE rowid = 2",
            rusqlite::params!["f".repeat(64)],
        )
        .unwrap();

        assert!(!log.verify_integrity().unwrap());
    }

    #[test]
    fn test_deleted_interior_event_fails_verification() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("events.db");

        let log = EventLog::new(Arc::new(SqliteEventStore::new(&db_path).unwrap()));
        for i in 0..5 {
            log.append(
                kind::TICKET_CREATE,
                payload(&[("ticket_id", json!(format!("tk_{i}")))]),
            )
            .unwrap();
        }

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute("DELETE FROM events WHERE rowid = 3", []).unwrap();

        assert!(!log.verify_integrity().unwrap());
    }
}
