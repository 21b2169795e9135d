//! SQLite-backed event store.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{AuditError, Event, EventStore};

/// SQLite-backed event store. Append order is the sqlite rowid order.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Create a new SQLite event store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path).map_err(|e| AuditError::Database(e.to_string()))?;
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite event store (useful for testing).
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory().map_err(|e| AuditError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), AuditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                ts TEXT NOT NULL,
                payload TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
            "#,
        )
        .map_err(|e| AuditError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let ts_str: String = row.get(2)?;
        let payload_json: String = row.get(3)?;
        let prev_hash: String = row.get(4)?;
        let hash: String = row.get(5)?;

        let ts: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let payload = serde_json::from_str(&payload_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        Ok(Event {
            id,
            kind,
            ts,
            payload,
            prev_hash,
            hash,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: &Event) -> Result<(), AuditError> {
        let conn = self.conn.lock().unwrap();

        let payload_json = serde_json::to_string(&event.payload)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO events (id, type, ts, payload, prev_hash, hash) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                event.id,
                event.kind,
                event.ts.to_rfc3339(),
                payload_json,
                event.prev_hash,
                event.hash,
            ],
        )
        .map_err(|e| AuditError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Event>, AuditError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT id, type, ts, payload, prev_hash, hash FROM events ORDER BY rowid ASC")
            .map_err(|e| AuditError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_event)
            .map_err(|e| AuditError::Database(e.to_string()))?;

        let mut events = Vec::new();
        for row_result in rows {
            events.push(row_result.map_err(|e| AuditError::Database(e.to_string()))?);
        }
        Ok(events)
    }

    fn last(&self) -> Result<Option<Event>, AuditError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            "SELECT id, type, ts, payload, prev_hash, hash FROM events ORDER BY rowid DESC LIMIT 1",
            [],
            Self::row_to_event,
        );

        match result {
            Ok(event) => Ok(Some(event)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AuditError::Database(e.to_string())),
        }
    }
}
