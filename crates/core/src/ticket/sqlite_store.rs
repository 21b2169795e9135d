//! SQLite-backed ticket store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    CreateTicketRequest, Intent, LeaseConfig, Priority, Ticket, TicketError, TicketState,
    TicketStore,
};

/// SQLite-backed ticket store.
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
}

impl SqliteTicketStore {
    /// Create a new SQLite ticket store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        let conn = Connection::open(path).map_err(|e| TicketError::Database(e.to_string()))?;
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn =
            Connection::open_in_memory().map_err(|e| TicketError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                intent TEXT NOT NULL,
                artifact TEXT,
                lease TEXT NOT NULL,
                risk REAL NOT NULL,
                priority TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'PENDING',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_to_state ON tickets(to_id, state);
            CREATE INDEX IF NOT EXISTS idx_tickets_state_created ON tickets(state, created_at);
            "#,
        )
        .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        let id: String = row.get(0)?;
        let from: String = row.get(1)?;
        let to: String = row.get(2)?;
        let intent_json: String = row.get(3)?;
        let artifact_json: Option<String> = row.get(4)?;
        let lease_json: String = row.get(5)?;
        let risk: f64 = row.get(6)?;
        let priority_str: String = row.get(7)?;
        let state_str: String = row.get(8)?;
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;

        let intent: Intent = serde_json::from_str(&intent_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let artifact = artifact_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let lease: LeaseConfig = serde_json::from_str(&lease_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        // State and priority are persisted as their bare string vocabulary.
        let state: TicketState = serde_json::from_str(&format!("\"{state_str}\""))
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let priority: Priority = serde_json::from_str(&format!("\"{priority_str}\""))
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let created_at = parse_timestamp(&created_at_str)?;
        let updated_at = parse_timestamp(&updated_at_str)?;

        Ok(Ticket {
            id,
            from,
            to,
            intent,
            artifact,
            lease,
            risk,
            priority,
            state,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

const TICKET_COLUMNS: &str =
    "id, from_id, to_id, intent, artifact, lease, risk, priority, state, created_at, updated_at";

impl TicketStore for SqliteTicketStore {
    fn create(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError> {
        let conn = self.conn.lock().unwrap();

        let id = format!("tk_{}", uuid::Uuid::new_v4().simple());
        let now = Utc::now();

        let intent_json = serde_json::to_string(&request.intent)
            .map_err(|e| TicketError::Database(e.to_string()))?;
        let artifact_json = request
            .artifact
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| TicketError::Database(e.to_string()))?;
        let lease_json = serde_json::to_string(&request.lease)
            .map_err(|e| TicketError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO tickets (id, from_id, to_id, intent, artifact, lease, risk, priority, state, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.from,
                request.to,
                intent_json,
                artifact_json,
                lease_json,
                request.risk,
                request.priority.as_str(),
                TicketState::Pending.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(Ticket {
            id,
            from: request.from,
            to: request.to,
            intent: request.intent,
            artifact: request.artifact,
            lease: request.lease,
            risk: request.risk,
            priority: request.priority,
            state: TicketState::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Ticket>, TicketError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?"),
            params![id],
            Self::row_to_ticket,
        );

        match result {
            Ok(ticket) => Ok(Some(ticket)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TicketError::Database(e.to_string())),
        }
    }

    fn update_state(&self, id: &str, new_state: TicketState) -> Result<Ticket, TicketError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        let updated = conn
            .execute(
                "UPDATE tickets SET state = ?, updated_at = ? WHERE id = ?",
                params![new_state.as_str(), now.to_rfc3339(), id],
            )
            .map_err(|e| TicketError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(TicketError::NotFound(id.to_string()));
        }

        conn.query_row(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?"),
            params![id],
            Self::row_to_ticket,
        )
        .map_err(|e| TicketError::Database(e.to_string()))
    }

    fn list_pending(&self, human_id: &str) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE to_id = ? AND state IN ('PENDING', 'DELIVERED', 'ACKED') ORDER BY created_at DESC"
            ))
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![human_id], Self::row_to_ticket)
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let mut tickets = Vec::new();
        for row_result in rows {
            tickets.push(row_result.map_err(|e| TicketError::Database(e.to_string()))?);
        }
        Ok(tickets)
    }

    fn list_all(&self) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets ORDER BY created_at DESC"
            ))
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_ticket)
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let mut tickets = Vec::new();
        for row_result in rows {
            tickets.push(row_result.map_err(|e| TicketError::Database(e.to_string()))?);
        }
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::TimeoutAction;

    fn create_test_store() -> SqliteTicketStore {
        SqliteTicketStore::in_memory().unwrap()
    }

    fn create_request(to: &str) -> CreateTicketRequest {
        CreateTicketRequest::new(
            "agent:coder",
            to,
            Intent::new("run_command", "cargo test"),
        )
        .with_lease(LeaseConfig::new(60, TimeoutAction::AutoReject))
        .with_risk(0.4)
    }

    #[test]
    fn test_create_and_get() {
        let store = create_test_store();
        let ticket = store.create(create_request("human:alice")).unwrap();

        assert!(ticket.id.starts_with("tk_"));
        assert_eq!(ticket.state, TicketState::Pending);
        assert_eq!(ticket.created_at, ticket.updated_at);

        let fetched = store.get(&ticket.id).unwrap().expect("ticket exists");
        assert_eq!(fetched, ticket);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = create_test_store();
        assert!(store.get("tk_missing").unwrap().is_none());
    }

    #[test]
    fn test_artifact_round_trip() {
        let store = create_test_store();
        let mut artifact = serde_json::Map::new();
        artifact.insert("diff_hash".to_string(), serde_json::json!("abc123"));

        let ticket = store
            .create(create_request("human:alice").with_artifact(artifact.clone()))
            .unwrap();

        let fetched = store.get(&ticket.id).unwrap().unwrap();
        assert_eq!(fetched.artifact, Some(artifact));
    }

    #[test]
    fn test_update_state_refreshes_updated_at() {
        let store = create_test_store();
        let ticket = store.create(create_request("human:alice")).unwrap();

        let updated = store
            .update_state(&ticket.id, TicketState::Delivered)
            .unwrap();
        assert_eq!(updated.state, TicketState::Delivered);
        assert!(updated.updated_at >= ticket.updated_at);
        // Creation fields are untouched.
        assert_eq!(updated.intent, ticket.intent);
        assert_eq!(updated.lease, ticket.lease);
    }

    #[test]
    fn test_update_state_missing_ticket() {
        let store = create_test_store();
        let result = store.update_state("tk_missing", TicketState::Delivered);
        assert!(matches!(result, Err(TicketError::NotFound(_))));
    }

    #[test]
    fn test_list_pending_filters_by_human_and_state() {
        let store = create_test_store();

        let t1 = store.create(create_request("human:alice")).unwrap();
        let t2 = store.create(create_request("human:alice")).unwrap();
        let _other = store.create(create_request("human:bob")).unwrap();

        store.update_state(&t1.id, TicketState::Delivered).unwrap();
        store.update_state(&t2.id, TicketState::Approved).unwrap();

        let pending = store.list_pending("human:alice").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, t1.id);
    }

    #[test]
    fn test_list_all() {
        let store = create_test_store();
        store.create(create_request("human:alice")).unwrap();
        store.create(create_request("human:bob")).unwrap();

        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let store = SqliteTicketStore::new(&db_path).unwrap();
        store.create(create_request("human:alice")).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.list_all().unwrap().len(), 1);
    }
}
