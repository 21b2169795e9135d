//! Event storage trait.

use thiserror::Error;

use super::Event;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Trait for event storage backends.
///
/// Implementations must preserve append order and make it queryable in that
/// order; that is the only durability contract the event log relies on.
pub trait EventStore: Send + Sync {
    /// Durably append an event.
    fn append(&self, event: &Event) -> Result<(), AuditError>;

    /// All events in append order, oldest first.
    fn get_all(&self) -> Result<Vec<Event>, AuditError>;

    /// The most recently appended event, if any.
    fn last(&self) -> Result<Option<Event>, AuditError>;
}
