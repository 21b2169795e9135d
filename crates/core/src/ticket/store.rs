//! Ticket storage trait and request/error types.

use thiserror::Error;

use crate::audit::AuditError;
use crate::ticket::{
    Intent, LeaseConfig, Priority, Ticket, TicketState, MAX_SUMMARY_LEN, MAX_TTL_SECONDS,
};

/// Error type for ticket operations.
#[derive(Debug, Error)]
pub enum TicketError {
    /// Ticket not found.
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// Requested transition is not permitted from the ticket's current state.
    #[error("Invalid transition for ticket {ticket_id}: {from} -> {to}")]
    InvalidTransition {
        ticket_id: String,
        from: TicketState,
        to: TicketState,
    },

    /// Malformed input to `create`.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Event log error.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Request to create a new ticket.
#[derive(Debug, Clone)]
pub struct CreateTicketRequest {
    /// Requesting agent identity (`agent:` or `system:` namespace).
    pub from: String,
    /// Responsible human identity (`human:` namespace).
    pub to: String,
    /// The proposed action.
    pub intent: Intent,
    /// Optional content pin the decision is bound to.
    pub artifact: Option<serde_json::Map<String, serde_json::Value>>,
    /// Deadline policy.
    pub lease: LeaseConfig,
    /// Risk estimate in [0, 1].
    pub risk: f64,
    /// Priority for inbox ordering.
    pub priority: Priority,
}

impl CreateTicketRequest {
    /// Create a request with default lease, risk 0 and normal priority.
    pub fn new(from: impl Into<String>, to: impl Into<String>, intent: Intent) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            intent,
            artifact: None,
            lease: LeaseConfig::default(),
            risk: 0.0,
            priority: Priority::Normal,
        }
    }

    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_risk(mut self, risk: f64) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_artifact(
        mut self,
        artifact: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Validate the request against the protocol schema rules.
    pub fn validate(&self) -> Result<(), TicketError> {
        if !is_namespaced_id(&self.to, &["human"]) {
            return Err(TicketError::Validation(format!(
                "'to' must be a human identity (human:<name>), got '{}'",
                self.to
            )));
        }
        if !is_namespaced_id(&self.from, &["agent", "system"]) {
            return Err(TicketError::Validation(format!(
                "'from' must be an agent or system identity, got '{}'",
                self.from
            )));
        }
        if self.intent.kind.is_empty() {
            return Err(TicketError::Validation(
                "intent kind must not be empty".to_string(),
            ));
        }
        if self.intent.summary.is_empty() || self.intent.summary.len() > MAX_SUMMARY_LEN {
            return Err(TicketError::Validation(format!(
                "intent summary must be 1..={MAX_SUMMARY_LEN} characters"
            )));
        }
        if !(0.0..=1.0).contains(&self.risk) {
            return Err(TicketError::Validation(format!(
                "risk must be in [0, 1], got {}",
                self.risk
            )));
        }
        if self.lease.ttl_seconds == 0 || self.lease.ttl_seconds > MAX_TTL_SECONDS {
            return Err(TicketError::Validation(format!(
                "lease ttl_seconds must be in 1..={MAX_TTL_SECONDS}, got {}",
                self.lease.ttl_seconds
            )));
        }
        Ok(())
    }
}

/// `namespace:[a-z0-9_-]+` with one of the accepted namespaces.
fn is_namespaced_id(id: &str, namespaces: &[&str]) -> bool {
    let Some((ns, name)) = id.split_once(':') else {
        return false;
    };
    namespaces.contains(&ns)
        && !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Trait for ticket storage backends.
///
/// Implementations must make `update_state` an atomic single-row write;
/// that is the only durability contract the engine relies on for tickets.
pub trait TicketStore: Send + Sync {
    /// Persist a new ticket in `Pending` state, allocating its id.
    fn create(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError>;

    /// Get a ticket by ID.
    fn get(&self, id: &str) -> Result<Option<Ticket>, TicketError>;

    /// Write a ticket's state, refreshing `updated_at`.
    fn update_state(&self, id: &str, new_state: TicketState) -> Result<Ticket, TicketError>;

    /// Tickets addressed to `human_id` still awaiting a disposition
    /// (`Pending`, `Delivered` or `Acked`), most recent first.
    fn list_pending(&self, human_id: &str) -> Result<Vec<Ticket>, TicketError>;

    /// All tickets, most recent first.
    fn list_all(&self) -> Result<Vec<Ticket>, TicketError>;
}
