//! Ticket lifecycle engine.
//!
//! Owns the state machine, orchestrates lease and event-log side effects
//! around each transition, and resolves expired leases into terminal states.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{kind, Event, EventLog, EventStore, SqliteEventStore};
use crate::config::Config;
use crate::lease::{LeaseFired, LeaseManager};
use crate::ticket::{
    CreateTicketRequest, Decision, SqliteTicketStore, Ticket, TicketError, TicketState,
    TicketStore, TimeoutAction,
};

/// The approval engine: composition root for the ticket store, the event log
/// and the lease manager.
///
/// Must be created within a Tokio runtime; lease timers and the expiry
/// consumer are spawned tasks. Call [`HapEngine::dispose`] (or drop the
/// engine) before tearing down the runtime so no timer outlives the stores.
pub struct HapEngine {
    inner: Arc<EngineInner>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

struct EngineInner {
    tickets: Arc<dyn TicketStore>,
    log: EventLog,
    leases: LeaseManager,
}

impl HapEngine {
    /// Create an engine over caller-supplied stores.
    pub fn with_stores(tickets: Arc<dyn TicketStore>, events: Arc<dyn EventStore>) -> Self {
        let (leases, mut expiry_rx) = LeaseManager::new();
        let inner = Arc::new(EngineInner {
            tickets,
            log: EventLog::new(events),
            leases,
        });

        let consumer = Arc::clone(&inner);
        let expiry_task = tokio::spawn(async move {
            while let Some(LeaseFired { ticket_id, action }) = expiry_rx.recv().await {
                consumer.handle_timeout(&ticket_id, action);
            }
        });

        Self {
            inner,
            expiry_task: Mutex::new(Some(expiry_task)),
        }
    }

    /// Open an engine backed by a SQLite database file.
    pub fn open(db_path: &Path) -> Result<Self, TicketError> {
        let tickets = Arc::new(SqliteTicketStore::new(db_path)?);
        let events = Arc::new(SqliteEventStore::new(db_path)?);
        Ok(Self::with_stores(tickets, events))
    }

    /// Open an engine from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, TicketError> {
        Self::open(&config.database.path)
    }

    /// Engine backed by in-memory stores (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let tickets = Arc::new(SqliteTicketStore::in_memory()?);
        let events = Arc::new(SqliteEventStore::in_memory()?);
        Ok(Self::with_stores(tickets, events))
    }

    /// Validate and persist a new ticket in `Pending` state.
    pub fn create_ticket(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError> {
        request.validate()?;

        let ticket = self.inner.tickets.create(request)?;
        self.inner.log.append(
            kind::TICKET_CREATE,
            object(json!({
                "ticket_id": ticket.id,
                "from": ticket.from,
                "to": ticket.to,
                "intent_kind": ticket.intent.kind,
                "risk": ticket.risk,
                "priority": ticket.priority.as_str(),
            })),
        )?;

        info!(ticket_id = %ticket.id, to = %ticket.to, "Ticket created");
        Ok(ticket)
    }

    /// Deliver a pending ticket to its human, starting the response lease.
    pub fn deliver_ticket(&self, ticket_id: &str) -> Result<Ticket, TicketError> {
        self.inner.transition(ticket_id, TicketState::Delivered, |ticket| {
            self.inner.leases.start(
                &ticket.id,
                ticket.lease.ttl_seconds,
                ticket.lease.on_timeout,
            );
            self.inner.log.append(
                kind::TICKET_STATE_CHANGE,
                object(json!({
                    "ticket_id": ticket.id,
                    "from_state": ticket.state.as_str(),
                    "to_state": TicketState::Delivered.as_str(),
                })),
            )?;
            Ok(())
        })
    }

    /// Acknowledge a delivered ticket, pausing its lease while the human
    /// reviews. The remaining lease time is frozen, not cleared.
    pub fn ack_ticket(
        &self,
        ticket_id: &str,
        human_id: &str,
        note: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        self.inner.transition(ticket_id, TicketState::Acked, |ticket| {
            self.inner.leases.pause(&ticket.id);
            self.inner.log.append(
                kind::TICKET_ACK,
                object(json!({
                    "ticket_id": ticket.id,
                    "from": human_id,
                    "note": note.unwrap_or_default(),
                })),
            )?;
            Ok(())
        })
    }

    /// Record a human disposition, clearing the lease so no timeout can fire
    /// afterwards. The only path that records a human decision.
    pub fn resolve_ticket(
        &self,
        ticket_id: &str,
        human_id: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        self.inner
            .transition(ticket_id, decision.target_state(), |ticket| {
                self.inner.leases.clear(&ticket.id);
                self.inner.log.append(
                    kind::INTENT_SIGN,
                    object(json!({
                        "ticket_id": ticket.id,
                        "from": human_id,
                        "decision": decision.as_str(),
                        "comment": comment.unwrap_or_default(),
                    })),
                )?;
                Ok(())
            })
    }

    pub fn approve_ticket(
        &self,
        ticket_id: &str,
        human_id: &str,
        comment: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        self.resolve_ticket(ticket_id, human_id, Decision::Approve, comment)
    }

    pub fn reject_ticket(
        &self,
        ticket_id: &str,
        human_id: &str,
        comment: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        self.resolve_ticket(ticket_id, human_id, Decision::Reject, comment)
    }

    pub fn request_changes_ticket(
        &self,
        ticket_id: &str,
        human_id: &str,
        comment: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        self.resolve_ticket(ticket_id, human_id, Decision::RequestChanges, comment)
    }

    /// Cancel a ticket from any non-terminal state.
    pub fn cancel_ticket(
        &self,
        ticket_id: &str,
        from: &str,
        reason: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        self.inner
            .transition(ticket_id, TicketState::Canceled, |ticket| {
                self.inner.leases.clear(&ticket.id);
                self.inner.log.append(
                    kind::TICKET_CANCEL,
                    object(json!({
                        "ticket_id": ticket.id,
                        "from": from,
                        "reason": reason.unwrap_or_default(),
                    })),
                )?;
                Ok(())
            })
    }

    pub fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, TicketError> {
        self.inner.tickets.get(ticket_id)
    }

    /// Tickets addressed to `human_id` still awaiting a disposition,
    /// most recent first.
    pub fn list_pending(&self, human_id: &str) -> Result<Vec<Ticket>, TicketError> {
        self.inner.tickets.list_pending(human_id)
    }

    pub fn list_all(&self) -> Result<Vec<Ticket>, TicketError> {
        self.inner.tickets.list_all()
    }

    /// Replay the full event chain, returning false if any entry was altered.
    pub fn verify_event_log(&self) -> Result<bool, TicketError> {
        Ok(self.inner.log.verify_integrity()?)
    }

    pub fn get_events(&self) -> Result<Vec<Event>, TicketError> {
        Ok(self.inner.log.get_all()?)
    }

    /// Disarm all leases and stop the expiry consumer. Idempotent; called
    /// automatically on drop.
    pub fn dispose(&self) {
        self.inner.leases.dispose();
        if let Some(task) = self.expiry_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for HapEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl EngineInner {
    /// The generic validated transition path: load, check the table, run the
    /// side effect, persist. A failed lookup or table check performs no side
    /// effect and no write.
    fn transition<F>(
        &self,
        ticket_id: &str,
        target: TicketState,
        side_effect: F,
    ) -> Result<Ticket, TicketError>
    where
        F: FnOnce(&Ticket) -> Result<(), TicketError>,
    {
        let ticket = self
            .tickets
            .get(ticket_id)?
            .ok_or_else(|| TicketError::NotFound(ticket_id.to_string()))?;

        if !ticket.state.can_transition_to(target) {
            return Err(TicketError::InvalidTransition {
                ticket_id: ticket_id.to_string(),
                from: ticket.state,
                to: target,
            });
        }

        side_effect(&ticket)?;
        let updated = self.tickets.update_state(ticket_id, target)?;
        info!(ticket_id, from = %ticket.state, to = %target, "Ticket transition");
        Ok(updated)
    }

    /// Resolve an expired lease. Runs on the expiry consumer task only.
    ///
    /// Re-reads the ticket and backs off if a decision already landed: the
    /// last persisted state wins, a stale timer never overwrites it. The
    /// state write deliberately bypasses the transition table — the engine
    /// itself asserts the timeout outcome. This is the single such bypass.
    fn handle_timeout(&self, ticket_id: &str, action: TimeoutAction) {
        let ticket = match self.tickets.get(ticket_id) {
            Ok(Some(ticket)) => ticket,
            Ok(None) => {
                debug!(ticket_id, "Lease fired for unknown ticket, ignoring");
                return;
            }
            Err(e) => {
                warn!(ticket_id, "Failed to load ticket for timeout: {e}");
                return;
            }
        };

        if ticket.state.is_terminal() {
            debug!(
                ticket_id,
                state = %ticket.state,
                "Lease fired after ticket was resolved, ignoring"
            );
            return;
        }

        let target = action.target_state();
        if let Err(e) = self.tickets.update_state(ticket_id, target) {
            warn!(ticket_id, "Failed to apply timeout state: {e}");
            return;
        }

        let appended = self.log.append(
            kind::TICKET_TIMEOUT,
            object(json!({
                "ticket_id": ticket_id,
                "action_taken": action.as_str(),
                "reason": format!(
                    "Lease expired after {} seconds",
                    ticket.lease.ttl_seconds
                ),
            })),
        );
        if let Err(e) = appended {
            warn!(ticket_id, "Failed to record timeout event: {e}");
        }

        info!(ticket_id, action = %action.as_str(), to = %target, "Lease expired");
    }
}

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{Intent, LeaseConfig, Priority};

    fn request(to: &str) -> CreateTicketRequest {
        CreateTicketRequest::new(
            "agent:coder",
            to,
            Intent::new("run_command", "rm -rf build/"),
        )
        .with_lease(LeaseConfig::new(30, TimeoutAction::AutoReject))
        .with_risk(0.7)
        .with_priority(Priority::High)
    }

    #[tokio::test]
    async fn test_create_persists_pending_ticket_and_event() {
        let engine = HapEngine::in_memory().unwrap();

        let ticket = engine.create_ticket(request("human:alice")).unwrap();
        assert_eq!(ticket.state, TicketState::Pending);

        let events = engine.get_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, kind::TICKET_CREATE);
        assert_eq!(
            events[0].payload.get("ticket_id"),
            Some(&serde_json::json!(ticket.id))
        );
        assert!(engine.verify_event_log().unwrap());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let engine = HapEngine::in_memory().unwrap();

        let result = engine.create_ticket(request("human:alice").with_risk(2.0));
        assert!(matches!(result, Err(TicketError::Validation(_))));
        // Nothing persisted, nothing logged.
        assert!(engine.list_all().unwrap().is_empty());
        assert!(engine.get_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_starts_lease_and_logs_state_change() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();

        let delivered = engine.deliver_ticket(&ticket.id).unwrap();
        assert_eq!(delivered.state, TicketState::Delivered);
        assert_eq!(engine.inner.leases.len(), 1);

        let events = engine.get_events().unwrap();
        assert_eq!(events.last().unwrap().kind, kind::TICKET_STATE_CHANGE);
    }

    #[tokio::test]
    async fn test_deliver_twice_fails() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();

        engine.deliver_ticket(&ticket.id).unwrap();
        let result = engine.deliver_ticket(&ticket.id);
        assert!(matches!(
            result,
            Err(TicketError::InvalidTransition {
                from: TicketState::Delivered,
                to: TicketState::Delivered,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_ack_requires_delivery() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();

        let result = engine.ack_ticket(&ticket.id, "human:alice", None);
        assert!(matches!(
            result,
            Err(TicketError::InvalidTransition {
                from: TicketState::Pending,
                ..
            })
        ));

        // No side effects from the failed call.
        let current = engine.get_ticket(&ticket.id).unwrap().unwrap();
        assert_eq!(current.state, TicketState::Pending);
        assert_eq!(engine.get_events().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_from_delivered_without_ack() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();
        engine.deliver_ticket(&ticket.id).unwrap();

        let rejected = engine
            .reject_ticket(&ticket.id, "human:alice", Some("too risky"))
            .unwrap();
        assert_eq!(rejected.state, TicketState::Rejected);
        assert!(engine.inner.leases.is_empty());

        let last = engine.get_events().unwrap().pop().unwrap();
        assert_eq!(last.kind, kind::INTENT_SIGN);
        assert_eq!(last.payload.get("decision"), Some(&serde_json::json!("reject")));
        assert_eq!(
            last.payload.get("comment"),
            Some(&serde_json::json!("too risky"))
        );
    }

    #[tokio::test]
    async fn test_request_changes_resolution() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();
        engine.deliver_ticket(&ticket.id).unwrap();
        engine.ack_ticket(&ticket.id, "human:alice", None).unwrap();

        let resolved = engine
            .request_changes_ticket(&ticket.id, "human:alice", Some("split the diff"))
            .unwrap();
        assert_eq!(resolved.state, TicketState::ChangesRequested);
    }

    #[tokio::test]
    async fn test_resolve_terminal_ticket_fails_without_side_effects() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();
        engine.deliver_ticket(&ticket.id).unwrap();
        engine.approve_ticket(&ticket.id, "human:alice", None).unwrap();

        let events_before = engine.get_events().unwrap().len();
        let result = engine.cancel_ticket(&ticket.id, "agent:coder", None);
        assert!(matches!(result, Err(TicketError::InvalidTransition { .. })));
        assert_eq!(engine.get_events().unwrap().len(), events_before);
    }

    #[tokio::test]
    async fn test_cancel_clears_lease() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();
        engine.deliver_ticket(&ticket.id).unwrap();

        let canceled = engine
            .cancel_ticket(&ticket.id, "agent:coder", Some("obsolete"))
            .unwrap();
        assert_eq!(canceled.state, TicketState::Canceled);
        assert!(engine.inner.leases.is_empty());
    }

    #[tokio::test]
    async fn test_operations_on_missing_ticket() {
        let engine = HapEngine::in_memory().unwrap();

        assert!(matches!(
            engine.deliver_ticket("tk_missing"),
            Err(TicketError::NotFound(_))
        ));
        assert!(matches!(
            engine.approve_ticket("tk_missing", "human:alice", None),
            Err(TicketError::NotFound(_))
        ));
        assert!(engine.get_ticket("tk_missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pending_excludes_resolved() {
        let engine = HapEngine::in_memory().unwrap();

        let t1 = engine.create_ticket(request("human:alice")).unwrap();
        let t2 = engine.create_ticket(request("human:alice")).unwrap();
        engine.deliver_ticket(&t1.id).unwrap();
        engine.approve_ticket(&t1.id, "human:alice", None).unwrap();

        let pending = engine.list_pending("human:alice").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, t2.id);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let engine = HapEngine::in_memory().unwrap();
        let ticket = engine.create_ticket(request("human:alice")).unwrap();
        engine.deliver_ticket(&ticket.id).unwrap();

        engine.dispose();
        assert!(engine.inner.leases.is_empty());
        engine.dispose();
    }
}
