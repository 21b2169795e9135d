//! Core ticket data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum lease duration: one week.
pub const MAX_TTL_SECONDS: u32 = 604_800;

/// Default lease duration when the caller does not specify one.
pub const DEFAULT_TTL_SECONDS: u32 = 3600;

/// Maximum length of an intent summary.
pub const MAX_SUMMARY_LEN: usize = 200;

/// Current state of a ticket.
///
/// State machine flow:
/// ```text
/// Pending -> Delivered -> Acked -> Approved/Rejected/ChangesRequested
///    |           |          |
///    |           +----------+--> Canceled
///    +---> Canceled/Expired
///
/// Delivered can also expire or resolve directly (no ack required).
/// ```
///
/// `New` is part of the recognized state vocabulary but is never produced:
/// `create` persists tickets directly in `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    New,
    /// Ticket created, not yet delivered to the responsible human.
    Pending,
    /// Ticket delivered; the response lease is running.
    Delivered,
    /// Human acknowledged the ticket; the lease is paused while they review.
    Acked,
    /// Approved by the human (terminal).
    Approved,
    /// Rejected by the human (terminal).
    Rejected,
    /// Human asked the agent to revise the proposal (terminal).
    ChangesRequested,
    /// Lease expired without a decision (terminal).
    Expired,
    /// Canceled by the requesting agent or an operator (terminal).
    Canceled,
}

impl TicketState {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketState::Approved
                | TicketState::Rejected
                | TicketState::ChangesRequested
                | TicketState::Expired
                | TicketState::Canceled
        )
    }

    /// States this state may transition to via the public engine operations.
    ///
    /// Timeout resolution deliberately bypasses this table, see the engine.
    pub fn allowed_transitions(&self) -> &'static [TicketState] {
        match self {
            TicketState::Pending => &[
                TicketState::Delivered,
                TicketState::Canceled,
                TicketState::Expired,
            ],
            TicketState::Delivered => &[
                TicketState::Acked,
                TicketState::Approved,
                TicketState::Rejected,
                TicketState::ChangesRequested,
                TicketState::Canceled,
                TicketState::Expired,
            ],
            TicketState::Acked => &[
                TicketState::Approved,
                TicketState::Rejected,
                TicketState::ChangesRequested,
                TicketState::Canceled,
            ],
            _ => &[],
        }
    }

    /// Returns true if the transition to `target` is permitted.
    pub fn can_transition_to(&self, target: TicketState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Returns the state as its persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketState::New => "NEW",
            TicketState::Pending => "PENDING",
            TicketState::Delivered => "DELIVERED",
            TicketState::Acked => "ACKED",
            TicketState::Approved => "APPROVED",
            TicketState::Rejected => "REJECTED",
            TicketState::ChangesRequested => "CHANGES_REQUESTED",
            TicketState::Expired => "EXPIRED",
            TicketState::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket priority for inbox ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// What to do when a ticket's lease expires without a human decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Resolve the ticket as approved.
    AutoApprove,
    /// Mark the ticket expired (treated as a rejection).
    #[default]
    AutoReject,
    /// Cancel the ticket.
    Cancel,
}

impl TimeoutAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutAction::AutoApprove => "auto_approve",
            TimeoutAction::AutoReject => "auto_reject",
            TimeoutAction::Cancel => "cancel",
        }
    }

    /// State a ticket is moved to when its lease fires with this action.
    pub fn target_state(&self) -> TicketState {
        match self {
            TimeoutAction::AutoApprove => TicketState::Approved,
            TimeoutAction::AutoReject => TicketState::Expired,
            TimeoutAction::Cancel => TicketState::Canceled,
        }
    }
}

/// A human's disposition of a ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    RequestChanges,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::RequestChanges => "request_changes",
        }
    }

    /// Terminal state this decision resolves a ticket into.
    pub fn target_state(&self) -> TicketState {
        match self {
            Decision::Approve => TicketState::Approved,
            Decision::Reject => TicketState::Rejected,
            Decision::RequestChanges => TicketState::ChangesRequested,
        }
    }
}

/// Deadline policy attached to a ticket at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Seconds the human has to respond once the ticket is delivered.
    pub ttl_seconds: u32,
    /// Action taken if the lease expires.
    #[serde(default)]
    pub on_timeout: TimeoutAction,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            on_timeout: TimeoutAction::AutoReject,
        }
    }
}

impl LeaseConfig {
    pub fn new(ttl_seconds: u32, on_timeout: TimeoutAction) -> Self {
        Self {
            ttl_seconds,
            on_timeout,
        }
    }
}

/// The action an agent proposes to take.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    /// Action category, e.g. "run_command" or "modify_file".
    pub kind: String,
    /// One-line human-readable summary.
    pub summary: String,
    /// Action-specific facts (diff, file path, command line, ...).
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl Intent {
    pub fn new(kind: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            summary: summary.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Map<String, serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}

/// A ticket representing one proposed action awaiting human disposition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    /// Unique identifier (`tk_` prefix).
    pub id: String,

    /// Requesting agent identity, e.g. `agent:coder`.
    pub from: String,

    /// Responsible human identity, e.g. `human:alice`.
    pub to: String,

    /// The proposed action. Immutable after creation.
    pub intent: Intent,

    /// Optional content pin (e.g. a diff hash) the decision is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Map<String, serde_json::Value>>,

    /// Deadline policy. Immutable after creation.
    pub lease: LeaseConfig,

    /// Risk estimate in [0, 1], computed upstream.
    pub risk: f64,

    /// Priority for inbox ordering.
    pub priority: Priority,

    /// Current lifecycle state. Mutated only via validated transitions.
    pub state: TicketState,

    /// When the ticket was created.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every state transition.
    pub updated_at: DateTime<Utc>,
}
