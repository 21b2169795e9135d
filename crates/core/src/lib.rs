//! Human approval protocol core.
//!
//! Mediates risky actions proposed by autonomous agents: an agent submits an
//! intent, the engine issues a time-boxed ticket, a human approves or rejects
//! it, and every state change lands in a hash-chained audit log.
//!
//! The crate is the library behind the CLI / protocol-bridge front ends; it
//! owns the ticket state machine ([`engine::HapEngine`]), the response-lease
//! subsystem ([`lease::LeaseManager`]) and the tamper-evident event log
//! ([`audit::EventLog`]).

pub mod audit;
pub mod config;
pub mod engine;
pub mod lease;
pub mod ticket;

pub use audit::{AuditError, Event, EventLog, EventStore, SqliteEventStore, GENESIS_HASH};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use engine::HapEngine;
pub use lease::{LeaseFired, LeaseManager};
pub use ticket::{
    CreateTicketRequest, Decision, Intent, LeaseConfig, Priority, SqliteTicketStore, Ticket,
    TicketError, TicketState, TicketStore, TimeoutAction,
};
