//! Response-deadline leases for delivered tickets.
//!
//! The manager holds at most one lease per ticket id. Each armed lease owns a
//! spawned timer task; expirations are delivered over an mpsc channel rather
//! than a callback, so the consumer decides when to apply the side effect.
//! Lease entries live only in memory and are never persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::ticket::TimeoutAction;

/// Notification that a lease deadline elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseFired {
    pub ticket_id: String,
    pub action: TimeoutAction,
}

struct LeaseEntry {
    action: TimeoutAction,
    /// Time left on the lease. While armed, measured from `armed_at`.
    remaining: Duration,
    armed_at: Instant,
    /// Distinguishes this lease from a replaced one with the same ticket id.
    generation: u64,
    /// Timer task handle; `None` while paused.
    timer: Option<JoinHandle<()>>,
}

/// Tracks one advisory deadline per active ticket.
///
/// Must be used within a Tokio runtime: deadlines are spawned timer tasks.
/// Timers use `tokio::time`, so tests can drive them with paused virtual time.
pub struct LeaseManager {
    leases: Arc<Mutex<HashMap<String, LeaseEntry>>>,
    tx: mpsc::UnboundedSender<LeaseFired>,
    generation: AtomicU64,
}

impl LeaseManager {
    /// Create a manager and the receiving end of its expiry channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LeaseFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                leases: Arc::new(Mutex::new(HashMap::new())),
                tx,
                generation: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Arm a lease for `ticket_id`, replacing any existing one.
    ///
    /// When the deadline elapses the entry is discarded and exactly one
    /// [`LeaseFired`] is sent on the expiry channel.
    pub fn start(&self, ticket_id: &str, ttl_seconds: u32, on_timeout: TimeoutAction) {
        self.clear(ticket_id);

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let remaining = Duration::from_secs(u64::from(ttl_seconds));

        let mut leases = self.leases.lock().unwrap();
        let timer = self.spawn_timer(ticket_id.to_string(), remaining, generation);
        leases.insert(
            ticket_id.to_string(),
            LeaseEntry {
                action: on_timeout,
                remaining,
                armed_at: Instant::now(),
                generation,
                timer: Some(timer),
            },
        );
        debug!(ticket_id, ttl_seconds, "Lease started");
    }

    /// Freeze the remaining time of an armed lease. No-op if the lease is
    /// absent or already paused.
    pub fn pause(&self, ticket_id: &str) {
        let mut leases = self.leases.lock().unwrap();
        let Some(entry) = leases.get_mut(ticket_id) else {
            return;
        };
        let Some(timer) = entry.timer.take() else {
            return;
        };
        timer.abort();
        let elapsed = entry.armed_at.elapsed();
        entry.remaining = entry.remaining.saturating_sub(elapsed);
        debug!(
            ticket_id,
            remaining_secs = entry.remaining.as_secs(),
            "Lease paused"
        );
    }

    /// Re-arm a paused lease for its recorded remainder. No-op if the lease
    /// is absent or already armed.
    pub fn resume(&self, ticket_id: &str) {
        let mut leases = self.leases.lock().unwrap();
        let Some(entry) = leases.get_mut(ticket_id) else {
            return;
        };
        if entry.timer.is_some() {
            return;
        }
        entry.armed_at = Instant::now();
        entry.timer = Some(self.spawn_timer(
            ticket_id.to_string(),
            entry.remaining,
            entry.generation,
        ));
        debug!(
            ticket_id,
            remaining_secs = entry.remaining.as_secs(),
            "Lease resumed"
        );
    }

    /// Disarm and discard the lease for `ticket_id`. Idempotent; safe to call
    /// for a lease whose timer already fired.
    pub fn clear(&self, ticket_id: &str) {
        let mut leases = self.leases.lock().unwrap();
        if let Some(entry) = leases.remove(ticket_id) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            debug!(ticket_id, "Lease cleared");
        }
    }

    /// Disarm and discard every lease. Used at shutdown so no timer fires
    /// into a torn-down engine.
    pub fn dispose(&self) {
        let mut leases = self.leases.lock().unwrap();
        for (_, entry) in leases.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    /// Number of tracked leases (armed or paused).
    pub fn len(&self) -> usize {
        self.leases.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_timer(
        &self,
        ticket_id: String,
        after: Duration,
        generation: u64,
    ) -> JoinHandle<()> {
        let leases = Arc::clone(&self.leases);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;

            // The entry may have been paused, cleared or replaced while the
            // abort signal was in flight; fire only if this exact lease is
            // still armed.
            let fired = {
                let mut leases = leases.lock().unwrap();
                match leases.get(&ticket_id) {
                    Some(entry) if entry.generation == generation && entry.timer.is_some() => {
                        let action = entry.action;
                        leases.remove(&ticket_id);
                        Some(action)
                    }
                    _ => None,
                }
            };

            if let Some(action) = fired {
                debug!(ticket_id = %ticket_id, action = %action.as_str(), "Lease expired");
                let _ = tx.send(LeaseFired { ticket_id, action });
            }
        })
    }
}
