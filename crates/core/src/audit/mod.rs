//! Tamper-evident audit trail: hash-chained event log and storage.

mod events;
mod log;
mod sqlite;
mod store;

pub use events::*;
pub use log::*;
pub use sqlite::*;
pub use store::*;
