//! Ticket data model and storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::*;
pub use store::*;
pub use types::*;
