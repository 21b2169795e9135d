//! Configuration loading and validation.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
