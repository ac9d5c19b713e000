//! Sync orchestration, conflict resolution and status reporting.

mod engine;
#[cfg(test)]
pub(crate) mod fake;
pub mod resolver;
mod status;

pub use engine::{SyncEngine, SyncReport};
pub use resolver::{resolve, Resolution};
pub use status::{EngineState, Health, StatusReporter, StatusSnapshot};
