//! Data models for pawsync

mod entity;
mod mutation;
mod outbox;
mod session;
mod sync_conflict;

pub use entity::{EntityId, EntityRecord, EntityType, SyncStatus};
pub use mutation::{Mutation, MutationOutcome};
pub use outbox::{Operation, OutboxEntry, OutboxEntryId, Priority};
pub use session::{SessionOutcome, SyncSession, SyncTrigger};
pub use sync_conflict::{ResolutionStrategy, SyncConflict};
