pub mod common;
pub mod conflicts;
pub mod outbox;
pub mod records;
pub mod sessions;
pub mod status;
pub mod sync;
