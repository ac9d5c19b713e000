//! Services over the local replica: batch mutations, remote merges and the
//! single-writer store that serializes them.

mod batch;
mod merge;
mod store;

pub use merge::{MergeOutcome, PushTally};
pub use store::{LocalStore, StoreCounts};
