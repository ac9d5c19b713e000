//! pawsync-core - offline-first sync engine for pet-care records
//!
//! This crate contains the local ledger and priority outbox, the conflict
//! resolver, the connectivity monitor and the sync engine shared by every
//! pawsync front end.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use client::SyncClient;
pub use config::{EngineConfig, RetryPolicy};
pub use error::{Error, Result};
pub use models::{EntityId, EntityRecord, EntityType, Mutation, SyncStatus};
pub use remote::{HttpRemote, RemoteBoundary};
pub use services::LocalStore;
pub use sync::{StatusSnapshot, SyncEngine, SyncReport};
