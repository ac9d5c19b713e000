//! Caller-facing facade over the store, the network monitor and the engine.

use serde_json::Value;
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{
    EntityId, EntityRecord, EntityType, Mutation, MutationOutcome, ResolutionStrategy,
    SyncConflict, SyncSession, SyncTrigger,
};
use crate::network::{Connectivity, NetworkMonitor};
use crate::remote::RemoteBoundary;
use crate::services::LocalStore;
use crate::sync::{StatusSnapshot, SyncEngine, SyncReport};

/// Offline-first access to pet-care records.
///
/// Writes land in the local ledger and outbox immediately and are pushed by
/// the engine once the device is online.
pub struct SyncClient<R: RemoteBoundary> {
    engine: SyncEngine<R>,
}

impl<R: RemoteBoundary> Clone for SyncClient<R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<R: RemoteBoundary> SyncClient<R> {
    /// Wire a client; must be called inside a Tokio runtime.
    pub fn new(store: LocalStore, remote: R, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let network = NetworkMonitor::spawn(config.network_quiet_period());
        Ok(Self::with_monitor(store, remote, network, config))
    }

    /// Wire a client around an existing network monitor.
    pub fn with_monitor(
        store: LocalStore,
        remote: R,
        network: NetworkMonitor,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine: SyncEngine::new(store, remote, network, config),
        }
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Create or replace one record.
    pub async fn create_or_update(
        &self,
        id: EntityId,
        entity_type: EntityType,
        payload: Value,
    ) -> Result<MutationOutcome> {
        self.single(Mutation::upsert(id, entity_type, payload)).await
    }

    /// Create a record with a fresh client-generated id.
    pub async fn create(&self, entity_type: EntityType, payload: Value) -> Result<MutationOutcome> {
        self.single(Mutation::create(entity_type, payload)).await
    }

    pub async fn delete(&self, id: EntityId) -> Result<MutationOutcome> {
        self.single(Mutation::delete(id)).await
    }

    /// Apply several mutations atomically.
    pub async fn batch(&self, mutations: &[Mutation]) -> Result<Vec<MutationOutcome>> {
        let outcomes = self.engine.store().apply_batch(mutations).await?;
        self.after_local_write().await;
        Ok(outcomes)
    }

    async fn single(&self, mutation: Mutation) -> Result<MutationOutcome> {
        self.batch(std::slice::from_ref(&mutation))
            .await?
            .pop()
            .ok_or_else(|| Error::Database("batch produced no outcome".to_string()))
    }

    async fn after_local_write(&self) {
        self.engine.refresh_status().await;
        if self.engine.network().is_online() {
            self.engine.request_sync();
        }
    }

    pub async fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>> {
        self.engine.store().get(id).await
    }

    pub async fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>> {
        self.engine.store().list_by_type(entity_type).await
    }

    /// Run a sync cycle now and wait for it.
    pub async fn force_sync(&self) -> Result<SyncReport> {
        self.engine.force_sync(SyncTrigger::Manual).await
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.engine.status().subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.engine.status().snapshot()
    }

    /// Unresolved conflicts, oldest first.
    pub async fn list_conflicts(&self) -> Result<Vec<SyncConflict>> {
        self.engine.store().list_conflicts().await
    }

    /// Settle a conflict; `Value::Null` deletes the record.
    pub async fn resolve_conflict(
        &self,
        entity_id: &EntityId,
        chosen: Value,
    ) -> Result<ResolutionStrategy> {
        let strategy = self.engine.store().resolve_conflict(entity_id, chosen).await?;
        self.after_local_write().await;
        Ok(strategy)
    }

    pub async fn conflict_history(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.engine.store().conflict_history(limit).await
    }

    pub async fn recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>> {
        self.engine.store().recent_sessions(limit).await
    }

    /// Retry entries that were surfaced as permanent failures.
    pub async fn requeue_failed(&self) -> Result<usize> {
        let requeued = self.engine.store().requeue_failed().await?;
        if requeued > 0 {
            tracing::info!(requeued, "requeued failed outbox entries");
            self.after_local_write().await;
        }
        Ok(requeued)
    }

    /// Feed a raw connectivity observation from the platform.
    pub fn report_connectivity(&self, connectivity: Connectivity) {
        self.engine.network().report(connectivity);
    }

    /// Start the background sync worker.
    pub fn start(&self) {
        self.engine.start();
    }

    /// Stop the worker and the network monitor.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        self.engine.network().shutdown();
    }
}
