//! Single-writer access to the local replica.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, Transaction};
use serde_json::Value;
use tokio::sync::Mutex;

use super::batch;
use super::merge::{self, MergeOutcome, PushTally};
use crate::config::RetryPolicy;
use crate::db::{
    ConflictRepository, Database, LedgerRepository, OutboxRepository, SqliteConflictRepository,
    SqliteLedgerRepository, SqliteOutboxRepository, SqliteStateRepository, StateRepository,
};
use crate::error::Result;
use crate::models::{
    EntityId, EntityRecord, EntityType, Mutation, MutationOutcome, OutboxEntry,
    ResolutionStrategy, SyncConflict, SyncSession,
};
use crate::remote::{PushItem, PushResult, RemoteChange, RemoteError};
use crate::util::now_millis;

/// Counts surfaced by the status reporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub pending: usize,
    pub conflicts: usize,
    pub failed: usize,
}

/// Thread-safe service for ledger, outbox and sync bookkeeping.
///
/// Every write runs in one `SQLite` transaction while holding the store lock,
/// so the sync engine and caller mutations never interleave.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store backed by a file, creating it if it doesn't exist.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        tracing::info!("Opened local replica at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `f` inside a transaction; it commits only if `f` succeeds.
    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send,
    {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
    {
        let db = self.db.lock().await;
        f(db.connection())
    }

    /// Apply a batch of mutations atomically.
    pub async fn apply_batch(&self, mutations: &[Mutation]) -> Result<Vec<MutationOutcome>> {
        if mutations.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_millis();
        self.write(|tx| batch::execute(tx, mutations, now)).await
    }

    /// Get a live record by ID.
    pub async fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>> {
        self.read(|conn| SqliteLedgerRepository::new(conn).get(id))
            .await
    }

    /// List live records of one type.
    pub async fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>> {
        self.read(|conn| SqliteLedgerRepository::new(conn).list_by_type(entity_type))
            .await
    }

    /// Merge one remote change.
    pub async fn merge_remote(&self, change: &RemoteChange) -> Result<MergeOutcome> {
        let now = now_millis();
        self.write(|tx| merge::merge_remote(tx, change, now)).await
    }

    /// Dequeue the next push batch and mark its records `Syncing`.
    pub async fn prepare_push(&self, max_items: usize, max_bytes: usize) -> Result<Vec<PushItem>> {
        let now = now_millis();
        self.write(|tx| merge::prepare_push(tx, max_items, max_bytes, now))
            .await
    }

    /// Settle a pushed batch.
    pub async fn record_push_results(
        &self,
        items: &[PushItem],
        results: Vec<PushResult>,
        policy: &RetryPolicy,
    ) -> Result<PushTally> {
        let now = now_millis();
        self.write(|tx| merge::record_push_results(tx, items, results, policy, now))
            .await
    }

    /// Settle a batch whose push failed as a whole.
    pub async fn fail_push(
        &self,
        items: &[PushItem],
        error: &RemoteError,
        policy: &RetryPolicy,
    ) -> Result<PushTally> {
        let now = now_millis();
        self.write(|tx| merge::fail_push(tx, items, error, policy, now))
            .await
    }

    /// Hand back a batch that was dequeued but never sent.
    pub async fn release_push(&self, items: &[PushItem]) -> Result<()> {
        self.write(|tx| merge::release_push(tx, items)).await
    }

    /// Close an open conflict with the caller's chosen value.
    pub async fn resolve_conflict(
        &self,
        entity_id: &EntityId,
        chosen: Value,
    ) -> Result<ResolutionStrategy> {
        let now = now_millis();
        self.write(|tx| merge::resolve_conflict(tx, entity_id, chosen, now))
            .await
    }

    pub async fn list_conflicts(&self) -> Result<Vec<SyncConflict>> {
        self.read(|conn| SqliteConflictRepository::new(conn).list_open())
            .await
    }

    pub async fn conflict_history(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.read(|conn| SqliteConflictRepository::new(conn).list_resolved(limit))
            .await
    }

    /// Outbox entries in drain order.
    pub async fn outbox_entries(&self) -> Result<Vec<OutboxEntry>> {
        self.read(|conn| SqliteOutboxRepository::new(conn).list())
            .await
    }

    /// Make permanently failed outbox entries eligible again.
    pub async fn requeue_failed(&self) -> Result<usize> {
        let now = now_millis();
        self.write(|tx| SqliteOutboxRepository::new(tx).requeue_failed(now))
            .await
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        self.read(|conn| {
            let outbox = SqliteOutboxRepository::new(conn);
            Ok(StoreCounts {
                pending: outbox.count_pending()?,
                conflicts: SqliteConflictRepository::new(conn).count_open()?,
                failed: outbox.count_failed()?,
            })
        })
        .await
    }

    pub async fn cursor(&self) -> Result<Option<String>> {
        self.read(|conn| SqliteStateRepository::new(conn).cursor())
            .await
    }

    pub async fn set_cursor(&self, cursor: &str) -> Result<()> {
        self.write(|tx| SqliteStateRepository::new(tx).set_cursor(cursor))
            .await
    }

    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        self.read(|conn| SqliteStateRepository::new(conn).last_sync_at())
            .await
    }

    /// Persist a finished session; clean sessions also advance `last_sync_at`.
    pub async fn finish_session(&self, session: &SyncSession) -> Result<()> {
        self.write(|tx| {
            let state = SqliteStateRepository::new(tx);
            state.save_session(session)?;
            if session.is_clean() {
                if let Some(completed_at) = session.completed_at {
                    state.set_last_sync_at(completed_at)?;
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>> {
        self.read(|conn| SqliteStateRepository::new(conn).recent_sessions(limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{Operation, Priority, SessionOutcome, SyncStatus, SyncTrigger};
    use crate::remote::PushStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pet(name: &str) -> Mutation {
        Mutation::create(EntityType::Pet, json!({"name": name, "species": "dog"}))
    }

    fn lost_report(pet_id: EntityId) -> Mutation {
        Mutation::create(
            EntityType::LostReport,
            json!({
                "pet_id": pet_id.to_string(),
                "last_seen_at": "2026-10-16T08:00:00Z",
                "last_seen_location": "Riverside park"
            }),
        )
    }

    fn remote_change(record: &EntityRecord, payload: Option<Value>, version: i64) -> RemoteChange {
        RemoteChange {
            id: record.id,
            entity_type: record.entity_type,
            payload,
            version,
            created_at: record.created_at,
            updated_at: now_millis(),
        }
    }

    async fn synced_pet(store: &LocalStore, payload: Value, version: i64) -> EntityRecord {
        let mut record = EntityRecord::new(EntityType::Pet, payload.clone());
        record.created_at = 1_000;
        let change = remote_change(&record, Some(payload), version);
        assert_eq!(store.merge_remote(&change).await.unwrap(), MergeOutcome::Applied);
        store.get(&record.id).await.unwrap().unwrap()
    }

    async fn edit(store: &LocalStore, record: &EntityRecord, payload: Value) {
        store
            .apply_batch(&[Mutation::upsert(record.id, record.entity_type, payload)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_is_pending_with_outbox_entry() {
        let store = LocalStore::open_in_memory().unwrap();

        let outcomes = store.apply_batch(&[pet("Rex")]).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].operation, Operation::Create);
        assert_eq!(outcomes[0].local_version, 1);

        let record = store.get(&outcomes[0].entity_id).await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.remote_version, None);

        let entries = store.outbox_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(Some(entries[0].id), outcomes[0].outbox_entry_id);
        assert_eq!(store.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_invalid_mutation_rolls_back_whole_batch() {
        let store = LocalStore::open_in_memory().unwrap();

        let mut mutations: Vec<Mutation> = (0..9).map(|i| pet(&format!("pet-{i}"))).collect();
        mutations.insert(
            4,
            Mutation::create(EntityType::Pet, json!({"name": "no species"})),
        );

        let error = store.apply_batch(&mutations).await.unwrap_err();
        assert!(matches!(error, Error::Validation { index: 4, .. }));
        assert!(store.list_by_type(EntityType::Pet).await.unwrap().is_empty());
        assert!(store.outbox_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_rules_are_simulated_in_order() {
        let store = LocalStore::open_in_memory().unwrap();
        let created = pet("Rex");
        let id = created.entity_id();

        // Create then delete in one batch is fine.
        store
            .apply_batch(&[created, Mutation::delete(id)])
            .await
            .unwrap();
        assert!(store.get(&id).await.unwrap().is_none());

        // A second delete of the same entity is not.
        let error = store.apply_batch(&[Mutation::delete(id)]).await.unwrap_err();
        assert!(matches!(error, Error::Validation { index: 0, .. }));

        let error = store
            .apply_batch(&[Mutation::delete(EntityId::new())])
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Validation { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_writes_to_conflicted_record_are_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let base = json!({"name": "Rex", "species": "dog", "weight": 20});
        let record = synced_pet(&store, base, 3).await;
        edit(&store, &record, json!({"name": "Rex", "species": "dog", "weight": 22})).await;

        let change = remote_change(
            &record,
            Some(json!({"name": "Rex", "species": "dog", "weight": 25})),
            4,
        );
        assert_eq!(store.merge_remote(&change).await.unwrap(), MergeOutcome::Conflicted);

        let error = store
            .apply_batch(&[Mutation::upsert(
                record.id,
                EntityType::Pet,
                json!({"name": "Rex", "species": "dog"}),
            )])
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Validation { index: 0, .. }));
    }

    async fn ledger_rows(store: &LocalStore) -> Vec<EntityRecord> {
        store
            .read(|conn| {
                let ledger = SqliteLedgerRepository::new(conn);
                let mut stmt = conn.prepare("SELECT id FROM entities ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids.iter()
                    .map(|id| Ok(ledger.find(&id.parse().unwrap())?.unwrap()))
                    .collect::<Result<Vec<_>>>()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pawsync.db");

        let (rex_id, gone_id, rows, entries) = {
            let store = LocalStore::open_path(&path).unwrap();
            let outcomes = store.apply_batch(&[pet("Rex")]).await.unwrap();
            let rex = store.get(&outcomes[0].entity_id).await.unwrap().unwrap();
            edit(&store, &rex, json!({"name": "Rex", "species": "dog", "weight": 21})).await;

            let gone = synced_pet(&store, json!({"name": "Fido", "species": "dog"}), 2).await;
            store
                .apply_batch(&[Mutation::delete(gone.id)])
                .await
                .unwrap();

            store
                .apply_batch(&[pet("Tom"), lost_report(rex.id)])
                .await
                .unwrap();

            let error = store
                .apply_batch(&[
                    pet("Ghost"),
                    Mutation::create(EntityType::Pet, json!({"name": "no species"})),
                ])
                .await
                .unwrap_err();
            assert!(matches!(error, Error::Validation { index: 1, .. }));

            store.set_cursor("c7").await.unwrap();
            (
                rex.id,
                gone.id,
                ledger_rows(&store).await,
                store.outbox_entries().await.unwrap(),
            )
        };
        assert_eq!(rows.len(), 4);
        assert_eq!(entries.len(), 4);

        let store = LocalStore::open_path(&path).unwrap();
        assert_eq!(ledger_rows(&store).await, rows);
        assert_eq!(store.outbox_entries().await.unwrap(), entries);

        let rex = store.get(&rex_id).await.unwrap().unwrap();
        assert_eq!(rex.local_version, 2);
        assert_eq!(rex.payload["weight"], 21);

        let tombstone = rows.iter().find(|row| row.id == gone_id).unwrap();
        assert!(tombstone.is_deleted);
        assert!(store.get(&gone_id).await.unwrap().is_none());
        assert_eq!(
            entries
                .iter()
                .filter(|entry| entry.entity_id == gone_id && entry.operation == Operation::Delete)
                .count(),
            1
        );

        // One entry per entity; the refused batch left nothing behind.
        let mut entity_ids: Vec<EntityId> = entries.iter().map(|entry| entry.entity_id).collect();
        entity_ids.sort();
        entity_ids.dedup();
        assert_eq!(entity_ids.len(), entries.len());
        assert!(store
            .list_by_type(EntityType::Pet)
            .await
            .unwrap()
            .iter()
            .all(|record| record.payload["name"] != "Ghost"));

        assert_eq!(store.cursor().await.unwrap().as_deref(), Some("c7"));
        assert_eq!(store.db_path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_push_ack_marks_synced() {
        let store = LocalStore::open_in_memory().unwrap();
        let outcomes = store.apply_batch(&[pet("Rex")]).await.unwrap();
        let id = outcomes[0].entity_id;

        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].base_version, None);
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().sync_status,
            SyncStatus::Syncing
        );

        let results = vec![PushResult {
            entry_id: items[0].entry_id,
            status: PushStatus::Applied { version: 1 },
        }];
        let tally = store
            .record_push_results(&items, results, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(tally.applied, 1);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.remote_version, Some(1));
        assert!(!record.has_unsynced_changes());
        assert!(store.outbox_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_during_push_is_not_lost() {
        let store = LocalStore::open_in_memory().unwrap();
        let outcomes = store.apply_batch(&[pet("Rex")]).await.unwrap();
        let id = outcomes[0].entity_id;

        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        edit(&store, &record, json!({"name": "Rex II", "species": "dog"})).await;

        let results = vec![PushResult {
            entry_id: items[0].entry_id,
            status: PushStatus::Applied { version: 1 },
        }];
        store
            .record_push_results(&items, results, &RetryPolicy::default())
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.remote_version, Some(1));
        assert!(record.has_unsynced_changes());
        let entries = store.outbox_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload_snapshot["name"], "Rex II");
    }

    #[tokio::test]
    async fn test_acknowledged_delete_purges_tombstone() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(&store, json!({"name": "Rex", "species": "dog"}), 2).await;
        store
            .apply_batch(&[Mutation::delete(record.id)])
            .await
            .unwrap();

        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        assert_eq!(items[0].operation, Operation::Delete);
        assert_eq!(items[0].payload, None);
        assert_eq!(items[0].base_version, Some(2));

        let results = vec![PushResult {
            entry_id: items[0].entry_id,
            status: PushStatus::Applied { version: 3 },
        }];
        store
            .record_push_results(&items, results, &RetryPolicy::default())
            .await
            .unwrap();
        assert!(store.list_by_type(EntityType::Pet).await.unwrap().is_empty());
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn test_rejection_and_missing_results() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .apply_batch(&[pet("Rex"), pet("Fido")])
            .await
            .unwrap();
        let items = store.prepare_push(10, 1 << 20).await.unwrap();

        let results = vec![PushResult {
            entry_id: items[0].entry_id,
            status: PushStatus::Rejected {
                reason: "species not allowed".to_string(),
            },
        }];
        let tally = store
            .record_push_results(&items, results, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(tally.rejected, 1);
        assert_eq!(tally.retrying, 1);
        assert_eq!(tally.failures(), 2);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 1);

        // Both entities went back to Pending; the retrying one is backed off.
        assert!(store.prepare_push(10, 1 << 20).await.unwrap().is_empty());
        assert_eq!(store.requeue_failed().await.unwrap(), 1);
        assert_eq!(store.prepare_push(10, 1 << 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_backs_off_every_entry() {
        let store = LocalStore::open_in_memory().unwrap();
        store.apply_batch(&[pet("Rex")]).await.unwrap();
        let items = store.prepare_push(10, 1 << 20).await.unwrap();

        let tally = store
            .fail_push(
                &items,
                &RemoteError::Transient("connection reset".to_string()),
                &RetryPolicy::default(),
            )
            .await
            .unwrap();
        assert_eq!(tally.retrying, 1);

        let entries = store.outbox_entries().await.unwrap();
        assert_eq!(entries[0].retry_count, 1);
        assert_eq!(
            entries[0].last_error.as_deref(),
            Some("Transient remote error: connection reset")
        );
        assert_eq!(
            store.get(&items[0].entity_id).await.unwrap().unwrap().sync_status,
            SyncStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_refused_batch_fails_every_entry_permanently() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .apply_batch(&[pet("Rex"), pet("Fido")])
            .await
            .unwrap();
        let items = store.prepare_push(10, 1 << 20).await.unwrap();

        let tally = store
            .fail_push(
                &items,
                &RemoteError::Permanent("payload schema rejected".to_string()),
                &RetryPolicy::default(),
            )
            .await
            .unwrap();
        assert_eq!(tally.rejected, 2);
        assert_eq!(tally.retrying, 0);

        let entries = store.outbox_entries().await.unwrap();
        assert!(entries
            .iter()
            .all(|entry| entry.permanent_failure && entry.retry_count == 0));
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.pending, 0);
        assert!(store.prepare_push(10, 1 << 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_never_sent_record_leaves_nothing_to_push() {
        let store = LocalStore::open_in_memory().unwrap();
        let outcomes = store.apply_batch(&[pet("Rex")]).await.unwrap();
        let id = outcomes[0].entity_id;

        let outcomes = store.apply_batch(&[Mutation::delete(id)]).await.unwrap();
        assert_eq!(outcomes[0].operation, Operation::Delete);
        assert_eq!(outcomes[0].outbox_entry_id, None);

        assert!(store.get(&id).await.unwrap().is_none());
        assert!(ledger_rows(&store).await.is_empty());
        assert!(store.outbox_entries().await.unwrap().is_empty());
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn test_delete_after_attempted_push_is_still_sent() {
        let store = LocalStore::open_in_memory().unwrap();
        let outcomes = store.apply_batch(&[pet("Rex")]).await.unwrap();
        let id = outcomes[0].entity_id;
        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        store
            .fail_push(
                &items,
                &RemoteError::Transient("request timed out".to_string()),
                &RetryPolicy::default(),
            )
            .await
            .unwrap();

        let outcomes = store.apply_batch(&[Mutation::delete(id)]).await.unwrap();
        assert!(outcomes[0].outbox_entry_id.is_some());

        let entries = store.outbox_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, Operation::Delete);
        assert!(ledger_rows(&store).await[0].is_deleted);
    }

    #[tokio::test]
    async fn test_critical_entries_are_pushed_first() {
        let store = LocalStore::open_in_memory().unwrap();
        let first = pet("Rex");
        let pet_id = first.entity_id();
        store.apply_batch(&[first]).await.unwrap();
        let report = lost_report(pet_id);
        let report_id = report.entity_id();
        store.apply_batch(&[report]).await.unwrap();

        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        let order: Vec<EntityId> = items.iter().map(|item| item.entity_id).collect();
        assert_eq!(order, vec![report_id, pet_id]);
    }

    #[tokio::test]
    async fn test_priority_override_applies() {
        let store = LocalStore::open_in_memory().unwrap();
        let Mutation::Upsert {
            id,
            entity_type,
            payload,
            ..
        } = pet("Rex")
        else {
            unreachable!()
        };
        store
            .apply_batch(&[Mutation::Upsert {
                id,
                entity_type,
                payload,
                priority: Some(Priority::Critical),
            }])
            .await
            .unwrap();
        assert_eq!(
            store.outbox_entries().await.unwrap()[0].priority,
            Priority::Critical
        );
    }

    #[tokio::test]
    async fn test_merge_inserts_unknown_and_skips_unknown_delete() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = EntityRecord::new(EntityType::Contact, json!({"name": "Vet"}));

        let deleted = remote_change(&record, None, 1);
        assert_eq!(store.merge_remote(&deleted).await.unwrap(), MergeOutcome::Skipped);

        let change = remote_change(&record, Some(json!({"name": "Vet"})), 2);
        assert_eq!(store.merge_remote(&change).await.unwrap(), MergeOutcome::Applied);
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.remote_version, Some(2));
        assert_eq!(stored.base_payload, Some(json!({"name": "Vet"})));
        assert!(store.outbox_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(&store, json!({"name": "Rex", "species": "dog"}), 2).await;
        let change = remote_change(&record, Some(json!({"name": "Max", "species": "dog"})), 3);

        store.merge_remote(&change).await.unwrap();
        let once = store.get(&record.id).await.unwrap().unwrap();
        store.merge_remote(&change).await.unwrap();
        let twice = store.get(&record.id).await.unwrap().unwrap();

        assert_eq!(once.payload, twice.payload);
        assert_eq!(twice.remote_version, Some(3));
        assert_eq!(twice.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_field_merge_requeues_merged_payload() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(
            &store,
            json!({"name": "Rex", "species": "dog", "weight": 20}),
            3,
        )
        .await;
        edit(&store, &record, json!({"name": "Rex", "species": "dog", "weight": 22})).await;

        let change = remote_change(
            &record,
            Some(json!({"name": "Rex", "species": "wolfdog", "weight": 20})),
            4,
        );
        assert_eq!(
            store.merge_remote(&change).await.unwrap(),
            MergeOutcome::FieldMerged
        );

        let merged = json!({"name": "Rex", "species": "wolfdog", "weight": 22});
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.payload, merged);
        assert_eq!(stored.remote_version, Some(4));
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        assert_eq!(items[0].payload, Some(merged));
        assert_eq!(items[0].base_version, Some(4));
        assert_eq!(items[0].operation, Operation::Update);
    }

    #[tokio::test]
    async fn test_manual_conflict_resolution_keep_local() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(
            &store,
            json!({"name": "Rex", "species": "dog", "weight": 20}),
            3,
        )
        .await;
        let local = json!({"name": "Rex", "species": "dog", "weight": 22});
        edit(&store, &record, local.clone()).await;

        let remote = json!({"name": "Rex", "species": "dog", "weight": 25});
        let change = remote_change(&record, Some(remote.clone()), 4);
        assert_eq!(store.merge_remote(&change).await.unwrap(), MergeOutcome::Conflicted);

        let conflicts = store.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].fields, vec!["weight".to_string()]);
        assert_eq!(conflicts[0].local_value, local);
        assert_eq!(conflicts[0].remote_value, remote);
        // Conflicted entities are held back from push.
        assert!(store.prepare_push(10, 1 << 20).await.unwrap().is_empty());
        assert_eq!(store.counts().await.unwrap().conflicts, 1);

        let strategy = store.resolve_conflict(&record.id, local.clone()).await.unwrap();
        assert_eq!(strategy, ResolutionStrategy::KeepLocal);

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(stored.payload, local);
        assert!(store.list_conflicts().await.unwrap().is_empty());
        assert_eq!(store.conflict_history(10).await.unwrap().len(), 1);

        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].base_version, Some(4));
        assert_eq!(items[0].payload, Some(local));
    }

    #[tokio::test]
    async fn test_conflict_resolution_keep_remote_settles_record() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(&store, json!({"name": "Rex", "species": "dog"}), 3).await;
        edit(&store, &record, json!({"name": "Rexy", "species": "dog"})).await;

        let remote = json!({"name": "Max", "species": "dog"});
        store
            .merge_remote(&remote_change(&record, Some(remote.clone()), 4))
            .await
            .unwrap();

        let strategy = store.resolve_conflict(&record.id, remote.clone()).await.unwrap();
        assert_eq!(strategy, ResolutionStrategy::KeepRemote);

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.payload, remote);
        assert_eq!(stored.remote_version, Some(4));
        assert!(store.outbox_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_resolution_with_null_deletes() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(&store, json!({"name": "Rex", "species": "dog"}), 3).await;
        edit(&store, &record, json!({"name": "Rexy", "species": "dog"})).await;
        store
            .merge_remote(&remote_change(
                &record,
                Some(json!({"name": "Max", "species": "dog"})),
                4,
            ))
            .await
            .unwrap();

        let strategy = store.resolve_conflict(&record.id, Value::Null).await.unwrap();
        assert_eq!(strategy, ResolutionStrategy::Custom);
        assert!(store.get(&record.id).await.unwrap().is_none());

        let items = store.prepare_push(10, 1 << 20).await.unwrap();
        assert_eq!(items[0].operation, Operation::Delete);
        assert_eq!(items[0].base_version, Some(4));
    }

    #[tokio::test]
    async fn test_invalid_custom_resolution_is_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(&store, json!({"name": "Rex", "species": "dog"}), 3).await;
        edit(&store, &record, json!({"name": "Rexy", "species": "dog"})).await;
        store
            .merge_remote(&remote_change(
                &record,
                Some(json!({"name": "Max", "species": "dog"})),
                4,
            ))
            .await
            .unwrap();

        let error = store
            .resolve_conflict(&record.id, json!({"name": "Rexmax"}))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(store.list_conflicts().await.unwrap().len(), 1);

        let error = store
            .resolve_conflict(&EntityId::new(), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remote_delete_of_clean_record_purges() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = synced_pet(&store, json!({"name": "Rex", "species": "dog"}), 3).await;
        let outcome = store
            .merge_remote(&remote_change(&record, None, 4))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Applied);
        assert!(store.get(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_session_advances_last_sync_only_when_clean() {
        let store = LocalStore::open_in_memory().unwrap();

        let mut failed = SyncSession::start(SyncTrigger::Manual);
        failed.finish(SessionOutcome::PullFailed);
        store.finish_session(&failed).await.unwrap();
        assert_eq!(store.last_sync_at().await.unwrap(), None);

        let mut clean = SyncSession::start(SyncTrigger::Timer);
        clean.finish(SessionOutcome::Completed);
        store.finish_session(&clean).await.unwrap();
        assert_eq!(store.last_sync_at().await.unwrap(), clean.completed_at);
        assert_eq!(store.recent_sessions(5).await.unwrap().len(), 2);
    }
}
