//! Aggregated sync status for callers.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::services::LocalStore;

/// Coarse health of the sync pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    /// Online, but the last cycle failed or entries are stuck
    Degraded,
    Offline,
}

/// Where the sync engine currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Pulling,
    Merging,
    Pushing,
}

impl EngineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Merging => "merging",
            Self::Pushing => "pushing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Outbox entries awaiting delivery
    pub pending_count: usize,
    /// Unresolved conflicts
    pub conflict_count: usize,
    /// Outbox entries surfaced as permanent failures
    pub failed_count: usize,
    /// Unix ms of the last clean sync cycle
    pub last_sync_at: Option<i64>,
    pub health: Health,
    pub engine_state: EngineState,
    /// Failure reported by the most recent cycle
    pub last_error: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            pending_count: 0,
            conflict_count: 0,
            failed_count: 0,
            last_sync_at: None,
            health: Health::Offline,
            engine_state: EngineState::Idle,
            last_error: None,
        }
    }
}

/// Publishes [`StatusSnapshot`]s; cheap to clone, readable offline.
#[derive(Clone)]
pub struct StatusReporter {
    tx: std::sync::Arc<watch::Sender<StatusSnapshot>>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn set_engine_state(&self, state: EngineState) {
        self.tx.send_if_modified(|snapshot| {
            let changed = snapshot.engine_state != state;
            snapshot.engine_state = state;
            changed
        });
    }

    /// Remember the outcome of the last cycle (`None` clears the error).
    pub fn set_last_error(&self, error: Option<String>) {
        self.tx.send_if_modified(|snapshot| {
            let changed = snapshot.last_error != error;
            snapshot.last_error = error;
            changed
        });
    }

    /// Re-read counts from the store and recompute health.
    pub async fn refresh(&self, store: &LocalStore, online: bool) -> Result<StatusSnapshot> {
        let counts = store.counts().await?;
        let last_sync_at = store.last_sync_at().await?;

        self.tx.send_if_modified(|snapshot| {
            let mut next = snapshot.clone();
            next.pending_count = counts.pending;
            next.conflict_count = counts.conflicts;
            next.failed_count = counts.failed;
            next.last_sync_at = last_sync_at;
            next.health = health(online, counts.failed, next.last_error.is_some());

            let changed = next != *snapshot;
            *snapshot = next;
            changed
        });
        Ok(self.snapshot())
    }
}

const fn health(online: bool, failed_count: usize, last_cycle_failed: bool) -> Health {
    if !online {
        Health::Offline
    } else if failed_count > 0 || last_cycle_failed {
        Health::Degraded
    } else {
        Health::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, Mutation};
    use serde_json::json;

    #[test]
    fn health_rules() {
        assert_eq!(health(false, 0, false), Health::Offline);
        assert_eq!(health(false, 3, true), Health::Offline);
        assert_eq!(health(true, 1, false), Health::Degraded);
        assert_eq!(health(true, 0, true), Health::Degraded);
        assert_eq!(health(true, 0, false), Health::Healthy);
    }

    #[tokio::test]
    async fn refresh_counts_pending_mutations() {
        let store = LocalStore::open_in_memory().unwrap();
        let reporter = StatusReporter::new();
        let mut updates = reporter.subscribe();

        store
            .apply_batch(&[Mutation::create(
                EntityType::Contact,
                json!({"name": "Dr. Ada"}),
            )])
            .await
            .unwrap();

        let snapshot = reporter.refresh(&store, true).await.unwrap();
        assert_eq!(snapshot.pending_count, 1);
        assert_eq!(snapshot.health, Health::Healthy);
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().pending_count, 1);

        reporter.refresh(&store, true).await.unwrap();
        assert!(!updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn last_error_degrades_health_until_cleared() {
        let store = LocalStore::open_in_memory().unwrap();
        let reporter = StatusReporter::new();

        reporter.set_last_error(Some("pull failed".to_string()));
        assert_eq!(
            reporter.refresh(&store, true).await.unwrap().health,
            Health::Degraded
        );

        reporter.set_last_error(None);
        assert_eq!(
            reporter.refresh(&store, true).await.unwrap().health,
            Health::Healthy
        );
    }

    #[test]
    fn engine_state_is_published() {
        let reporter = StatusReporter::new();
        reporter.set_engine_state(EngineState::Pushing);
        assert_eq!(reporter.snapshot().engine_state, EngineState::Pushing);
    }
}
