//! In-memory remote used by engine tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::models::{EntityId, EntityType, Operation};
use crate::remote::{
    PullResponse, PushItem, PushResult, PushStatus, RemoteBoundary, RemoteChange, RemoteError,
    RemoteResult,
};
use crate::util::now_millis;

#[derive(Default)]
struct State {
    records: BTreeMap<EntityId, RemoteChange>,
    feed: Vec<RemoteChange>,
    pushes: Vec<Vec<PushItem>>,
    rejected: HashSet<EntityId>,
    failing_pulls: usize,
    failing_pushes: usize,
    refusing_pushes: usize,
}

pub(crate) struct FakeRemote {
    state: Mutex<State>,
    page_size: usize,
    latency: Duration,
    push_latency: Duration,
    pub(crate) pull_calls: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 100,
            latency: Duration::ZERO,
            push_latency: Duration::ZERO,
            pull_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self.push_latency = latency;
        self
    }

    /// Slow down pushes only; pulls answer immediately.
    pub(crate) fn with_push_latency(mut self, latency: Duration) -> Self {
        self.push_latency = latency;
        self
    }

    /// Simulate another device writing a record.
    pub(crate) fn remote_write(
        &self,
        id: EntityId,
        entity_type: EntityType,
        payload: Option<Value>,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        let now = now_millis();
        let (version, created_at) = state
            .records
            .get(&id)
            .map_or((1, now), |record| (record.version + 1, record.created_at));
        let change = RemoteChange {
            id,
            entity_type,
            payload,
            version,
            created_at,
            updated_at: now,
        };
        state.records.insert(id, change.clone());
        state.feed.push(change);
        version
    }

    pub(crate) fn record(&self, id: &EntityId) -> Option<RemoteChange> {
        self.state.lock().unwrap().records.get(id).cloned()
    }

    pub(crate) fn pushed(&self) -> Vec<Vec<PushItem>> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub(crate) fn reject(&self, id: EntityId) {
        self.state.lock().unwrap().rejected.insert(id);
    }

    pub(crate) fn fail_next_pulls(&self, count: usize) {
        self.state.lock().unwrap().failing_pulls = count;
    }

    pub(crate) fn fail_next_pushes(&self, count: usize) {
        self.state.lock().unwrap().failing_pushes = count;
    }

    /// Refuse the next `count` push batches outright.
    pub(crate) fn refuse_next_pushes(&self, count: usize) {
        self.state.lock().unwrap().refusing_pushes = count;
    }

    fn apply(state: &mut State, item: &PushItem) -> PushStatus {
        if state.rejected.contains(&item.entity_id) {
            return PushStatus::Rejected {
                reason: "rejected by test remote".to_string(),
            };
        }
        let now = now_millis();
        let previous = state.records.get(&item.entity_id);
        let version = previous.map_or(1, |record| record.version + 1);
        let created_at = previous.map_or(now, |record| record.created_at);
        let payload = match item.operation {
            Operation::Delete => None,
            Operation::Create | Operation::Update => item.payload.clone(),
        };
        let change = RemoteChange {
            id: item.entity_id,
            entity_type: item.entity_type,
            payload,
            version,
            created_at,
            updated_at: now,
        };
        state.records.insert(item.entity_id, change.clone());
        state.feed.push(change);
        PushStatus::Applied { version }
    }
}

impl RemoteBoundary for FakeRemote {
    async fn pull(&self, cursor: Option<String>) -> RemoteResult<PullResponse> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_pulls > 0 {
            state.failing_pulls -= 1;
            return Err(RemoteError::Transient("remote unavailable".to_string()));
        }

        let start: usize = cursor.as_deref().map_or(0, |cursor| cursor.parse().unwrap());
        let end = (start + self.page_size).min(state.feed.len());
        Ok(PullResponse {
            changes: state.feed[start..end].to_vec(),
            cursor: end.to_string(),
            has_more: end < state.feed.len(),
        })
    }

    async fn push(&self, items: Vec<PushItem>) -> RemoteResult<Vec<PushResult>> {
        if !self.push_latency.is_zero() {
            tokio::time::sleep(self.push_latency).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(RemoteError::Transient("connection reset".to_string()));
        }
        if state.refusing_pushes > 0 {
            state.refusing_pushes -= 1;
            return Err(RemoteError::Permanent("batch schema rejected".to_string()));
        }

        state.pushes.push(items.clone());
        Ok(items
            .iter()
            .map(|item| PushResult {
                entry_id: item.entry_id,
                status: Self::apply(&mut state, item),
            })
            .collect())
    }
}
