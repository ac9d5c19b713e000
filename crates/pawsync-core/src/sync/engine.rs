//! Sync orchestration: pull, merge, push.
//!
//! A cycle moves `Idle -> Pulling -> Merging -> Pushing -> Idle`. Cycles are
//! single-flight: concurrent requests wait for the running cycle and are
//! folded into at most one follow-up cycle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::status::{EngineState, StatusReporter, StatusSnapshot};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{SessionOutcome, SyncSession, SyncTrigger};
use crate::network::{NetworkMonitor, NetworkState};
use crate::remote::{RemoteBoundary, RemoteError};
use crate::services::{LocalStore, MergeOutcome};

/// What a `force_sync` call ended up doing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncReport {
    /// Not online; nothing was attempted
    Offline,
    /// A concurrent caller's cycle already covered this request
    Coalesced,
    /// The last cycle this call ran
    Finished(SyncSession),
}

/// Why a cycle stopped early
enum Stop {
    PullFailed(RemoteError),
    Cancelled,
    Local(Error),
}

impl From<Error> for Stop {
    fn from(error: Error) -> Self {
        Self::Local(error)
    }
}

/// Why a remote call produced no response
enum Interrupted {
    Remote(RemoteError),
    Cancelled,
}

struct Cycle {
    session: SyncSession,
    error: Option<String>,
}

struct Inner<R> {
    store: LocalStore,
    remote: R,
    network: NetworkMonitor,
    status: StatusReporter,
    config: EngineConfig,
    cycle: Mutex<()>,
    requested: AtomicBool,
    wake: Notify,
    shutdown: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Drives synchronization against one remote.
pub struct SyncEngine<R: RemoteBoundary> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteBoundary> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteBoundary> SyncEngine<R> {
    pub fn new(store: LocalStore, remote: R, network: NetworkMonitor, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                network,
                status: StatusReporter::new(),
                config,
                cycle: Mutex::new(()),
                requested: AtomicBool::new(false),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                worker: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn status(&self) -> &StatusReporter {
        &self.inner.status
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Re-read counts and health; failures are logged, not returned.
    pub async fn refresh_status(&self) -> StatusSnapshot {
        let inner = &self.inner;
        match inner.status.refresh(&inner.store, inner.network.is_online()).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(%error, "failed to refresh sync status");
                inner.status.snapshot()
            }
        }
    }

    /// Run a cycle now, or wait for the running one plus one follow-up.
    ///
    /// Remote failures are recorded on the session and the status reporter;
    /// only local storage errors are returned.
    pub async fn force_sync(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        let inner = &self.inner;
        inner.requested.store(true, Ordering::Release);
        let _cycle = inner.cycle.lock().await;

        let mut report = SyncReport::Coalesced;
        while inner.requested.swap(false, Ordering::AcqRel) {
            report = self.run_cycle(trigger).await?;
        }
        Ok(report)
    }

    /// Ask the background worker for a cycle without waiting for it.
    pub fn request_sync(&self) {
        self.inner.wake.notify_one();
    }

    async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        let inner = &self.inner;
        if !inner.network.is_online() {
            tracing::debug!(trigger = trigger.as_str(), "offline, skipping sync cycle");
            self.refresh_status().await;
            return Ok(SyncReport::Offline);
        }

        let mut cycle = Cycle {
            session: SyncSession::start(trigger),
            error: None,
        };
        tracing::info!(session_id = %cycle.session.id, trigger = trigger.as_str(), "sync cycle started");

        let result = match self.pull(&mut cycle).await {
            Ok(()) => self.push(&mut cycle).await,
            Err(stop) => Err(stop),
        };
        inner.status.set_engine_state(EngineState::Idle);

        let outcome = match result {
            Ok(()) => SessionOutcome::Completed,
            Err(Stop::PullFailed(error)) => {
                tracing::warn!(%error, "pull failed, cycle aborted");
                cycle.session.failure_count = cycle.session.failure_count.saturating_add(1);
                cycle.error = Some(error.to_string());
                SessionOutcome::PullFailed
            }
            Err(Stop::Cancelled) => SessionOutcome::Cancelled,
            Err(Stop::Local(error)) => {
                tracing::error!(%error, "sync cycle aborted by local storage error");
                inner.status.set_last_error(Some(error.to_string()));
                self.refresh_status().await;
                return Err(error);
            }
        };

        let mut session = cycle.session;
        session.finish(outcome);
        inner.store.finish_session(&session).await?;
        inner.status.set_last_error(cycle.error);
        self.refresh_status().await;

        tracing::info!(%session, "sync cycle finished");
        Ok(SyncReport::Finished(session))
    }

    /// Bound a remote call by the request timeout and by shutdown.
    async fn guarded<T, F>(&self, request: F) -> std::result::Result<T, Interrupted>
    where
        F: Future<Output = crate::remote::RemoteResult<T>>,
    {
        let timeout = self.inner.config.request_timeout();
        tokio::select! {
            () = self.inner.shutdown.cancelled() => Err(Interrupted::Cancelled),
            result = tokio::time::timeout(timeout, request) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(Interrupted::Remote(error)),
                Err(_) => Err(Interrupted::Remote(RemoteError::Transient(format!(
                    "request timed out after {}ms",
                    timeout.as_millis()
                )))),
            },
        }
    }

    fn check_cancelled(&self) -> std::result::Result<(), Stop> {
        if self.inner.shutdown.is_cancelled() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn pull(&self, cycle: &mut Cycle) -> std::result::Result<(), Stop> {
        let inner = &self.inner;
        let mut cursor = inner.store.cursor().await?;

        for page in 0..inner.config.max_pull_pages {
            self.check_cancelled()?;
            inner.status.set_engine_state(EngineState::Pulling);

            let response = match self.guarded(inner.remote.pull(cursor.clone())).await {
                Ok(response) => response,
                Err(Interrupted::Remote(error)) => return Err(Stop::PullFailed(error)),
                Err(Interrupted::Cancelled) => return Err(Stop::Cancelled),
            };

            inner.status.set_engine_state(EngineState::Merging);
            for change in &response.changes {
                self.check_cancelled()?;
                let outcome = inner.store.merge_remote(change).await?;
                if outcome == MergeOutcome::Conflicted {
                    tracing::info!(entity_id = %change.id, "remote change conflicts with local edits");
                }
                cycle.session.pulled_count = cycle.session.pulled_count.saturating_add(1);
            }

            inner.store.set_cursor(&response.cursor).await?;
            tracing::debug!(page, changes = response.changes.len(), cursor = %response.cursor, "pulled page");
            cursor = Some(response.cursor);

            if !response.has_more {
                return Ok(());
            }
        }

        tracing::debug!("pull page limit reached; remaining pages wait for the next cycle");
        Ok(())
    }

    async fn push(&self, cycle: &mut Cycle) -> std::result::Result<(), Stop> {
        let inner = &self.inner;
        let retry = inner.config.retry;

        for _ in 0..inner.config.max_push_batches {
            self.check_cancelled()?;
            inner.status.set_engine_state(EngineState::Pushing);

            let items = inner
                .store
                .prepare_push(
                    inner.config.push_batch_max_items,
                    inner.config.push_batch_max_bytes,
                )
                .await?;
            if items.is_empty() {
                break;
            }

            match self.guarded(inner.remote.push(items.clone())).await {
                Ok(results) => {
                    let tally = inner.store.record_push_results(&items, results, &retry).await?;
                    let session = &mut cycle.session;
                    session.pushed_count = session.pushed_count.saturating_add(tally.applied);
                    session.failure_count = session.failure_count.saturating_add(tally.failures());
                    if tally.failures() > 0 {
                        cycle.error = Some(format!(
                            "{} of {} pushed mutations failed",
                            tally.failures(),
                            items.len()
                        ));
                    }
                }
                Err(Interrupted::Remote(error)) => {
                    if error.is_transient() {
                        tracing::warn!(%error, items = items.len(), "push failed, backing off");
                    } else {
                        tracing::warn!(%error, items = items.len(), "remote rejected push batch");
                    }
                    let tally = inner.store.fail_push(&items, &error, &retry).await?;
                    let session = &mut cycle.session;
                    session.failure_count = session.failure_count.saturating_add(tally.failures());
                    cycle.error = Some(error.to_string());
                    break;
                }
                Err(Interrupted::Cancelled) => {
                    inner.store.release_push(&items).await?;
                    return Err(Stop::Cancelled);
                }
            }
        }
        Ok(())
    }

    /// Spawn the background worker; a no-op if it is already running.
    pub fn start(&self) {
        let mut worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let engine = self.clone();
        *worker = Some(tokio::spawn(async move { engine.run_worker().await }));
    }

    async fn run_worker(self) {
        let inner = &self.inner;
        let mut network = inner.network.subscribe();
        let mut ticker = inner.config.sync_interval().map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        tracing::info!("sync worker started");
        let mut next = inner
            .network
            .is_online()
            .then_some(SyncTrigger::ConnectivityRestored);

        loop {
            let trigger = match next.take() {
                Some(trigger) => trigger,
                None => tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    () = inner.wake.notified() => SyncTrigger::Manual,
                    changed = network.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *network.borrow_and_update();
                        if state == NetworkState::Online {
                            SyncTrigger::ConnectivityRestored
                        } else {
                            self.refresh_status().await;
                            continue;
                        }
                    }
                    () = next_tick(ticker.as_mut()) => SyncTrigger::Timer,
                },
            };

            if let Err(error) = self.force_sync(trigger).await {
                tracing::error!(%error, trigger = trigger.as_str(), "sync cycle failed");
            }
        }
        tracing::info!("sync worker stopped");
    }

    /// Cancel any running cycle and stop the worker.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();

        let worker = inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                tracing::warn!(%error, "sync worker ended abnormally");
            }
        }

        // Wait for a caller-driven cycle to unwind.
        let _cycle = inner.cycle.lock().await;
        inner.status.set_engine_state(EngineState::Idle);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
