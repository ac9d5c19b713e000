//! Connectivity monitoring with flap debouncing.
//!
//! Platform code reports raw [`Connectivity`] observations; the monitor
//! publishes a debounced [`NetworkState`]. Going offline is published at once,
//! coming back online only after the link has stayed up for the quiet period.
//! The monitor never calls the sync engine; the engine subscribes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Link technology as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    None,
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
}

/// One raw connectivity observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connectivity {
    pub kind: ConnectionKind,
    /// The platform believes the internet is reachable over `kind`
    pub reachable: bool,
}

impl Connectivity {
    pub const OFFLINE: Self = Self {
        kind: ConnectionKind::None,
        reachable: false,
    };

    pub const fn online(kind: ConnectionKind) -> Self {
        Self {
            kind,
            reachable: true,
        }
    }

    pub const fn is_up(&self) -> bool {
        self.reachable && !matches!(self.kind, ConnectionKind::None)
    }
}

/// Debounced connectivity signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Offline,
    Online,
}

/// Pure debounce state machine; the async driver feeds it time and input.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet_period: Duration,
    published: NetworkState,
    up_since: Option<Instant>,
}

impl Debouncer {
    pub const fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            published: NetworkState::Offline,
            up_since: None,
        }
    }

    pub const fn published(&self) -> NetworkState {
        self.published
    }

    /// Feed a raw observation; returns a state to publish immediately.
    pub fn observe(&mut self, connectivity: Connectivity, now: Instant) -> Option<NetworkState> {
        if connectivity.is_up() {
            if self.up_since.is_none() {
                self.up_since = Some(now);
            }
            if self.quiet_period.is_zero() {
                return self.poll(now);
            }
            None
        } else {
            self.up_since = None;
            self.transition(NetworkState::Offline)
        }
    }

    /// When the pending "online" transition becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.published, self.up_since) {
            (NetworkState::Offline, Some(since)) => Some(since + self.quiet_period),
            _ => None,
        }
    }

    /// Publish "online" once the link has been stable for the quiet period.
    pub fn poll(&mut self, now: Instant) -> Option<NetworkState> {
        match self.deadline() {
            Some(due) if now >= due => self.transition(NetworkState::Online),
            _ => None,
        }
    }

    fn transition(&mut self, next: NetworkState) -> Option<NetworkState> {
        if self.published == next {
            None
        } else {
            self.published = next;
            Some(next)
        }
    }
}

/// Publishes debounced connectivity to any number of subscribers.
#[derive(Clone)]
pub struct NetworkMonitor {
    raw_tx: Arc<watch::Sender<Connectivity>>,
    state_tx: Arc<watch::Sender<NetworkState>>,
    online: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl NetworkMonitor {
    /// Start a monitor; must be called inside a Tokio runtime.
    pub fn spawn(quiet_period: Duration) -> Self {
        let (raw_tx, raw_rx) = watch::channel(Connectivity::OFFLINE);
        let (state_tx, _) = watch::channel(NetworkState::Offline);
        let monitor = Self {
            raw_tx: Arc::new(raw_tx),
            state_tx: Arc::new(state_tx),
            online: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        };

        tokio::spawn(debounce_loop(
            Debouncer::new(quiet_period),
            raw_rx,
            monitor.state_tx.clone(),
            monitor.online.clone(),
            monitor.shutdown.clone(),
        ));
        monitor
    }

    /// Report a raw platform observation.
    pub fn report(&self, connectivity: Connectivity) {
        self.raw_tx.send_replace(connectivity);
    }

    /// Latest raw observation, undebounced.
    pub fn connectivity(&self) -> Connectivity {
        *self.raw_tx.borrow()
    }

    /// Debounced state; safe to call from any thread.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn state(&self) -> NetworkState {
        if self.is_online() {
            NetworkState::Online
        } else {
            NetworkState::Offline
        }
    }

    /// Stream of debounced transitions.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }

    /// Stop the debounce task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn debounce_loop(
    mut debouncer: Debouncer,
    mut raw_rx: watch::Receiver<Connectivity>,
    state_tx: Arc<watch::Sender<NetworkState>>,
    online: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let publish = |state: NetworkState| {
        online.store(state == NetworkState::Online, Ordering::Release);
        state_tx.send_replace(state);
        tracing::info!(?state, "network state changed");
    };

    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = raw_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let connectivity = *raw_rx.borrow_and_update();
                tracing::debug!(?connectivity, "raw connectivity observed");
                if let Some(state) = debouncer.observe(connectivity, Instant::now()) {
                    publish(state);
                }
            }
            () = sleep_until_opt(deadline) => {
                if let Some(state) = debouncer.poll(Instant::now()) {
                    publish(state);
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(3);

    #[test]
    fn offline_is_published_immediately() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(QUIET);
        debouncer.observe(Connectivity::online(ConnectionKind::Wifi), start);
        debouncer.poll(start + QUIET);
        assert_eq!(debouncer.published(), NetworkState::Online);

        assert_eq!(
            debouncer.observe(Connectivity::OFFLINE, start + QUIET),
            Some(NetworkState::Offline)
        );
    }

    #[test]
    fn online_waits_for_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(QUIET);

        assert_eq!(
            debouncer.observe(Connectivity::online(ConnectionKind::Cellular), start),
            None
        );
        assert_eq!(debouncer.poll(start + QUIET / 2), None);
        assert_eq!(debouncer.poll(start + QUIET), Some(NetworkState::Online));
        assert_eq!(debouncer.poll(start + QUIET * 2), None);
    }

    #[test]
    fn flapping_restarts_the_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(QUIET);

        debouncer.observe(Connectivity::online(ConnectionKind::Wifi), start);
        debouncer.observe(Connectivity::OFFLINE, start + Duration::from_secs(2));
        debouncer.observe(
            Connectivity::online(ConnectionKind::Wifi),
            start + Duration::from_secs(2),
        );

        assert_eq!(debouncer.poll(start + QUIET), None);
        assert_eq!(
            debouncer.poll(start + Duration::from_secs(5)),
            Some(NetworkState::Online)
        );
    }

    #[test]
    fn unreachable_link_counts_as_offline() {
        let link = Connectivity {
            kind: ConnectionKind::Wifi,
            reachable: false,
        };
        assert!(!link.is_up());
        assert!(!Connectivity::OFFLINE.is_up());
    }

    #[test]
    fn zero_quiet_period_publishes_at_once() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        assert_eq!(
            debouncer.observe(Connectivity::online(ConnectionKind::Ethernet), Instant::now()),
            Some(NetworkState::Online)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_debounced_transitions() {
        let monitor = NetworkMonitor::spawn(QUIET);
        let mut states = monitor.subscribe();
        assert!(!monitor.is_online());

        monitor.report(Connectivity::online(ConnectionKind::Wifi));
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), NetworkState::Online);
        assert!(monitor.is_online());

        monitor.report(Connectivity::OFFLINE);
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), NetworkState::Offline);
        assert_eq!(monitor.state(), NetworkState::Offline);

        monitor.shutdown();
    }
}
