//! Connectivity monitor.
//!
//! Owns the committed [`ConnectivityState`] and broadcasts a [`Transition`]
//! once per genuine change. Samples come from a [`ConnectivityProbe`] or from
//! platform callbacks via [`ConnectivityMonitor::observe`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use tableside_core::ConnectivityState;

use crate::task::TaskHandle;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("connectivity signal unavailable: {0}")]
    Unavailable(String),
}

/// Point-in-time reachability check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn fetch_now(&self) -> Result<bool, ProbeError>;
}

/// A committed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
}

impl Transition {
    pub fn online(&self) -> bool {
        self.to.is_online()
    }

    /// Whether this transition should trigger a queue drain.
    pub fn is_reconnect(&self) -> bool {
        self.from.reconnects_to(self.to)
    }
}

const TRANSITION_CAPACITY: usize = 64;

pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    state: Mutex<ConnectivityState>,
    transitions: broadcast::Sender<Transition>,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            probe,
            state: Mutex::new(ConnectivityState::Unknown),
            transitions,
        }
    }

    /// Last committed state.
    pub fn state(&self) -> ConnectivityState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Probe now and commit the result.
    pub async fn is_online(&self) -> bool {
        let online = self.sample().await;
        self.observe(online);
        online
    }

    /// Probe without committing. Probe errors read as offline.
    pub async fn sample(&self) -> bool {
        match self.probe.fetch_now().await {
            Ok(online) => {
                tracing::debug!(online, "connectivity sample");
                online
            }
            Err(err) => {
                tracing::debug!(error = %err, "connectivity probe failed; treating as offline");
                false
            }
        }
    }

    /// Commit an externally delivered signal. Returns whether the state changed.
    pub fn observe(&self, online: bool) -> bool {
        let next = ConnectivityState::from_online(online);

        let transition = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *state == next {
                return false;
            }
            let transition = Transition { from: *state, to: next };
            *state = next;
            transition
        };

        tracing::info!(from = ?transition.from, to = ?transition.to, "connectivity changed");
        // No receivers is fine.
        let _ = self.transitions.send(transition);
        true
    }

    /// Receive every transition committed after this call.
    pub fn changes(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Sample the probe every `interval` until the handle is shut down.
    ///
    /// A sample that disagrees with the committed state is committed only if
    /// a second sample `debounce` later agrees. The first sample after start
    /// (state still `Unknown`) is committed directly.
    pub fn spawn_polling(self: &Arc<Self>, interval: Duration, debounce: Duration) -> MonitorHandle {
        let monitor = Arc::clone(self);

        TaskHandle::spawn("connectivity-polling", move |stop| async move {
            tracing::info!(?interval, ?debounce, "connectivity polling started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        let online = monitor.sample().await;
                        let current = monitor.state();
                        if current == ConnectivityState::from_online(online) {
                            continue;
                        }

                        if current != ConnectivityState::Unknown && !debounce.is_zero() {
                            tokio::select! {
                                _ = stop.notified() => break,
                                _ = tokio::time::sleep(debounce) => {}
                            }
                            if monitor.sample().await != online {
                                tracing::debug!(online, "connectivity flap suppressed");
                                continue;
                            }
                        }

                        monitor.observe(online);
                    }
                }
            }

            tracing::info!("connectivity polling stopped");
        })
    }
}

/// Owner of the polling task; see [`TaskHandle`].
pub type MonitorHandle = TaskHandle;
