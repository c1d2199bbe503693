//! Online/offline signal sources.
//!
//! The upload manager only sees a `watch::Receiver<NetworkState>`, so the
//! retry-on-reconnect logic runs the same against a real health check or a manual
//! switch.

use crate::logging::log_debug;
use crate::shutdown::ShutdownCoordinator;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

pub trait NetworkObserver: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<NetworkState>;
}

/// State set explicitly by the host
#[derive(Debug)]
pub struct ManualNetworkObserver {
    tx: watch::Sender<NetworkState>,
}

impl ManualNetworkObserver {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, state: NetworkState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }
}

impl Default for ManualNetworkObserver {
    fn default() -> Self {
        Self::new(NetworkState::Online)
    }
}

impl NetworkObserver for ManualNetworkObserver {
    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

/// Checks the backend's health endpoint at a fixed interval. Any HTTP response counts as online,
/// a connection failure or timeout as offline. Checking stops when
/// the observer is dropped.
#[derive(Debug)]
pub struct PollingNetworkObserver {
    tx: watch::Sender<NetworkState>,
    checker: JoinHandle<()>,
}

impl PollingNetworkObserver {
    pub fn spawn(server_url: &str, interval: Duration, shutdown: ShutdownCoordinator) -> Self {
        let (tx, _) = watch::channel(NetworkState::Online);
        let check_tx = tx.clone();
        let url = format!("{}/api/health", server_url.trim_end_matches('/'));

        let checker = tokio::spawn(async move {
            let mut shutdown_signal = shutdown.signal();
            let client = match reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
            {
                Ok(client) => client,
                Err(e) => {
                    log_debug("network", &format!("Health check client unavailable: {}", e))
                        .unwrap_or_default();
                    return;
                }
            };
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let state = match client.head(&url).send().await {
                            Ok(_) => NetworkState::Online,
                            Err(_) => NetworkState::Offline,
                        };
                        check_tx.send_if_modified(|current| {
                            if *current == state {
                                false
                            } else {
                                *current = state;
                                true
                            }
                        });
                    }
                    _ = shutdown_signal.triggered() => break,
                }
            }
        });

        Self { tx, checker }
    }
}

impl Drop for PollingNetworkObserver {
    fn drop(&mut self) {
        self.checker.abort();
    }
}

impl NetworkObserver for PollingNetworkObserver {
    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}
