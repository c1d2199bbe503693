use super::{EventBus, UploadEvent, UploadEventPayload};
use crate::analytics::Tracker;
use crate::logging::{log_error, log_info};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const ANALYTICS_EVENT_PREFIX: &str = "media_upload_";

/// Handler that forwards session events to an analytics `Tracker`
pub struct AnalyticsEventHandler {
    event_bus: EventBus,
    tracker: Arc<dyn Tracker>,
    shutdown: ShutdownCoordinator,
}

impl AnalyticsEventHandler {
    pub fn new(
        event_bus: EventBus,
        tracker: Arc<dyn Tracker>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            event_bus,
            tracker,
            shutdown,
        }
    }

    /// Spawn the forwarding loop; it runs until shutdown or the bus closes
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        // Subscribe before spawning so nothing published after start() is missed
        let mut rx = self.event_bus.subscribe();
        let mut shutdown_signal = self.shutdown.signal();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => self.handle_event(&event),
                            Err(broadcast::error::RecvError::Closed) => {
                                log_info("events", "Analytics handler stopped (event bus closed)").unwrap_or_default();
                                break;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log_error("events", &format!("Analytics handler lagged {} events", n))
                                    .unwrap_or_default();
                            }
                        }
                    }
                    _ = shutdown_signal.triggered() => {
                        log_info("events", "Analytics handler gracefully shutting down").unwrap_or_default();
                        break;
                    }
                }
            }
        })
    }

    fn handle_event(&self, event: &UploadEvent) {
        // Progress ticks are too chatty for analytics
        if matches!(event.payload, UploadEventPayload::Progress { .. }) {
            return;
        }

        let payload = serde_json::to_value(&event.payload).unwrap_or(serde_json::Value::Null);
        self.tracker.track(
            &format!("{}{}", ANALYTICS_EVENT_PREFIX, event.payload_type()),
            payload,
        );
    }
}
