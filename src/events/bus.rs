use super::types::{EventSequence, UploadEvent, UploadEventPayload};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<UploadEvent>;

/// Progress ticks dominate the stream; a slow subscriber lags rather than
/// blocking uploads.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out of session events, numbered in publish order
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<UploadEvent>,
    last_sequence: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            last_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishing with nobody listening is fine
    pub fn publish(&self, payload: UploadEventPayload) -> EventSequence {
        let sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.sender.send(UploadEvent {
            sequence,
            timestamp: Utc::now(),
            payload,
        });
        sequence
    }

    /// Only events published after this call are received
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// 0 before anything was published
    pub fn last_sequence(&self) -> EventSequence {
        self.last_sequence.load(Ordering::SeqCst)
    }
}
