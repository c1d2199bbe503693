//! Fire-and-forget analytics sink.
//!
//! Trackers are fed from `AnalyticsEventHandler` on its own task, so a slow
//! or failing sink never holds up an upload.

use crate::logging::{log_with_details, LogLevel};
use std::sync::Mutex;

pub trait Tracker: Send + Sync {
    fn track(&self, name: &str, payload: serde_json::Value);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn track(&self, _name: &str, _payload: serde_json::Value) {}
}

/// Writes each event to the `analytics` component log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracker;

impl Tracker for LogTracker {
    fn track(&self, name: &str, payload: serde_json::Value) {
        log_with_details("analytics", LogLevel::Info, name, payload).unwrap_or_default();
    }
}

/// Keeps tracked events in memory
#[derive(Debug, Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }
}

impl Tracker for RecordingTracker {
    fn track(&self, name: &str, payload: serde_json::Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push((name.to_string(), payload));
        }
    }
}
