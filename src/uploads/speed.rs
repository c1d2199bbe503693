//! Smoothed transfer speed per item.
//!
//! Samples live in a map keyed by item id, parallel to the item collection.

use super::types::{SPEED_SAMPLE_INTERVAL_SECS, SPEED_SMOOTHING_FACTOR};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedEstimate {
    pub bytes_per_second: f64,
    pub seconds_remaining: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct SpeedSample {
    last_loaded: u64,
    last_time: Instant,
    speed: Option<f64>,
}

#[derive(Debug, Default)]
pub struct SpeedTracker {
    samples: HashMap<String, SpeedSample>,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a progress tick. Returns the current smoothed estimate, or `None`
    /// until the first full sample interval has elapsed.
    pub fn record(&mut self, id: &str, loaded: u64, total: u64, now: Instant) -> Option<SpeedEstimate> {
        if !self.samples.contains_key(id) {
            self.samples.insert(
                id.to_string(),
                SpeedSample {
                    last_loaded: loaded,
                    last_time: now,
                    speed: None,
                },
            );
            return None;
        }
        let sample = self.samples.get_mut(id)?;

        let elapsed = now.saturating_duration_since(sample.last_time).as_secs_f64();
        if elapsed >= SPEED_SAMPLE_INTERVAL_SECS {
            let instant = loaded.saturating_sub(sample.last_loaded) as f64 / elapsed;
            let smoothed = match sample.speed {
                Some(prev) => SPEED_SMOOTHING_FACTOR * instant + (1.0 - SPEED_SMOOTHING_FACTOR) * prev,
                None => instant,
            };
            sample.speed = Some(smoothed);
            sample.last_loaded = loaded;
            sample.last_time = now;
        }

        sample.speed.map(|speed| SpeedEstimate {
            bytes_per_second: speed,
            seconds_remaining: if speed > 0.0 {
                Some(total.saturating_sub(loaded) as f64 / speed)
            } else {
                None
            },
        })
    }

    /// Forget an item's samples (new attempt, cancel, removal)
    pub fn reset(&mut self, id: &str) {
        self.samples.remove(id);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
