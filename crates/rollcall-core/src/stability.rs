//! Stability tracker — debounces the presence signal into a single counter.
//!
//! Presence adds one, absence takes two away. Losing stability is faster
//! than gaining it so a flickering signal never accumulates into a capture.

use crate::presence::PresenceSignal;

/// Default presence threshold on the 0–65025 variance scale.
pub const DEFAULT_PRESENCE_THRESHOLD: f32 = 500.0;

const PRESENCE_GAIN: u32 = 1;
const ABSENCE_DECAY: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityTracker {
    counter: u32,
    presence_threshold: f32,
}

impl StabilityTracker {
    pub fn new(presence_threshold: f32) -> Self {
        Self {
            counter: 0,
            presence_threshold,
        }
    }

    /// Fold one signal into the counter and return the new value.
    pub fn observe(&mut self, signal: PresenceSignal) -> u32 {
        if self.is_present(signal) {
            self.counter = self.counter.saturating_add(PRESENCE_GAIN);
        } else {
            self.counter = self.counter.saturating_sub(ABSENCE_DECAY);
        }
        self.counter
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Strictly above the presence threshold.
    pub fn is_present(&self, signal: PresenceSignal) -> bool {
        signal.value() > self.presence_threshold
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_THRESHOLD)
    }
}
