//! Time-windowed motion history. Holds the trailing few hundred milliseconds
//! of frame-diff samples; cleared whenever a gesture is dispatched so one
//! physical wave cannot trigger twice.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One frame-diff observation, classified by screen half.
#[derive(Debug, Clone, Copy)]
pub struct MotionSample {
    pub left: u64,
    pub right: u64,
    pub total: u64,
    pub at: Instant,
}

/// Aggregate directional signal over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionSignal {
    LeftDominant,
    RightDominant,
}

impl std::fmt::Display for MotionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MotionSignal::LeftDominant => write!(f, "left_dominant"),
            MotionSignal::RightDominant => write!(f, "right_dominant"),
        }
    }
}

/// Ring of recent samples, evicted by age rather than count.
pub struct MotionHistory {
    window: Duration,
    samples: VecDeque<MotionSample>,
}

impl MotionHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Insert a sample and evict everything older than the window
    /// relative to the new sample's timestamp.
    pub fn push(&mut self, sample: MotionSample) {
        let cutoff = sample.at;
        self.samples.push_back(sample);
        self.evict(cutoff);
    }

    /// Drop samples that fall outside the trailing window ending at `now`.
    pub fn evict(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Discard all samples (called after a gesture dispatch).
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Classify the windowed motion. Emits a signal only when the summed
    /// activity clears `min_activity`, and one half outweighs the other by
    /// `dominance_ratio`. Anything else is unclear and yields nothing.
    pub fn classify(&self, min_activity: u64, dominance_ratio: f64) -> Option<MotionSignal> {
        let (mut left, mut right, mut total) = (0u64, 0u64, 0u64);
        for s in &self.samples {
            left += s.left;
            right += s.right;
            total += s.total;
        }
        if total < min_activity {
            return None;
        }
        if left as f64 >= right as f64 * dominance_ratio {
            Some(MotionSignal::LeftDominant)
        } else if right as f64 >= left as f64 * dominance_ratio {
            Some(MotionSignal::RightDominant)
        } else {
            None
        }
    }
}
