//! Detection latency tracking with percentile statistics.
//!
//! [`LatencyTracker`] keeps a sliding window of recent detection durations
//! and computes P50/P95/P99 on demand.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Default number of samples to retain in the sliding window.
pub const DEFAULT_WINDOW: usize = 1000;

/// Summary statistics for detection latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    /// Number of detections in the window.
    pub count: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}

/// Thread-safe sliding window of detection durations.
pub struct LatencyTracker {
    window: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl LatencyTracker {
    /// Create a tracker that retains at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Record one detection duration, evicting the oldest sample when full.
    pub fn record(&self, duration: Duration) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if window.len() >= self.capacity {
            window.pop_front();
        }
        window.push_back(duration);
    }

    /// Percentile statistics over the window, or `None` before the first sample.
    #[must_use]
    pub fn stats(&self) -> Option<LatencyStats> {
        let mut sorted: Vec<Duration> = {
            let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
            window.iter().copied().collect()
        };
        if sorted.is_empty() {
            return None;
        }
        sorted.sort();

        let count = sorted.len();
        let total: Duration = sorted.iter().sum();

        Some(LatencyStats {
            count,
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
            min: sorted[0],
            max: sorted[count - 1],
            mean: total / count as u32,
        })
    }

    /// Number of samples currently in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Value at `pct` from a non-empty sorted slice, rounding the rank.
fn nearest_rank(sorted: &[Duration], pct: f64) -> Duration {
    let idx = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
