//! Sliding-window bytes/sec calculator used by supervisor health snapshots.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(10);

/// Tracks `(timestamp, byte_count)` samples over a trailing window and
/// reports an averaged throughput.
pub struct DataRateCalculator {
    samples: VecDeque<(Instant, u64)>,
    total_in_window: u64,
}

impl DataRateCalculator {
    pub fn new() -> Self {
        Self { samples: VecDeque::new(), total_in_window: 0 }
    }

    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));
        self.total_in_window += bytes;
        self.evict_stale(now);
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(&(ts, n)) = self.samples.front() {
            if now.duration_since(ts) > WINDOW {
                self.total_in_window -= n;
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn bytes_per_sec(&mut self, now: Instant) -> f64 {
        self.evict_stale(now);
        let Some(&(oldest, _)) = self.samples.front() else {
            return 0.0;
        };
        let span = now.duration_since(oldest).as_secs_f64().max(1.0);
        self.total_in_window as f64 / span
    }
}

impl Default for DataRateCalculator {
    fn default() -> Self {
        Self::new()
    }
}
