//! Rate-limited logging primitive
//!
//! The source system this crate replaces logged misaligned capture-buffer
//! writes only when wall-clock seconds modulo ten happened to line up, which
//! silently drops most occurrences. This module is the proper replacement:
//! "emit at most one message per `period` per key."

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tracks the last time each key was allowed to log.
pub struct RateLimiter {
    last_logged: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { last_logged: Mutex::new(HashMap::new()) }
    }

    /// Returns true if the caller should log now for `key`, and records the
    /// attempt so subsequent calls within `period` return false.
    pub fn should_log(&self, key: &str, period: Duration) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock().unwrap();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < period => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_first_call_and_suppresses_immediate_repeat() {
        let rl = RateLimiter::new();
        assert!(rl.should_log("a", Duration::from_millis(50)));
        assert!(!rl.should_log("a", Duration::from_millis(50)));
    }

    #[test]
    fn keys_are_independent() {
        let rl = RateLimiter::new();
        assert!(rl.should_log("a", Duration::from_secs(60)));
        assert!(rl.should_log("b", Duration::from_secs(60)));
    }

    #[test]
    fn allows_again_after_period_elapses() {
        let rl = RateLimiter::new();
        assert!(rl.should_log("a", Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(rl.should_log("a", Duration::from_millis(10)));
    }
}
