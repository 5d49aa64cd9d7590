//! Wall-clock helpers shared by the buffer and sound-level modules.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as a float. Falls back to 0.0 if the
/// system clock is set before the epoch.
pub fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
