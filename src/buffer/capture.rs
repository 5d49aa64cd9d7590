//! Capture ring buffer (C5)
//!
//! A fixed-size byte array addressed by wall-clock time rather than by
//! sample index. Writes overwrite the oldest data on wrap; reads block the
//! caller (via polling, cancellable) until the requested window's end time
//! has actually passed, because detection-event capture uses a fixed
//! post-roll after the trigger.

use crate::error::{IngestError, Result};
use crate::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const ALIGNMENT: usize = 2048;
const MAX_SIZE: usize = 1 << 30; // 1 GiB
const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn align_up(n: usize, alignment: usize) -> usize {
    n.div_ceil(alignment) * alignment
}

/// One source's rolling capture buffer.
pub struct CaptureRing {
    source_id: String,
    data: Vec<u8>,
    size: usize,
    write_index: usize,
    sample_rate: u32,
    bytes_per_sample: usize,
    buffer_duration: f64,
    start_time: f64,
    initialized: bool,
    validation_errors: u64,
    bytes_written: u64,
}

impl CaptureRing {
    fn new(source_id: &str, duration: f64, sample_rate: u32, bytes_per_sample: usize) -> Result<Self> {
        if duration <= 0.0 {
            return Err(IngestError::Validation("capture duration must be > 0".into()));
        }
        if sample_rate == 0 {
            return Err(IngestError::Validation("capture sample_rate must be > 0".into()));
        }
        if bytes_per_sample == 0 {
            return Err(IngestError::Validation("capture bytes_per_sample must be > 0".into()));
        }
        if source_id.is_empty() {
            return Err(IngestError::Validation("capture source_id must not be empty".into()));
        }
        let raw_size = (duration * sample_rate as f64 * bytes_per_sample as f64).ceil() as usize;
        let size = align_up(raw_size.max(1), ALIGNMENT);
        if size > MAX_SIZE {
            return Err(IngestError::Validation(format!(
                "capture buffer size {size} exceeds the 1 GiB limit"
            )));
        }
        Ok(Self {
            source_id: source_id.to_string(),
            data: vec![0u8; size],
            size,
            write_index: 0,
            sample_rate,
            bytes_per_sample,
            buffer_duration: duration,
            start_time: 0.0,
            initialized: false,
            validation_errors: 0,
            bytes_written: 0,
        })
    }

    fn write(&mut self, bytes: &[u8], rate_limiter: &RateLimiter) {
        if bytes.is_empty() {
            return;
        }
        if bytes.len() % self.bytes_per_sample != 0 {
            self.validation_errors += 1;
            if rate_limiter.should_log(&format!("capture_misaligned:{}", self.source_id), Duration::from_secs(10)) {
                warn!(
                    source_id = %self.source_id,
                    len = bytes.len(),
                    bytes_per_sample = self.bytes_per_sample,
                    "misaligned capture write"
                );
            }
        }
        if !self.initialized {
            self.start_time = now_secs();
            self.initialized = true;
        }

        let prev_write_index = self.write_index;
        self.write_wrapped(bytes);
        self.bytes_written += bytes.len() as u64;

        if self.write_index <= prev_write_index {
            self.start_time = now_secs() - self.buffer_duration;
            debug!(source_id = %self.source_id, "capture ring wrapped");
        }
    }

    fn write_wrapped(&mut self, bytes: &[u8]) {
        let mut idx = self.write_index;
        let mut offset = 0usize;
        let mut remaining = bytes.len();
        while remaining > 0 {
            let take = remaining.min(self.size - idx);
            self.data[idx..idx + take].copy_from_slice(&bytes[offset..offset + take]);
            idx = (idx + take) % self.size;
            offset += take;
            remaining -= take;
        }
        self.write_index = idx;
    }

    fn read_wrapped(&self, start_index: usize, length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(length);
        let mut idx = start_index % self.size;
        let mut remaining = length;
        while remaining > 0 {
            let take = remaining.min(self.size - idx);
            out.extend_from_slice(&self.data[idx..idx + take]);
            idx = (idx + take) % self.size;
            remaining -= take;
        }
        out
    }

    fn byte_offset(&self, offset_seconds: f64) -> i64 {
        offset_seconds.floor() as i64 * self.sample_rate as i64 * self.bytes_per_sample as i64
    }

    pub fn utilization(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.bytes_written.min(self.size as u64) as f64 / self.size as f64
        }
    }

    pub fn validation_errors(&self) -> u64 {
        self.validation_errors
    }
}

/// Registry of per-source capture rings.
pub struct CaptureRegistry {
    rings: RwLock<HashMap<String, Arc<Mutex<CaptureRing>>>>,
    rate_limiter: Arc<RateLimiter>,
    duration: f64,
    sample_rate: u32,
    bytes_per_sample: usize,
}

impl CaptureRegistry {
    pub fn new(duration: f64, sample_rate: u32, bytes_per_sample: usize) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            rate_limiter: Arc::new(RateLimiter::new()),
            duration,
            sample_rate,
            bytes_per_sample,
        }
    }

    pub async fn register(&self, source_id: &str) -> Result<()> {
        let mut rings = self.rings.write().await;
        if rings.contains_key(source_id) {
            return Err(IngestError::resource_already_exists("capture buffer", source_id));
        }
        let ring = CaptureRing::new(source_id, self.duration, self.sample_rate, self.bytes_per_sample)?;
        rings.insert(source_id.to_string(), Arc::new(Mutex::new(ring)));
        debug!(source_id, "registered capture buffer");
        Ok(())
    }

    pub async fn remove(&self, source_id: &str) -> Result<()> {
        let mut rings = self.rings.write().await;
        rings
            .remove(source_id)
            .map(|_| ())
            .ok_or_else(|| IngestError::resource_missing("capture buffer", source_id))
    }

    pub async fn has_capture_buffer(&self, source_id: &str) -> bool {
        self.rings.read().await.contains_key(source_id)
    }

    async fn entry(&self, source_id: &str) -> Result<Arc<Mutex<CaptureRing>>> {
        let rings = self.rings.read().await;
        rings
            .get(source_id)
            .cloned()
            .ok_or_else(|| IngestError::resource_missing("capture buffer", source_id))
    }

    pub async fn write(&self, source_id: &str, bytes: &[u8]) -> Result<()> {
        let ring = self.entry(source_id).await?;
        ring.lock().await.write(bytes, &self.rate_limiter);
        Ok(())
    }

    /// Read a `duration_seconds`-long segment starting at `requested_start`
    /// (seconds since the Unix epoch). Blocks (via polling sleep, checked
    /// against `cancel`) until wall-clock time passes `requested_start +
    /// duration_seconds`.
    pub async fn read_segment(
        &self,
        source_id: &str,
        requested_start: f64,
        duration_seconds: f64,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        let ring = self.entry(source_id).await?;
        let requested_end = requested_start + duration_seconds;

        loop {
            {
                let guard = ring.lock().await;
                let start_offset = requested_start - guard.start_time;
                let end_offset = requested_end - guard.start_time;

                if end_offset <= 0.0 || end_offset <= start_offset {
                    return Err(IngestError::TimestampOutOfRange(
                        "requested times outside current timeframe".into(),
                    ));
                }
                if start_offset < 0.0 && -start_offset > guard.buffer_duration {
                    return Err(IngestError::TimestampOutOfRange(
                        "requested times outside current timeframe".into(),
                    ));
                }

                let now = now_secs();
                if now > requested_end {
                    let raw_start = guard.byte_offset(start_offset);
                    let raw_end = guard.byte_offset(end_offset);
                    let length = (raw_end - raw_start).max(0) as usize;
                    let start_index = raw_start.rem_euclid(guard.size as i64) as usize;
                    return Ok(guard.read_wrapped(start_index, length));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                _ = cancel.cancelled() => {
                    return Err(IngestError::TimestampOutOfRange(
                        "capture read cancelled before requested window elapsed".into(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_validates_duration() {
        let reg = CaptureRegistry::new(0.0, 48_000, 2);
        assert!(reg.register("s").await.is_err());
    }

    #[tokio::test]
    async fn register_rejects_duplicate() {
        let reg = CaptureRegistry::new(60.0, 48_000, 2);
        reg.register("rtsp://a").await.unwrap();
        assert!(reg.register("rtsp://a").await.is_err());
    }

    #[tokio::test]
    async fn has_capture_buffer_reflects_registration() {
        let reg = CaptureRegistry::new(60.0, 48_000, 2);
        assert!(!reg.has_capture_buffer("s").await);
        reg.register("s").await.unwrap();
        assert!(reg.has_capture_buffer("s").await);
    }

    #[tokio::test]
    async fn misaligned_write_increments_counter_without_panicking() {
        let reg = CaptureRegistry::new(60.0, 48_000, 2);
        reg.register("s").await.unwrap();
        reg.write("s", &[1u8, 2, 3]).await.unwrap(); // 3 bytes, not a multiple of 2
        let ring = reg.entry("s").await.unwrap();
        assert_eq!(ring.lock().await.validation_errors(), 1);
    }

    #[tokio::test]
    async fn read_segment_rejects_window_fully_in_the_future() {
        let reg = CaptureRegistry::new(60.0, 48_000, 2);
        reg.register("s").await.unwrap();
        reg.write("s", &[0u8; 4]).await.unwrap();
        let far_future = now_secs() + 1000.0;
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            reg.read_segment("s", far_future, 2.0, CancellationToken::new()),
        )
        .await;
        // Should still be waiting (timed out), not have returned an error immediately.
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn read_segment_cancels_promptly() {
        let reg = CaptureRegistry::new(60.0, 48_000, 2);
        reg.register("s").await.unwrap();
        reg.write("s", &[0u8; 4]).await.unwrap();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let far_future = now_secs() + 1000.0;
        let result = reg.read_segment("s", far_future, 2.0, cancel).await;
        assert!(result.is_err());
    }
}
