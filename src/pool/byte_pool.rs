//! Byte buffer pool (C1)

use crate::error::{IngestError, Result};
use crate::pool::PoolStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::trace;

/// Reusable pool of byte buffers, all of a single fixed element size.
///
/// Safe under concurrent `get`/`put`: the free-list is guarded by a mutex and
/// the statistics are atomics so `stats()` never blocks a hot-path caller.
pub struct BytePool {
    element_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
    gets: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
}

impl BytePool {
    /// Create a pool of buffers sized `element_size`.
    ///
    /// # Errors
    /// Returns `Validation` if `element_size == 0`.
    pub fn new(element_size: usize) -> Result<Self> {
        if element_size == 0 {
            return Err(IngestError::Validation(
                "byte pool element_size must be > 0".into(),
            ));
        }
        Ok(Self {
            element_size,
            free: Mutex::new(Vec::new()),
            gets: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        })
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Acquire a buffer of exactly `element_size` bytes.
    pub fn get(&self) -> Vec<u8> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock().unwrap();
        if let Some(buf) = free.pop() {
            buf
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.element_size]
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers that are empty or whose length does not match `element_size`
    /// are discarded (and counted) rather than returned to the free-list.
    pub fn put(&self, buf: Vec<u8>) {
        if buf.is_empty() || buf.len() != self.element_size {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(
                len = buf.len(),
                expected = self.element_size,
                "discarding mismatched buffer on put"
            );
            return;
        }
        self.free.lock().unwrap().push(buf);
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let gets = self.gets.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        PoolStats {
            hits: gets.saturating_sub(misses),
            misses,
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        self.free.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_element_size() {
        assert!(BytePool::new(0).is_err());
    }

    #[test]
    fn get_always_returns_configured_length() {
        let pool = BytePool::new(128).unwrap();
        for _ in 0..5 {
            let buf = pool.get();
            assert_eq!(buf.len(), 128);
            pool.put(buf);
        }
        let stats = pool.stats();
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn put_discards_mismatched_buffers() {
        let pool = BytePool::new(64).unwrap();
        pool.put(vec![0u8; 32]);
        pool.put(Vec::new());
        assert_eq!(pool.stats().discarded, 2);
        // Discarding does not affect subsequent gets.
        let buf = pool.get();
        assert_eq!(buf.len(), 64);
    }

    #[test]
    fn clear_drops_pooled_buffers_forcing_misses() {
        let pool = BytePool::new(16).unwrap();
        pool.put(pool.get());
        pool.clear();
        let stats_before = pool.stats();
        let _ = pool.get();
        let stats_after = pool.stats();
        assert_eq!(stats_after.misses, stats_before.misses + 1);
    }
}
