//! Float buffer pool (C2)
//!
//! Identical contract to [`BytePool`](crate::pool::byte_pool::BytePool) but
//! over `f32` elements, used for the PCM-to-float conversion output in
//! [`crate::pcm`].

use crate::error::{IngestError, Result};
use crate::pool::PoolStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct FloatPool {
    element_size: usize,
    free: Mutex<Vec<Vec<f32>>>,
    gets: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
}

impl FloatPool {
    pub fn new(element_size: usize) -> Result<Self> {
        if element_size == 0 {
            return Err(IngestError::Validation(
                "float pool element_size must be > 0".into(),
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

    pub fn get(&self) -> Vec<f32> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock().unwrap();
        if let Some(buf) = free.pop() {
            buf
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            vec![0.0f32; self.element_size]
        }
    }

    pub fn put(&self, buf: Vec<f32>) {
        if buf.is_empty() || buf.len() != self.element_size {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.free.lock().unwrap().push(buf);
    }

    pub fn stats(&self) -> PoolStats {
        let gets = self.gets.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        PoolStats {
            hits: gets.saturating_sub(misses),
            misses,
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.free.lock().unwrap().clear();
    }
}
