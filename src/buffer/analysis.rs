//! Analysis ring buffer + sliding-window chunker (C4)
//!
//! Per source, a fixed-capacity byte ring feeds a chunker that hands the ML
//! consumer fixed-size, overlapping windows of PCM. One writer (the decoder
//! read loop) and one reader (the inference driver) share the ring under a
//! per-source mutex; the registry itself is only ever locked for the short
//! duration of a map lookup.

use crate::error::{IngestError, Result};
use crate::pool::BytePool;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};

/// One source's analysis ring and sliding-window chunker state.
pub struct AnalysisRing {
    producer: HeapProd<u8>,
    consumer: HeapCons<u8>,
    chunk_size: usize,
    read_size: usize,
    carryover: Vec<u8>,
    dropped_bytes: u64,
}

impl AnalysisRing {
    /// `capacity` is the ring's byte capacity. `chunk_size` and `overlap_bytes`
    /// must satisfy `overlap_bytes < chunk_size` (so `read_size > 0`).
    fn new(capacity: usize, chunk_size: usize, overlap_bytes: usize) -> Result<Self> {
        if capacity == 0 || chunk_size == 0 {
            return Err(IngestError::Validation(
                "analysis ring capacity and chunk_size must be > 0".into(),
            ));
        }
        if overlap_bytes >= chunk_size {
            return Err(IngestError::Validation(
                "overlap must be smaller than chunk_size".into(),
            ));
        }
        let rb = HeapRb::<u8>::new(capacity);
        let (producer, consumer) = rb.split();
        Ok(Self {
            producer,
            consumer,
            chunk_size,
            read_size: chunk_size - overlap_bytes,
            carryover: Vec::with_capacity(chunk_size),
            dropped_bytes: 0,
        })
    }

    /// Append bytes to the ring. Non-blocking: if the ring is full, the
    /// excess is dropped and counted rather than overwriting the reader's
    /// in-flight data.
    fn write(&mut self, bytes: &[u8]) {
        let pushed = self.producer.push_slice(bytes);
        if pushed < bytes.len() {
            let dropped = (bytes.len() - pushed) as u64;
            self.dropped_bytes += dropped;
            trace!(dropped, "analysis ring full, dropping bytes");
        }
    }

    /// Sliding-window read: returns a `chunk_size`-byte window drawn from
    /// `pool`, or `None` if not enough data has accumulated yet.
    ///
    /// `carryover` always holds the trailing overlap of the previous chunk
    /// (empty before the first chunk), so the amount still needed to fill a
    /// full window is `chunk_size - carryover.len()`: `chunk_size` itself on
    /// the first call, `read_size` on every call after.
    fn read_chunk(&mut self, pool: &BytePool) -> Option<Vec<u8>> {
        let needed = self.chunk_size - self.carryover.len();
        if self.consumer.occupied_len() < needed {
            return None;
        }
        let mut just_read = vec![0u8; needed];
        let n = self.consumer.pop_slice(&mut just_read);
        debug_assert_eq!(n, needed);

        let mut full = std::mem::take(&mut self.carryover);
        full.extend_from_slice(&just_read);
        debug_assert_eq!(full.len(), self.chunk_size);

        let mut chunk = pool.get();
        chunk.copy_from_slice(&full);
        self.carryover = full[self.read_size..].to_vec();
        Some(chunk)
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }
}

/// Registry of per-source analysis rings.
///
/// `chunk_seconds` and `overlap_seconds` are applied uniformly to every
/// registered source at the configured `sample_rate`/`bytes_per_sample`.
pub struct AnalysisRegistry {
    rings: RwLock<HashMap<String, Arc<Mutex<AnalysisRing>>>>,
    ring_capacity: usize,
    chunk_size: usize,
    overlap_bytes: usize,
}

impl AnalysisRegistry {
    pub fn new(
        ring_capacity: usize,
        sample_rate: u32,
        bytes_per_sample: usize,
        chunk_seconds: f64,
        overlap_seconds: f64,
    ) -> Result<Self> {
        if !(0.0..2.0).contains(&overlap_seconds) {
            return Err(IngestError::Validation(
                "overlap_seconds must be in [0, 2)".into(),
            ));
        }
        let chunk_size = (chunk_seconds * sample_rate as f64) as usize * bytes_per_sample;
        let overlap_bytes = (overlap_seconds * sample_rate as f64) as usize * bytes_per_sample;
        Ok(Self {
            rings: RwLock::new(HashMap::new()),
            ring_capacity,
            chunk_size,
            overlap_bytes,
        })
    }

    pub fn register(&self, source_id: &str) -> Result<()> {
        let mut rings = self.rings.write().unwrap();
        if rings.contains_key(source_id) {
            return Err(IngestError::resource_already_exists("analysis ring", source_id));
        }
        let ring = AnalysisRing::new(self.ring_capacity, self.chunk_size, self.overlap_bytes)?;
        rings.insert(source_id.to_string(), Arc::new(Mutex::new(ring)));
        debug!(source_id, "registered analysis ring");
        Ok(())
    }

    pub fn remove(&self, source_id: &str) -> Result<()> {
        let mut rings = self.rings.write().unwrap();
        rings
            .remove(source_id)
            .map(|_| ())
            .ok_or_else(|| IngestError::resource_missing("analysis ring", source_id))
    }

    fn entry(&self, source_id: &str) -> Result<Arc<Mutex<AnalysisRing>>> {
        let rings = self.rings.read().unwrap();
        rings
            .get(source_id)
            .cloned()
            .ok_or_else(|| IngestError::resource_missing("analysis ring", source_id))
    }

    /// Append bytes for `source_id`. Errors are tolerated by the caller
    /// (the decoder read loop simply counts them); only `ResourceMissing`
    /// can be returned here.
    pub fn write(&self, source_id: &str, bytes: &[u8]) -> Result<()> {
        let ring = self.entry(source_id)?;
        ring.lock().unwrap().write(bytes);
        Ok(())
    }

    pub fn read_chunk(&self, source_id: &str, pool: &BytePool) -> Result<Option<Vec<u8>>> {
        let ring = self.entry(source_id)?;
        let result = ring.lock().unwrap().read_chunk(pool);
        Ok(result)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(sample_rate: u32, overlap_seconds: f64) -> AnalysisRegistry {
        AnalysisRegistry::new(10 * 1024 * 1024, sample_rate, 2, 3.0, overlap_seconds).unwrap()
    }

    #[test]
    fn register_rejects_duplicate_source() {
        let reg = registry(48_000, 0.0);
        reg.register("rtsp://a").unwrap();
        assert!(reg.register("rtsp://a").is_err());
    }

    #[test]
    fn read_chunk_on_unknown_source_is_resource_missing() {
        let reg = registry(48_000, 0.0);
        let pool = BytePool::new(reg.chunk_size()).unwrap();
        assert!(reg.read_chunk("nope", &pool).is_err());
    }

    #[test]
    fn chunker_warms_up_then_emits_overlapping_chunks() {
        // S1: 48kHz S16 mono, 3s chunks, 0.5s overlap.
        let sample_rate = 48_000u32;
        let reg = registry(sample_rate, 0.5);
        let pool = BytePool::new(reg.chunk_size()).unwrap();
        reg.register("rtsp://a").unwrap();

        // chunk_size = 3 * 48000 * 2 = 288_000 bytes.
        assert_eq!(reg.chunk_size(), 288_000);

        let first_block = vec![7u8; 432_000]; // 3s worth of bytes feeding in one go
        reg.write("rtsp://a", &first_block).unwrap();
        let chunk1 = reg.read_chunk("rtsp://a", &pool).unwrap();
        assert!(chunk1.is_some());
        let chunk1 = chunk1.unwrap();
        assert_eq!(chunk1.len(), 288_000);

        // No more data buffered beyond read_size, so a second immediate read
        // should return None until more bytes arrive.
        assert!(reg.read_chunk("rtsp://a", &pool).unwrap().is_none());

        // Feed 2.5s more (240_000 bytes) of a distinguishable value.
        let second_block = vec![9u8; 240_000];
        reg.write("rtsp://a", &second_block).unwrap();
        let chunk2 = reg.read_chunk("rtsp://a", &pool).unwrap().unwrap();
        assert_eq!(chunk2.len(), 288_000);

        // Overlap invariant: chunk2's first 48_000 bytes (0.5s) equal
        // chunk1's last 48_000 bytes.
        let overlap_bytes = 48_000;
        assert_eq!(
            &chunk1[chunk1.len() - overlap_bytes..],
            &chunk2[..overlap_bytes]
        );
    }

    #[test]
    fn zero_overlap_chunks_are_contiguous_non_overlapping() {
        let sample_rate = 8_000u32;
        let reg = registry(sample_rate, 0.0);
        let pool = BytePool::new(reg.chunk_size()).unwrap();
        reg.register("s").unwrap();

        let chunk_size = reg.chunk_size();
        let mut data = Vec::new();
        for i in 0..(chunk_size * 2) {
            data.push((i % 256) as u8);
        }
        reg.write("s", &data).unwrap();

        let chunk1 = reg.read_chunk("s", &pool).unwrap().unwrap();
        let chunk2 = reg.read_chunk("s", &pool).unwrap().unwrap();
        assert_eq!(chunk1, &data[..chunk_size]);
        assert_eq!(chunk2, &data[chunk_size..chunk_size * 2]);
    }
}
