//! Size-validated object pools (C1, C2)
//!
//! Eliminates per-chunk allocations on the decoder hot path. A pool only ever
//! holds buffers of exactly its configured element size; anything else handed
//! back to `put` is discarded rather than corrupting the pool.

pub mod byte_pool;
pub mod float_pool;

pub use byte_pool::BytePool;
pub use float_pool::FloatPool;

/// Pool statistics, derived from atomic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub discarded: u64,
}
