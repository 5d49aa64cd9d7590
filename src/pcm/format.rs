//! Sample-format conversion routines.
//!
//! Each converter integer-divides the input length by its own
//! `bytes_per_sample`; leftover trailing bytes that don't form a whole sample
//! are silently dropped; callers must not rely on misaligned tails.

use crate::error::Result;
use crate::pool::BytePool;
use std::borrow::Cow;
use tracing::warn;

/// Source sample format accepted by [`to_s16le`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16,
    S24,
    S32,
    F32,
}

/// Convert `src` (in `src_format`) to S16LE.
///
/// For `SampleFormat::S16` the returned bytes borrow `src` directly (no copy,
/// `from_pool = false`). For every other format a buffer is drawn from `pool`
/// and `from_pool = true`; the caller returns it via `pool.put(...)` once done
/// (e.g. `if from_pool { pool.put(bytes.into_owned()) }`).
pub fn to_s16le<'a>(
    pool: &BytePool,
    src: &'a [u8],
    src_format: SampleFormat,
) -> Result<(Cow<'a, [u8]>, bool)> {
    match src_format {
        SampleFormat::S16 => Ok((Cow::Borrowed(src), false)),
        SampleFormat::U8 => {
            let samples = src.len();
            let mut out = pool.get();
            debug_assert_eq!(out.len(), samples * 2, "pool sized for U8 -> S16 conversion");
            out.resize(samples * 2, 0);
            for (i, &b) in src.iter().enumerate() {
                let s16 = ((b as i16) - 128) << 8;
                let bytes = s16.to_le_bytes();
                out[i * 2] = bytes[0];
                out[i * 2 + 1] = bytes[1];
            }
            Ok((Cow::Owned(out), true))
        }
        SampleFormat::S24 => {
            let n = src.len() / 3;
            if src.len() % 3 != 0 {
                warn!(leftover = src.len() % 3, "dropping misaligned S24 tail bytes");
            }
            let mut out = pool.get();
            out.resize(n * 2, 0);
            for i in 0..n {
                let base = i * 3;
                let raw = i32::from_le_bytes([src[base], src[base + 1], src[base + 2], 0]);
                // Sign-extend bit 23.
                let signed = (raw << 8) >> 8;
                let x = (signed + 0x80) >> 8;
                let s16 = clamp_i16(x);
                let bytes = s16.to_le_bytes();
                out[i * 2] = bytes[0];
                out[i * 2 + 1] = bytes[1];
            }
            Ok((Cow::Owned(out), true))
        }
        SampleFormat::S32 => {
            let n = src.len() / 4;
            if src.len() % 4 != 0 {
                warn!(leftover = src.len() % 4, "dropping misaligned S32 tail bytes");
            }
            let mut out = pool.get();
            out.resize(n * 2, 0);
            for i in 0..n {
                let base = i * 4;
                let raw = i32::from_le_bytes([src[base], src[base + 1], src[base + 2], src[base + 3]]);
                let x = (raw as i64 + 0x8000) >> 16;
                let s16 = clamp_i16(x);
                let bytes = s16.to_le_bytes();
                out[i * 2] = bytes[0];
                out[i * 2 + 1] = bytes[1];
            }
            Ok((Cow::Owned(out), true))
        }
        SampleFormat::F32 => {
            let n = src.len() / 4;
            if src.len() % 4 != 0 {
                warn!(leftover = src.len() % 4, "dropping misaligned F32 tail bytes");
            }
            let mut out = pool.get();
            out.resize(n * 2, 0);
            for i in 0..n {
                let base = i * 4;
                let sample = f32::from_le_bytes([src[base], src[base + 1], src[base + 2], src[base + 3]]);
                let scaled = (sample * 32767.0).round();
                let s16 = clamp_i16(scaled as i64);
                let bytes = s16.to_le_bytes();
                out[i * 2] = bytes[0];
                out[i * 2 + 1] = bytes[1];
            }
            Ok((Cow::Owned(out), true))
        }
    }
}

fn clamp_i16(x: impl Into<i64>) -> i16 {
    let x = x.into();
    x.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Convert S16LE bytes to normalized `f32` in `[-1.0, 1.0)`.
///
/// Uses `float_pool` when the output length equals the pool's configured
/// element size; otherwise allocates a plain `Vec`.
pub fn s16le_to_f32(src: &[u8], float_pool: Option<&crate::pool::FloatPool>) -> Vec<f32> {
    let n = src.len() / 2;
    let mut out = match float_pool {
        Some(pool) if pool.element_size() == n => {
            let mut buf = pool.get();
            buf.truncate(n);
            buf
        }
        _ => vec![0.0f32; n],
    };
    for i in 0..n {
        let sample = i16::from_le_bytes([src[i * 2], src[i * 2 + 1]]);
        out[i] = sample as f32 / 32768.0;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FloatPool;

    #[test]
    fn s16_passthrough_borrows_without_copy() {
        let pool = BytePool::new(4).unwrap();
        let src = [1u8, 2, 3, 4];
        let (dst, from_pool) = to_s16le(&pool, &src, SampleFormat::S16).unwrap();
        assert!(!from_pool);
        assert_eq!(&*dst, &src);
    }

    #[test]
    fn u8_conversion_matches_formula() {
        let pool = BytePool::new(2).unwrap();
        let src = [128u8];
        let (dst, from_pool) = to_s16le(&pool, &src, SampleFormat::U8).unwrap();
        assert!(from_pool);
        assert_eq!(i16::from_le_bytes([dst[0], dst[1]]), 0);
    }

    #[test]
    fn f32_conversion_clamps_out_of_range() {
        let pool = BytePool::new(2).unwrap();
        let src = 2.0f32.to_le_bytes();
        let (dst, _) = to_s16le(&pool, &src, SampleFormat::F32).unwrap();
        assert_eq!(i16::from_le_bytes([dst[0], dst[1]]), i16::MAX);
    }

    #[test]
    fn s16_to_f32_round_trip_within_quantization_error() {
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MIN, i16::MAX];
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let floats = s16le_to_f32(&bytes, None);
        for (orig, f) in samples.iter().zip(floats.iter()) {
            let requantized = (*f * 32768.0).round() as i32;
            assert!((requantized - *orig as i32).abs() <= 1);
        }
    }

    #[test]
    fn s16_to_f32_uses_float_pool_when_size_matches() {
        let pool = FloatPool::new(2).unwrap();
        let bytes = [0u8, 0, 0, 0];
        let _ = s16le_to_f32(&bytes, Some(&pool));
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn misaligned_input_drops_trailing_bytes_without_panicking() {
        let pool = BytePool::new(2).unwrap();
        let src = [10u8, 20, 30]; // 1.5 S24 samples worth if it were S24; here treat as misaligned S32
        let (dst, _) = to_s16le(&pool, &src, SampleFormat::S32).unwrap();
        assert_eq!(dst.len(), 0);
    }
}
