//! Per-chunk audio level summary delivered alongside each analysis chunk.

use serde::{Deserialize, Serialize};

const CLIP_THRESHOLD: f32 = 0.999;

/// RMS/peak/dBFS/clipping summary for one S16LE PCM chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AudioLevel {
    pub rms: f32,
    pub peak: f32,
    pub dbfs: f32,
    pub clipping: bool,
}

/// Computes level statistics over a chunk of S16LE mono PCM bytes.
/// An empty or odd-length (misaligned) input yields silence.
pub fn compute_audio_level(bytes: &[u8]) -> AudioLevel {
    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    if samples.is_empty() {
        return AudioLevel { rms: 0.0, peak: 0.0, dbfs: -100.0, clipping: false };
    }

    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    let clamped_rms = rms.clamp(1e-10, 10.0);
    let dbfs = 20.0 * clamped_rms.log10();
    let dbfs = if dbfs.is_finite() { dbfs } else { -100.0 };

    AudioLevel { rms, peak, dbfs, clipping: peak >= CLIP_THRESHOLD }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_zero_rms_and_floor_dbfs() {
        let level = compute_audio_level(&[0u8; 2000]);
        assert_eq!(level.rms, 0.0);
        assert_eq!(level.dbfs, -100.0);
        assert!(!level.clipping);
    }

    #[test]
    fn full_scale_sample_reports_clipping() {
        let bytes = i16::MAX.to_le_bytes();
        let mut pcm = Vec::new();
        for _ in 0..100 {
            pcm.extend_from_slice(&bytes);
        }
        let level = compute_audio_level(&pcm);
        assert!(level.clipping);
        assert!(level.peak > 0.99);
    }

    #[test]
    fn empty_input_does_not_panic() {
        let level = compute_audio_level(&[]);
        assert_eq!(level.rms, 0.0);
    }
}
