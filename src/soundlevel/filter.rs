//! ISO 266 1/3-octave bandpass filter bank (C6)
//!
//! Each band is a direct-form I biquad built from the audio-EQ-cookbook
//! bandpass formulas (constant 0 dB peak gain). This supersedes an earlier,
//! numerically shakier simplified-Butterworth derivation; only this
//! formulation should ever be implemented.

use crate::error::{IngestError, Result};

/// Standard ISO 266 1/3-octave center frequencies, in Hz.
pub const ISO_266_CENTER_FREQUENCIES: &[f64] = &[
    25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0, 500.0,
    630.0, 800.0, 1000.0, 1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0, 8000.0,
    10000.0, 12500.0, 16000.0, 20000.0,
];

const SIXTH_OCTAVE: f64 = 1.0 / 6.0;
const WARMUP_SAMPLES: usize = 100;
const OUTPUT_SAFETY_LIMIT: f64 = 100.0;

/// One band of the filter bank: a biquad bandpass with persistent state.
pub struct OctaveBandFilter {
    pub center_freq: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl OctaveBandFilter {
    /// Construct a band centered at `fc` Hz for a stream sampled at `fs` Hz.
    ///
    /// Rejects center frequencies whose 1/3-octave skirt would fall at or
    /// below DC, or at or above Nyquist, and rejects any coefficient set
    /// that would be numerically unstable.
    pub fn new(fc: f64, fs: f64) -> Result<Self> {
        let low = fc / 2f64.powf(SIXTH_OCTAVE);
        let high = fc * 2f64.powf(SIXTH_OCTAVE);
        let nyquist = fs / 2.0;
        if low <= 0.0 || high >= nyquist {
            return Err(IngestError::Validation(format!(
                "center frequency {fc} Hz has no valid 1/3-octave band at {fs} Hz sample rate"
            )));
        }

        let q = (fc / (high - low)).max(0.5);
        let w0 = 2.0 * std::f64::consts::PI * fc / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let a0 = 1.0 + alpha;
        let b0 = alpha / a0;
        let b1 = 0.0;
        let b2 = -alpha / a0;
        let a1 = (-2.0 * cos_w0) / a0;
        let a2 = (1.0 - alpha) / a0;

        if a2.abs() >= 1.0 || a1.abs() >= 1.0 + a2 {
            return Err(IngestError::Validation(format!(
                "biquad coefficients for {fc} Hz are not stable (a1={a1}, a2={a2})"
            )));
        }

        let mut filter = Self { center_freq: fc, b0, b1, b2, a1, a2, x1: 0.0, x2: 0.0, y1: 0.0, y2: 0.0 };
        for _ in 0..WARMUP_SAMPLES {
            filter.process_sample(0.0);
        }
        Ok(filter)
    }

    /// Filter one sample via the direct-form I difference equation.
    ///
    /// Any non-finite output or `|y| > 100` is treated as a numerical fault:
    /// the filter state is reset and an attenuated passthrough is returned
    /// instead, so one bad sample can't poison the filter forever.
    pub fn process_sample(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2 - self.a1 * self.y1 - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;

        if !y.is_finite() || y.abs() > OUTPUT_SAFETY_LIMIT {
            self.x1 = 0.0;
            self.x2 = 0.0;
            self.y1 = 0.0;
            self.y2 = 0.0;
            return 0.1 * x;
        }

        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Standard ISO 266 band-key label: `"<freq>_Hz"` below 1 kHz, else
/// `"<freq/1000>_kHz"` with one decimal place.
pub fn band_key(center_freq: f64) -> String {
    if center_freq < 1000.0 {
        format!("{center_freq}_Hz")
    } else {
        format!("{:.1}_kHz", center_freq / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_standard_band_below_nyquist_constructs_and_is_stable() {
        let fs = 48_000.0;
        for &fc in ISO_266_CENTER_FREQUENCIES {
            if fc >= fs / 2.0 {
                continue;
            }
            let filter = OctaveBandFilter::new(fc, fs).expect("band should construct");
            assert!(filter.a2.abs() < 1.0);
            assert!(filter.a1.abs() < 1.0 + filter.a2);
        }
    }

    #[test]
    fn rejects_band_at_or_above_nyquist() {
        // 20kHz band's skirt exceeds Nyquist at an 8kHz sample rate.
        assert!(OctaveBandFilter::new(20_000.0, 16_000.0).is_err());
    }

    #[test]
    fn band_key_formats_hz_and_khz() {
        assert_eq!(band_key(25.0), "25_Hz");
        assert_eq!(band_key(31.5), "31.5_Hz");
        assert_eq!(band_key(1000.0), "1.0_kHz");
        assert_eq!(band_key(16000.0), "16.0_kHz");
    }

    #[test]
    fn silence_in_produces_silence_out() {
        let mut filter = OctaveBandFilter::new(1000.0, 48_000.0).unwrap();
        for _ in 0..1000 {
            assert_eq!(filter.process_sample(0.0), 0.0);
        }
    }
}
