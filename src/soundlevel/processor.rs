//! Per-second RMS aggregation and interval reporting (C6)

use crate::soundlevel::filter::{band_key, OctaveBandFilter, ISO_266_CENTER_FREQUENCIES};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

const MIN_INTERVAL_SECONDS: u32 = 5;
const RMS_CLAMP_MIN: f64 = 1e-10;
const RMS_CLAMP_MAX: f64 = 10.0;
const SILENT_DB: f64 = -100.0;

fn calculate_rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Accumulates filtered samples for one band until a full second is ready.
struct PerSecondBuffer {
    samples: Vec<f64>,
    target_sample_count: usize,
}

impl PerSecondBuffer {
    fn new(target_sample_count: usize) -> Self {
        Self { samples: Vec::with_capacity(target_sample_count * 2), target_sample_count }
    }

    fn push(&mut self, sample: f64) {
        self.samples.push(sample);
    }

    /// Pops one second's worth of dB measurements as they become available,
    /// shifting any overflow back to the start of the buffer.
    fn drain_measurements(&mut self) -> Vec<f64> {
        let mut measurements = Vec::new();
        while self.samples.len() >= self.target_sample_count {
            let window = &self.samples[..self.target_sample_count];
            let rms = calculate_rms(window).clamp(RMS_CLAMP_MIN, RMS_CLAMP_MAX);
            let mut db = 20.0 * rms.log10();
            if !db.is_finite() {
                db = SILENT_DB;
            }
            measurements.push(db);
            self.samples.drain(..self.target_sample_count);
        }
        measurements
    }
}

/// Per-second `{band → dB}` slots, rotated modulo `interval`.
struct IntervalAggregator {
    interval: u32,
    slots: Vec<HashMap<String, f64>>,
    current_index: usize,
    measurement_count: u32,
}

impl IntervalAggregator {
    fn new(interval: u32) -> Self {
        let interval = interval.max(MIN_INTERVAL_SECONDS);
        Self {
            interval,
            slots: vec![HashMap::new(); interval as usize],
            current_index: 0,
            measurement_count: 0,
        }
    }

    fn record(&mut self, key: &str, db: f64) {
        self.slots[self.current_index].insert(key.to_string(), db);
    }

    fn advance(&mut self) {
        self.current_index = (self.current_index + 1) % self.interval as usize;
        self.measurement_count += 1;
    }

    fn is_complete(&self) -> bool {
        self.measurement_count >= self.interval
    }

    fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.current_index = 0;
        self.measurement_count = 0;
    }
}

/// One band's summary within a [`SoundLevelReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandStats {
    pub center_freq: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sample_count: usize,
}

/// Emitted once every `interval` seconds of audio for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundLevelReport {
    pub timestamp: f64,
    pub source: String,
    pub name: String,
    pub duration: u32,
    pub bands: HashMap<String, BandStats>,
}

/// Bank of octave-band filters plus per-second/interval aggregation for one
/// source.
pub struct SoundLevelProcessor {
    source_id: String,
    sample_rate: u32,
    filters: Vec<OctaveBandFilter>,
    buffers: Vec<PerSecondBuffer>,
    aggregator: IntervalAggregator,
}

impl SoundLevelProcessor {
    /// Builds one filter (and per-second buffer) per standard ISO center
    /// frequency strictly below Nyquist.
    pub fn new(source_id: &str, sample_rate: u32, interval_seconds: u32) -> crate::error::Result<Self> {
        let nyquist = sample_rate as f64 / 2.0;
        let mut filters = Vec::new();
        let mut buffers = Vec::new();
        for &fc in ISO_266_CENTER_FREQUENCIES {
            if fc >= nyquist {
                continue;
            }
            filters.push(OctaveBandFilter::new(fc, sample_rate as f64)?);
            buffers.push(PerSecondBuffer::new(sample_rate as usize));
        }
        Ok(Self {
            source_id: source_id.to_string(),
            sample_rate,
            filters,
            buffers,
            aggregator: IntervalAggregator::new(interval_seconds),
        })
    }

    pub fn band_count(&self) -> usize {
        self.filters.len()
    }

    /// Process one block of S16LE PCM bytes. Returns a completed report once
    /// every `interval` seconds of audio have been measured.
    pub fn process_audio(&mut self, bytes: &[u8]) -> Option<SoundLevelReport> {
        let samples: Vec<f64> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f64 / 32768.0)
            .collect();

        if samples.is_empty() {
            return None;
        }

        trace!(
            source_id = %self.source_id,
            n = samples.len(),
            rms = calculate_rms(&samples),
            "sound level block"
        );

        let mut any_measured = false;
        for (i, filter) in self.filters.iter_mut().enumerate() {
            for &s in &samples {
                let filtered = filter.process_sample(s);
                self.buffers[i].push(filtered);
            }
            let key = band_key(filter.center_freq);
            for db in self.buffers[i].drain_measurements() {
                self.aggregator.record(&key, db);
                any_measured = true;
            }
        }

        if any_measured {
            self.aggregator.advance();
        }

        if self.aggregator.is_complete() {
            let report = self.build_report();
            self.aggregator.reset();
            Some(report)
        } else {
            None
        }
    }

    fn build_report(&self) -> SoundLevelReport {
        let mut bands = HashMap::new();
        for filter in &self.filters {
            let key = band_key(filter.center_freq);
            let mut values: Vec<f64> = self
                .aggregator
                .slots
                .iter()
                .filter_map(|slot| slot.get(&key).copied())
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                values.push(SILENT_DB);
            }
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            bands.insert(
                key,
                BandStats { center_freq: filter.center_freq, min, max, mean, sample_count: values.len() },
            );
        }
        SoundLevelReport {
            timestamp: crate::time::now_secs(),
            source: self.source_id.clone(),
            name: "sound_level".to_string(),
            duration: self.aggregator.interval,
            bands,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
