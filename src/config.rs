//! Configuration loading and command-line overrides
//!
//! Bootstrap settings load from a TOML file; command-line flags, when
//! present, take priority over the file.

use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_chunk_seconds() -> f64 {
    3.0
}
fn default_overlap_seconds() -> f64 {
    0.5
}
fn default_sound_level_interval() -> u32 {
    5
}
fn default_healthy_data_threshold() -> f64 {
    60.0
}
fn default_capture_duration_seconds() -> f64 {
    60.0
}
fn default_decoder_binary() -> String {
    "ffmpeg".to_string()
}

/// Bootstrap configuration, loaded from TOML and optionally overridden by
/// command-line flags in `main.rs`'s `Args`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub num_channels: u32,

    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: f64,
    #[serde(default = "default_overlap_seconds")]
    pub overlap_seconds: f64,
    #[serde(default = "default_sound_level_interval")]
    pub sound_level_interval: u32,
    #[serde(default = "default_healthy_data_threshold")]
    pub healthy_data_threshold: f64,
    #[serde(default = "default_capture_duration_seconds")]
    pub capture_duration_seconds: f64,

    #[serde(default = "default_decoder_binary")]
    pub decoder_binary: String,
    #[serde(default)]
    pub decoder_extra_params: Vec<String>,

    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub transports: HashMap<String, String>,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(IngestError::Validation("sample_rate must be > 0".into()));
        }
        if self.bit_depth == 0 || self.bit_depth % 8 != 0 {
            return Err(IngestError::Validation("bit_depth must be a positive multiple of 8".into()));
        }
        if self.num_channels != 1 {
            return Err(IngestError::Validation("only mono sources are supported".into()));
        }
        if !(0.0..2.0).contains(&self.overlap_seconds) {
            return Err(IngestError::Validation("overlap_seconds must be in [0, 2)".into()));
        }
        if self.sound_level_interval < 5 {
            return Err(IngestError::Validation("sound_level_interval must be >= 5".into()));
        }
        if self.chunk_seconds <= 0.0 {
            return Err(IngestError::Validation("chunk_seconds must be > 0".into()));
        }
        Ok(())
    }

    /// Loads the TOML file at `path`, applies `overrides`, and validates the
    /// result.
    pub async fn load(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IngestError::Validation(format!("failed to read config file: {e}")))?;
        let mut config: IngestConfig = toml::from_str(&raw)
            .map_err(|e| IngestError::Validation(format!("failed to parse config TOML: {e}")))?;

        if let Some(binary) = overrides.decoder_binary {
            config.decoder_binary = binary;
        }
        if let Some(sample_rate) = overrides.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(urls) = overrides.urls {
            config.urls = urls;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn transport_for(&self, url: &str) -> crate::supervisor::Transport {
        match self.transports.get(url).map(String::as_str) {
            Some("udp") => crate::supervisor::Transport::Udp,
            _ => crate::supervisor::Transport::Tcp,
        }
    }
}

/// Command-line overrides applied on top of the TOML file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub decoder_binary: Option<String>,
    pub sample_rate: Option<u32>,
    pub urls: Option<Vec<String>>,
}
