//! Real-time multi-source audio ingestion and analysis backbone.
//!
//! Supervises one decoder subprocess per configured RTSP source, fans its
//! PCM output into a dual ring-buffer subsystem (a sliding-window chunker
//! for the ML consumer, and a time-addressable capture ring for on-demand
//! clip extraction), and maintains a bank of 1/3-octave sound-level
//! processors per source.

pub mod audio_level;
pub mod buffer;
pub mod config;
pub mod error;
pub mod manager;
pub mod pcm;
pub mod pool;
pub mod rate_limit;
pub mod soundlevel;
pub mod supervisor;
pub mod time;

pub use audio_level::{compute_audio_level, AudioLevel};
pub use buffer::{AnalysisRegistry, CaptureRegistry};
pub use config::{ConfigOverrides, IngestConfig};
pub use error::{IngestError, Result};
pub use manager::StreamManager;
pub use pcm::{s16le_to_f32, to_s16le, SampleFormat};
pub use pool::{BytePool, FloatPool, PoolStats};
pub use soundlevel::{SoundLevelProcessor, SoundLevelReport};
pub use supervisor::{HealthSnapshot, OutputChunk, OutputEvent, StreamSupervisor, Transport};
