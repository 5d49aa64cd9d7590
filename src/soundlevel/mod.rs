//! 1/3-octave sound-level processor bank (C6)

mod filter;
mod processor;
mod registry;

pub use filter::{band_key, OctaveBandFilter, ISO_266_CENTER_FREQUENCIES};
pub use processor::{BandStats, SoundLevelProcessor, SoundLevelReport};
pub use registry::SoundLevelRegistry;
