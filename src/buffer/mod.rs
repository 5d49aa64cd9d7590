//! Dual ring-buffer subsystem (C4, C5)
//!
//! For each source, two independent circular buffers share the incoming PCM
//! byte stream: an analysis ring feeding the ML chunker, and a capture ring
//! serving on-demand time-bounded segment reads.

pub mod analysis;
pub mod capture;

pub use analysis::{AnalysisRegistry, AnalysisRing};
pub use capture::{CaptureRegistry, CaptureRing};
