//! PCM format conversion (C3)
//!
//! Converts decoder output in U8/S16/S24/S32/F32 little-endian encodings to
//! 16-bit signed little-endian ("S16LE"), and converts S16LE to normalized
//! `f32` for consumers that want floating-point samples.

mod format;

pub use format::{s16le_to_f32, to_s16le, SampleFormat};
