//! Audio I/O, resampling and feature extraction around the model.
//!
//! The model never reads files itself; it consumes waveforms and mel
//! spectrograms through the two traits below.

pub mod io;
pub mod mel;
pub mod preprocess;
pub mod resample;

use anyhow::Result;
use std::path::Path;

pub use mel::{MelExtractor, MelSpectrogram};

/// Reads a mono waveform from storage.
pub trait AudioLoader {
    /// Samples in `[-1, 1]` and their sample rate.
    fn load(&self, path: &Path) -> Result<(Vec<f32>, u32)>;
}

/// Turns a waveform into conditioning features.
pub trait AudioFeatureExtractor {
    /// Mel spectrogram of `waveform`.
    fn extract(&self, waveform: &[f32]) -> Result<MelSpectrogram>;
}
