//! Waveform to training-example pipeline.
//!
//! Trims silence, peak-normalises, mu-law encodes, pads or crops to the
//! configured clip length and extracts the matching mel spectrogram. Inputs,
//! mel frames and targets come out aligned: `inputs.len() == targets.len() ==
//! mel.frames * hop_length`.

use crate::audio::mel::{MelExtractor, MelSpectrogram};
use crate::audio::{AudioFeatureExtractor, AudioLoader};
use crate::codec::{MuLaw, QuantizationCodec};
use crate::config::Config;
use crate::model::classifier::targets_tensor;
use crate::model::vocoder::one_hot_sequence;
use crate::perf::{self, Metric};
use anyhow::{bail, Result};
use burn::tensor::{backend::Backend, Int, Tensor};
use rand::Rng;
use std::path::Path;

const TRIM_FRAME: usize = 2048;
const TRIM_HOP: usize = 512;

/// One aligned (inputs, conditioning, targets) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    /// Classes fed to the decoder, all samples but the last.
    pub inputs: Vec<usize>,
    /// Conditioning features covering `inputs`.
    pub mel: MelSpectrogram,
    /// Next-sample classes, all samples but the first.
    pub targets: Vec<usize>,
}

impl TrainingExample {
    /// One-hot inputs `[1, Q, time]`.
    pub fn input_tensor<B: Backend>(
        &self,
        num_classes: usize,
        device: &B::Device,
    ) -> crate::error::Result<Tensor<B, 3>> {
        one_hot_sequence(std::slice::from_ref(&self.inputs), num_classes, device)
    }

    /// Mel features `[1, n_mels, frames]`.
    pub fn mel_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        self.mel.to_tensor(device)
    }

    /// Target classes `[1, time]`.
    pub fn target_tensor<B: Backend>(
        &self,
        device: &B::Device,
    ) -> crate::error::Result<Tensor<B, 2, Int>> {
        targets_tensor(std::slice::from_ref(&self.targets), device)
    }
}

/// Audio preprocessing bound to one configuration.
#[derive(Debug)]
pub struct Preprocessor {
    top_db: f32,
    hop_length: usize,
    length: Option<usize>,
    codec: MuLaw,
    mel: MelExtractor,
}

impl Preprocessor {
    pub fn new(
        extractor: MelExtractor,
        codec: MuLaw,
        top_db: f32,
        length: Option<usize>,
    ) -> Self {
        Self {
            top_db,
            hop_length: extractor.hop_length(),
            length,
            codec,
            mel: extractor,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            MelExtractor::from_config(&config.audio)?,
            MuLaw::new(config.model.quantize),
            config.audio.top_db,
            config.audio.length,
        ))
    }

    /// Override the clip length; `None` keeps the whole trimmed signal.
    pub fn with_length(mut self, length: Option<usize>) -> Self {
        self.length = length;
        self
    }

    pub fn codec(&self) -> &MuLaw {
        &self.codec
    }

    /// Trim and peak-normalise a raw waveform.
    pub fn clean(&self, waveform: &[f32]) -> Vec<f32> {
        let mut cleaned = trim_silence(waveform, self.top_db).to_vec();
        normalize_peak(&mut cleaned);
        cleaned
    }

    /// Conditioning features for the whole cleaned signal.
    pub fn conditioning(&self, waveform: &[f32]) -> Result<MelSpectrogram> {
        self.mel.extract(&self.clean(waveform))
    }

    /// Load `path` and build a training example.
    pub fn process_file<R: Rng>(
        &self,
        loader: &impl AudioLoader,
        path: &Path,
        rng: &mut R,
    ) -> Result<TrainingExample> {
        let (waveform, _) = loader.load(path)?;
        self.process(&waveform, rng)
    }

    /// Build a training example; `rng` chooses the crop offset.
    pub fn process<R: Rng>(&self, waveform: &[f32], rng: &mut R) -> Result<TrainingExample> {
        let _span = perf::span(Metric::Preprocess);
        let mut raw = self.clean(waveform);
        let mut classes = self.codec.encode(&raw);

        let mut max_frames = None;
        if let Some(length) = self.length {
            let target = length + 1;
            if raw.len() <= target {
                raw.resize(target, 0.0);
                classes.resize(target, self.codec.silence());
            } else {
                let start = rng.gen_range(0..raw.len() - target);
                raw = raw[start..start + target].to_vec();
                classes = classes[start..start + target].to_vec();
            }
            max_frames = Some(target / self.hop_length);
        }

        let mut mel = self.mel.extract(&raw)?;
        if let Some(frames) = max_frames {
            mel.truncate(frames);
        }

        let frames = mel.frames.min(classes.len().saturating_sub(1) / self.hop_length);
        if frames == 0 {
            bail!(
                "audio too short: {} samples after trimming, need more than {}",
                classes.len(),
                self.hop_length
            );
        }
        mel.truncate(frames);
        let time = frames * self.hop_length;
        tracing::debug!(samples = raw.len(), frames, time, "preprocessed clip");
        Ok(TrainingExample {
            inputs: classes[..time].to_vec(),
            mel,
            targets: classes[1..=time].to_vec(),
        })
    }
}

/// Drop leading and trailing frames quieter than `top_db` below the loudest.
pub fn trim_silence(signal: &[f32], top_db: f32) -> &[f32] {
    if signal.is_empty() {
        return signal;
    }
    let half = TRIM_FRAME / 2;
    let frames = 1 + signal.len() / TRIM_HOP;
    let rms: Vec<f32> = (0..frames)
        .map(|frame| {
            let center = frame * TRIM_HOP;
            let start = center.saturating_sub(half);
            let end = (center + half).min(signal.len());
            let energy: f32 = signal[start..end].iter().map(|x| x * x).sum();
            (energy / TRIM_FRAME as f32).sqrt()
        })
        .collect();

    let to_db = |amp: f32| 20.0 * amp.max(1e-5).log10();
    let reference = to_db(rms.iter().copied().fold(0.0, f32::max));
    let loud = |amp: &f32| to_db(*amp) - reference > -top_db;
    let (Some(first), Some(last)) = (rms.iter().position(loud), rms.iter().rposition(loud)) else {
        return &signal[..0];
    };
    let start = (first * TRIM_HOP).min(signal.len());
    let end = ((last + 1) * TRIM_HOP).min(signal.len());
    &signal[start..end]
}

/// Scale so the largest magnitude is 1. Silent signals are left alone.
pub fn normalize_peak(signal: &mut [f32]) {
    let peak = signal.iter().fold(0.0_f32, |acc, x| acc.max(x.abs()));
    if peak > 0.0 {
        signal.iter_mut().for_each(|x| *x /= peak);
    }
}
