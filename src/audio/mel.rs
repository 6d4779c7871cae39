//! Log-mel spectrogram extraction.
//!
//! Centered STFT with reflect padding and a periodic Hann window, power
//! spectrum, Slaney-normalised mel filterbank, then decibels relative to the
//! loudest bin with an 80 dB floor. Values are finally mapped by
//! `(db + 40) / 40`, which puts the useful range near `[-1, 1]`.

use crate::audio::AudioFeatureExtractor;
use crate::perf::{self, Metric};
use crate::weights::{CheckpointStore, ParameterMap, SafetensorsCheckpoint, TensorData as RawTensor};
use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::path::Path;
use std::sync::Arc;

const MEL_KEY: &str = "mel";
const AMIN: f32 = 1e-10;
const TOP_DB: f32 = 80.0;

/// Mel spectrogram stored row-major as `[n_mels][frames]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MelSpectrogram {
    pub n_mels: usize,
    pub frames: usize,
    pub data: Vec<f32>,
}

impl MelSpectrogram {
    /// Value of bin `mel` at `frame`.
    pub fn get(&self, mel: usize, frame: usize) -> f32 {
        self.data[mel * self.frames + frame]
    }

    /// Keep at most the first `frames` frames.
    pub fn truncate(&mut self, frames: usize) {
        if frames >= self.frames {
            return;
        }
        let mut data = Vec::with_capacity(self.n_mels * frames);
        for row in self.data.chunks(self.frames) {
            data.extend_from_slice(&row[..frames]);
        }
        self.data = data;
        self.frames = frames;
    }

    /// Tensor `[1, n_mels, frames]`.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [1, self.n_mels, self.frames]),
            device,
        )
    }

    /// Write as a safetensors file with a single `mel` tensor `[n_mels, frames]`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut map = ParameterMap::new();
        map.insert(
            MEL_KEY.to_string(),
            RawTensor::from_f32(&self.data, vec![self.n_mels, self.frames]),
        );
        SafetensorsCheckpoint::new(path.as_ref()).save(&map)
    }

    /// Read a file written by [`save`](Self::save). A leading batch axis of 1 is accepted.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let map = SafetensorsCheckpoint::new(path).load()?;
        let raw = map
            .get(MEL_KEY)
            .with_context(|| format!("{} has no `{MEL_KEY}` tensor", path.display()))?;
        let (n_mels, frames) = match raw.shape.as_slice() {
            [n_mels, frames] | [1, n_mels, frames] => (*n_mels, *frames),
            other => anyhow::bail!("mel tensor must be [n_mels, frames], got {other:?}"),
        };
        if n_mels == 0 || frames == 0 {
            anyhow::bail!("mel tensor is empty: [{n_mels}, {frames}]");
        }
        let data = raw.to_f32()?;
        if data.len() != n_mels * frames {
            anyhow::bail!("mel tensor holds {} values, expected {}", data.len(), n_mels * frames);
        }
        Ok(Self {
            n_mels,
            frames,
            data,
        })
    }
}

/// STFT-based mel feature extractor.
pub struct MelExtractor {
    n_fft: usize,
    hop_length: usize,
    n_mels: usize,
    window: Vec<f32>,
    filterbank: Vec<Vec<f32>>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl std::fmt::Debug for MelExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelExtractor")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("n_mels", &self.n_mels)
            .finish()
    }
}

impl MelExtractor {
    pub fn new(sample_rate: u32, n_fft: usize, hop_length: usize, n_mels: usize) -> Result<Self> {
        if n_fft < 2 || hop_length == 0 || n_mels == 0 || sample_rate == 0 {
            anyhow::bail!(
                "invalid mel settings: n_fft={n_fft}, hop_length={hop_length}, \
                 n_mels={n_mels}, sample_rate={sample_rate}"
            );
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        Ok(Self {
            n_fft,
            hop_length,
            n_mels,
            window: hann_window(n_fft),
            filterbank: mel_filterbank(sample_rate as f32, n_fft, n_mels),
            fft,
        })
    }

    /// Extractor for the audio settings of `config`.
    pub fn from_config(config: &crate::config::AudioConfig) -> Result<Self> {
        Self::new(
            config.sample_rate,
            config.n_fft,
            config.hop_length,
            config.n_mels,
        )
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Frames produced for `samples` input samples.
    pub fn num_frames(&self, samples: usize) -> usize {
        1 + samples / self.hop_length
    }

    /// Mel power spectrogram, `[n_mels][frames]`.
    fn mel_power(&self, waveform: &[f32]) -> Result<Vec<f32>> {
        let padded = reflect_pad(waveform, self.n_fft / 2);
        let frames = self.num_frames(waveform.len());
        let bins = self.n_fft / 2 + 1;

        let mut input = self.fft.make_input_vec();
        let mut spectrum: Vec<Complex32> = self.fft.make_output_vec();
        let mut scratch = self.fft.make_scratch_vec();
        let mut power = vec![0.0_f32; bins];
        let mut mel = vec![0.0_f32; self.n_mels * frames];

        for frame in 0..frames {
            let start = frame * self.hop_length;
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = padded.get(start + i).copied().unwrap_or(0.0) * self.window[i];
            }
            self.fft
                .process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .map_err(|err| anyhow::anyhow!("FFT failed: {err}"))?;
            for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                *p = c.norm_sqr();
            }
            for (m, filter) in self.filterbank.iter().enumerate() {
                mel[m * frames + frame] = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
            }
        }
        Ok(mel)
    }
}

impl AudioFeatureExtractor for MelExtractor {
    fn extract(&self, waveform: &[f32]) -> Result<MelSpectrogram> {
        let _span = perf::span(Metric::MelExtract);
        let frames = self.num_frames(waveform.len());
        let mut data = self.mel_power(waveform)?;
        power_to_db(&mut data);
        for value in &mut data {
            *value = (*value + 40.0) / 40.0;
        }
        perf::add_count(Metric::MelFrames, frames as u64);
        Ok(MelSpectrogram {
            n_mels: self.n_mels,
            frames,
            data,
        })
    }
}

/// Decibels relative to the maximum, floored `TOP_DB` below it.
fn power_to_db(values: &mut [f32]) {
    let reference = values.iter().copied().fold(AMIN, f32::max);
    let offset = 10.0 * reference.log10();
    let mut peak = f32::NEG_INFINITY;
    for value in values.iter_mut() {
        *value = 10.0 * value.max(AMIN).log10() - offset;
        peak = peak.max(*value);
    }
    let floor = peak - TOP_DB;
    for value in values.iter_mut() {
        *value = value.max(floor);
    }
}

/// Periodic Hann window.
fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / len as f32).cos())
        .collect()
}

/// Mirror `pad` samples onto both ends without repeating the edge sample.
///
/// Falls back to zeros when the signal is too short to mirror.
fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let len = signal.len();
    let mut out = Vec::with_capacity(len + 2 * pad);
    if len <= pad {
        out.resize(pad, 0.0);
        out.extend_from_slice(signal);
        out.resize(len + 2 * pad, 0.0);
        return out;
    }
    out.extend((1..=pad).rev().map(|i| signal[i]));
    out.extend_from_slice(signal);
    out.extend((1..=pad).map(|i| signal[len - 1 - i]));
    out
}

pub fn hz_to_mel(freq: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f32.ln() / 27.0;
    if freq >= min_log_hz {
        min_log_mel + (freq / min_log_hz).ln() / logstep
    } else {
        freq / f_sp
    }
}

pub fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f32.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * ((mel - min_log_mel) * logstep).exp()
    } else {
        f_sp * mel
    }
}

/// Slaney-style filterbank `[n_mels][n_fft / 2 + 1]` over `0..sample_rate / 2`.
fn mel_filterbank(sample_rate: f32, n_fft: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let bins = n_fft / 2 + 1;
    let mel_max = hz_to_mel(sample_rate / 2.0);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();
    let fft_freqs: Vec<f32> = (0..bins)
        .map(|k| k as f32 * sample_rate / n_fft as f32)
        .collect();

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let enorm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}
