use crate::audio::resample::AudioResampler;
use crate::audio::AudioLoader;
use crate::perf::{self, Metric};
use anyhow::Result;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Default)]
pub struct WavIo;

impl WavIo {
    /// Read every channel of a WAV file as f32 in `[-1, 1]`.
    pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<Vec<f32>>, u32)> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));
        let mut samples = vec![Vec::with_capacity(reader.len() as usize / channels); channels];

        match spec.sample_format {
            SampleFormat::Float => {
                for (idx, sample) in reader.samples::<f32>().enumerate() {
                    samples[idx % channels].push(sample?);
                }
            }
            SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                for (idx, sample) in reader.samples::<i32>().enumerate() {
                    samples[idx % channels].push(sample? as f32 / scale);
                }
            }
        }

        Ok((samples, spec.sample_rate))
    }

    /// Write a mono waveform as 16-bit PCM.
    pub fn write_mono(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
        let mut writer = StreamingWavWriter::create(path, sample_rate)?;
        writer.write_chunk(samples)?;
        writer.finalize()
    }
}

/// Loads WAV files, mixes them to mono and resamples to a fixed rate.
#[derive(Debug, Clone, Copy)]
pub struct WavLoader {
    target_rate: u32,
}

impl WavLoader {
    /// Loader producing audio at `target_rate` Hz.
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }
}

impl AudioLoader for WavLoader {
    fn load(&self, path: &Path) -> Result<(Vec<f32>, u32)> {
        let _span = perf::span(Metric::AudioLoad);
        let (channels, rate) = WavIo::read_wav(path)?;
        let mono = AudioResampler::downmix(channels)?;
        let mono = AudioResampler::resample(mono, rate, self.target_rate)?;
        tracing::debug!(
            path = %path.display(),
            source_rate = rate,
            samples = mono.len(),
            "loaded audio"
        );
        Ok((mono, self.target_rate))
    }
}

/// Incremental mono 16-bit WAV writer.
pub struct StreamingWavWriter {
    writer: WavWriter<BufWriter<File>>,
    written: usize,
}

impl StreamingWavWriter {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { writer, written: 0 })
    }

    pub fn write_chunk(&mut self, samples: &[f32]) -> Result<()> {
        for &value in samples {
            let scaled = (value.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            self.writer.write_sample(scaled)?;
        }
        self.written += samples.len();
        Ok(())
    }

    /// Samples written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}
