//! High-level runtime wrapper for vocoder bootstrapping.
//!
//! Owns a validated [`Config`] and a loaded [`WaveNetModel`], and exposes the
//! file-level operations the CLI needs: mel extraction, vocoding, teacher-forced
//! evaluation and checkpoint creation.

use crate::audio::io::WavLoader;
use crate::audio::preprocess::Preprocessor;
use crate::audio::MelSpectrogram;
use crate::codec::QuantizationCodec;
use crate::config::{load_config, resolve_relative_path, save_config, Config};
use crate::download::download_if_necessary;
use crate::model::classifier::{loss_and_accuracy, ClassifierReport};
use crate::model::generator::Generator;
use crate::model::wavenet::WaveNetModel;
use crate::perf::{self, Metric};
use crate::weights::SafetensorsCheckpoint;
use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// Generation parameters for [`VocoderRuntime::vocode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VocodeParams {
    /// Overrides `sampling.seed` from the config.
    pub seed: Option<u64>,
    /// Overrides `sampling.temperature` from the config.
    pub temperature: Option<f32>,
    /// Stop after this many samples.
    pub max_samples: Option<usize>,
    /// Samples handed to the sink at a time.
    pub chunk_size: usize,
}

impl Default for VocodeParams {
    fn default() -> Self {
        Self {
            seed: None,
            temperature: None,
            max_samples: None,
            chunk_size: 4096,
        }
    }
}

/// Static facts about a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub sample_rate: u32,
    pub hop_length: usize,
    pub classes: usize,
    pub layers: usize,
    pub receptive_field: usize,
    pub parameters: usize,
}

impl std::fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sample_rate: {}", self.sample_rate)?;
        writeln!(f, "hop_length: {}", self.hop_length)?;
        writeln!(f, "classes: {}", self.classes)?;
        writeln!(f, "layers: {}", self.layers)?;
        writeln!(
            f,
            "receptive_field: {} samples ({:.1} ms)",
            self.receptive_field,
            self.receptive_field as f32 * 1000.0 / self.sample_rate as f32
        )?;
        write!(f, "parameters: {}", self.parameters)
    }
}

/// Config plus loaded model.
#[derive(Debug)]
pub struct VocoderRuntime<B: Backend> {
    config: Config,
    model: WaveNetModel<B>,
    preprocessor: Preprocessor,
}

impl<B: Backend> VocoderRuntime<B> {
    /// Load a config and the weights it points at.
    ///
    /// `weights` overrides the config's `weights_path`. Relative paths in the
    /// config resolve against the config file's directory.
    pub fn from_config_path(
        path: impl AsRef<Path>,
        weights: Option<&str>,
        device: &B::Device,
    ) -> Result<Self> {
        let _span = perf::span(Metric::RuntimeLoad);
        let path = path.as_ref();
        let config = load_config(path)?;
        let weights = match weights {
            Some(explicit) => download_if_necessary(explicit)?,
            None => {
                let configured = config
                    .weights_path
                    .as_deref()
                    .context("no weights given and the config has no weights_path")?;
                resolve_weights(path, configured)?
            }
        };
        Self::from_config(&config, &weights, device)
    }

    /// Build from an already-loaded config and a local weights file.
    pub fn from_config(config: &Config, weights: &Path, device: &B::Device) -> Result<Self> {
        let store = SafetensorsCheckpoint::new(weights);
        let model = WaveNetModel::from_checkpoint(config, &store, device)
            .with_context(|| format!("loading weights from {}", weights.display()))?;
        Self::with_model(config, model)
    }

    /// Wrap an existing model.
    pub fn with_model(config: &Config, model: WaveNetModel<B>) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            model,
            preprocessor: Preprocessor::from_config(config)?,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &WaveNetModel<B> {
        &self.model
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            sample_rate: self.config.audio.sample_rate,
            hop_length: self.model.hop_length(),
            classes: self.model.num_classes(),
            layers: self.model.decoder.num_layers(),
            receptive_field: self.model.decoder.receptive_field(),
            parameters: self.model.num_params(),
        }
    }

    /// Conditioning features for a WAV file, untruncated.
    pub fn mel_from_wav(&self, path: &Path) -> Result<MelSpectrogram> {
        mel_from_wav(&self.config, path)
    }

    /// Generate a waveform for `mel`, handing decoded chunks to `sink`.
    ///
    /// Returns the number of samples generated.
    pub fn vocode<F>(
        &self,
        mel: &MelSpectrogram,
        params: &VocodeParams,
        mut sink: F,
    ) -> Result<usize>
    where
        F: FnMut(&[f32]) -> Result<ControlFlow<()>>,
    {
        let device = self.model.device();
        let conditions = self.model.conditions(mel.to_tensor::<B>(&device))?;
        let available = conditions.dims()[3];
        let steps = params.max_samples.map_or(available, |max| max.min(available));

        let mut sampler = self.config.sampler_config(params.seed);
        if let Some(temperature) = params.temperature {
            sampler.temperature = temperature;
        }
        tracing::info!(frames = mel.frames, steps, temperature = sampler.temperature, "vocoding");

        let codec = self.preprocessor.codec();
        let mut generator = Generator::new(&self.model.decoder, &sampler)?;
        let mut sink_error = None;
        let produced = generator.run_chunked(conditions, steps, params.chunk_size, |chunk| {
            let classes: Vec<usize> = chunk.iter().map(|step| step[0]).collect();
            match sink(&codec.decode(&classes)) {
                Ok(flow) => flow,
                Err(err) => {
                    sink_error = Some(err);
                    ControlFlow::Break(())
                }
            }
        })?;
        match sink_error {
            Some(err) => Err(err),
            None => Ok(produced),
        }
    }

    /// Generate the whole waveform for `mel` in memory.
    pub fn vocode_to_vec(&self, mel: &MelSpectrogram, params: &VocodeParams) -> Result<Vec<f32>> {
        let mut samples = Vec::new();
        self.vocode(mel, params, |chunk| {
            samples.extend_from_slice(chunk);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(samples)
    }

    /// Teacher-forced loss and accuracy on a WAV file.
    ///
    /// Uses the configured clip length; `seed` fixes the crop offset.
    pub fn evaluate_wav(&self, path: &Path, seed: u64) -> Result<ClassifierReport> {
        let loader = WavLoader::new(self.config.audio.sample_rate);
        let mut rng = StdRng::seed_from_u64(seed);
        let example = self.preprocessor.process_file(&loader, path, &mut rng)?;
        let device = self.model.device();
        let inputs = example.input_tensor::<B>(self.model.num_classes(), &device)?;
        let logits = self.model.forward(inputs, example.mel_tensor(&device))?;
        let report = loss_and_accuracy(logits, example.target_tensor(&device)?)?;
        tracing::info!(
            path = %path.display(),
            samples = example.targets.len(),
            loss = report.loss,
            accuracy = report.accuracy,
            "evaluated"
        );
        Ok(report)
    }
}

/// Conditioning features for a WAV file using `config`'s audio settings.
pub fn mel_from_wav(config: &Config, path: &Path) -> Result<MelSpectrogram> {
    use crate::audio::AudioLoader;
    let loader = WavLoader::new(config.audio.sample_rate);
    let (waveform, _) = loader.load(path)?;
    Preprocessor::from_config(config)?.conditioning(&waveform)
}

/// Write a randomly initialised checkpoint for `config`.
///
/// Returns the number of parameters written. When `config_out` is given the
/// config is saved there too, with `weights_path` pointing at the checkpoint.
pub fn init_checkpoint<B: Backend>(
    config: &Config,
    seed: u64,
    weights_out: &Path,
    config_out: Option<&Path>,
    device: &B::Device,
) -> Result<usize> {
    let model = WaveNetModel::<B>::init(config, seed, device)?;
    model.save(&SafetensorsCheckpoint::new(weights_out))?;
    if let Some(config_out) = config_out {
        let mut config = config.clone();
        config.weights_path = Some(weights_reference(config_out, weights_out));
        save_config(&config, config_out)?;
    }
    Ok(model.num_params())
}

/// Resolve a configured weights location to a local file.
fn resolve_weights(config_path: &Path, configured: &str) -> Result<PathBuf> {
    if configured.starts_with("hf://") {
        return download_if_necessary(configured);
    }
    let resolved = resolve_relative_path(config_path, configured);
    if !resolved.exists() {
        anyhow::bail!("weights file not found: {}", resolved.display());
    }
    Ok(resolved)
}

/// Path to `weights` as written into a config saved at `config_path`.
fn weights_reference(config_path: &Path, weights: &Path) -> String {
    let same_dir = config_path.parent() == weights.parent();
    match weights.file_name() {
        Some(name) if same_dir => name.to_string_lossy().into_owned(),
        _ => weights.to_string_lossy().into_owned(),
    }
}
