//! Vocoder configuration: architecture, feature extraction and sampling.
//!
//! Configurations are loaded from YAML with [`load_config`] and validated once
//! at startup; everything downstream receives the same immutable [`Config`].

use crate::error::{Result, VocoderError};
use crate::model::generator::SamplerConfig;
use crate::model::vocoder::VocoderConfig;
use crate::modules::residual::dilation_schedule;
use crate::modules::upsample::{check_alignment, ConditionUpsamplerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_filter_size() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
/// Decoder architecture.
pub struct ModelConfig {
    /// Repetitions of the dilation cycle.
    pub n_loop: usize,
    /// Layers per cycle; dilations run `1, 2, ..., 2^(n_layer-1)`.
    pub n_layer: usize,
    /// Taps of each dilated convolution.
    #[serde(default = "default_filter_size")]
    pub filter_size: usize,
    /// Number of mu-law classes.
    pub quantize: usize,
    /// Residual path width.
    pub residual_channels: usize,
    /// Skip path width.
    pub skip_channels: usize,
    /// Apply `tanh` after the input embedding.
    #[serde(default = "default_true")]
    pub use_embed_tanh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
/// Conditioning upsampler stages.
pub struct UpsampleConfig {
    /// Output channels of each transposed convolution.
    pub channels: Vec<usize>,
    /// Expansion factor of each transposed convolution.
    pub factors: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
/// Feature extraction settings.
pub struct AudioConfig {
    /// Model sample rate in Hz.
    pub sample_rate: u32,
    /// FFT window size.
    pub n_fft: usize,
    /// Samples between mel frames.
    pub hop_length: usize,
    /// Mel bins.
    pub n_mels: usize,
    /// Silence threshold below peak, in dB, for trimming.
    pub top_db: f32,
    /// Optional training crop length in samples.
    #[serde(default)]
    pub length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
/// Generation-time sampling.
pub struct SamplingSection {
    /// Softmax temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Fixed seed for reproducible output.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            seed: None,
        }
    }
}

/// Top-level vocoder configuration.
///
/// # Example YAML
///
/// ```yaml
/// weights_path: "wavenet.safetensors"
/// model:
///   n_loop: 2
///   n_layer: 10
///   quantize: 256
///   residual_channels: 64
///   skip_channels: 256
/// upsample:
///   channels: [128, 128]
///   factors: [16, 16]
/// audio:
///   sample_rate: 16000
///   n_fft: 1024
///   hop_length: 256
///   n_mels: 128
///   top_db: 20
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Decoder architecture.
    pub model: ModelConfig,
    /// Conditioning upsampler.
    pub upsample: UpsampleConfig,
    /// Feature extraction.
    pub audio: AudioConfig,
    /// Sampling defaults.
    #[serde(default)]
    pub sampling: SamplingSection,
    /// Weights file; relative to the config file, or an `hf://` URL.
    #[serde(default)]
    pub weights_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                n_loop: 2,
                n_layer: 10,
                filter_size: 2,
                quantize: 256,
                residual_channels: 64,
                skip_channels: 256,
                use_embed_tanh: true,
            },
            upsample: UpsampleConfig {
                channels: vec![128, 128],
                factors: vec![16, 16],
            },
            audio: AudioConfig {
                sample_rate: 16000,
                n_fft: 1024,
                hop_length: 256,
                n_mels: 128,
                top_db: 20.0,
                length: Some(7680),
            },
            sampling: SamplingSection::default(),
            weights_path: None,
        }
    }
}

impl Config {
    /// Check sizes and the factor/hop alignment.
    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        let sizes = [
            ("model.n_loop", model.n_loop),
            ("model.n_layer", model.n_layer),
            ("model.filter_size", model.filter_size),
            ("model.quantize", model.quantize),
            ("model.residual_channels", model.residual_channels),
            ("model.skip_channels", model.skip_channels),
            ("audio.n_fft", self.audio.n_fft),
            ("audio.hop_length", self.audio.hop_length),
            ("audio.n_mels", self.audio.n_mels),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(VocoderError::config(format!("{name} must be non-zero")));
        }
        if model.n_layer >= usize::BITS as usize {
            return Err(VocoderError::config("model.n_layer is too large"));
        }
        if self.audio.sample_rate == 0 {
            return Err(VocoderError::config("audio.sample_rate must be non-zero"));
        }
        if self.upsample.channels.len() != self.upsample.factors.len() {
            return Err(VocoderError::config(format!(
                "upsample.channels has {} entries but upsample.factors has {}",
                self.upsample.channels.len(),
                self.upsample.factors.len()
            )));
        }
        if self.upsample.channels.contains(&0) {
            return Err(VocoderError::config("upsample.channels must be non-zero"));
        }
        check_alignment(&self.upsample.factors, self.audio.hop_length)?;
        if !(self.sampling.temperature.is_finite() && self.sampling.temperature > 0.0) {
            return Err(VocoderError::config("sampling.temperature must be positive"));
        }
        Ok(())
    }

    /// Dilation of every residual layer, in order.
    pub fn dilations(&self) -> Vec<usize> {
        dilation_schedule(self.model.n_loop, self.model.n_layer)
    }

    /// Number of residual layers.
    pub fn num_layers(&self) -> usize {
        self.model.n_loop * self.model.n_layer
    }

    /// Decoder sizes.
    pub fn vocoder_config(&self) -> VocoderConfig {
        VocoderConfig {
            quantize: self.model.quantize,
            residual_channels: self.model.residual_channels,
            skip_channels: self.model.skip_channels,
            filter_size: self.model.filter_size,
            dilations: self.dilations(),
            use_embed_tanh: self.model.use_embed_tanh,
        }
    }

    /// Encoder sizes.
    pub fn upsampler_config(&self) -> ConditionUpsamplerConfig {
        ConditionUpsamplerConfig {
            in_channels: self.audio.n_mels,
            channels: self.upsample.channels.clone(),
            factors: self.upsample.factors.clone(),
            out_layers: self.num_layers(),
            residual_channels: self.model.residual_channels,
            hop_length: self.audio.hop_length,
        }
    }

    /// Sampler settings, with an optional seed override.
    pub fn sampler_config(&self, seed: Option<u64>) -> SamplerConfig {
        SamplerConfig {
            temperature: self.sampling.temperature,
            seed: seed.or(self.sampling.seed),
        }
    }
}

/// Load and validate a configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file doesn't exist, contains invalid YAML, or
/// fails [`Config::validate`].
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let data = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&data)?;
    config.validate()?;
    Ok(config)
}

/// Write a configuration as YAML.
pub fn save_config(config: &Config, path: impl AsRef<Path>) -> anyhow::Result<()> {
    fs::write(path, serde_yaml::to_string(config)?)?;
    Ok(())
}

/// Resolve a possibly relative path against a config file location.
pub fn resolve_relative_path(config_path: &Path, maybe_relative: &str) -> PathBuf {
    let candidate = Path::new(maybe_relative);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
model:
  n_loop: 1
  n_layer: 3
  quantize: 16
  residual_channels: 4
  skip_channels: 8
upsample:
  channels: [3, 3]
  factors: [2, 4]
audio:
  sample_rate: 8000
  n_fft: 32
  hop_length: 8
  n_mels: 5
  top_db: 20
"#;

    #[test]
    fn defaults_fill_optional_fields() {
        let config: Config = serde_yaml::from_str(MINIMAL).expect("parse");
        assert_eq!(config.model.filter_size, 2);
        assert!(config.model.use_embed_tanh);
        assert_eq!(config.sampling, SamplingSection::default());
        assert_eq!(config.audio.length, None);
        assert!(config.weights_path.is_none());
        config.validate().expect("valid");
        assert_eq!(config.dilations(), vec![1, 2, 4]);
        assert_eq!(config.upsampler_config().out_layers, 3);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = MINIMAL.replace("n_loop: 1", "n_loop: 1\n  dropout: 0.1");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn misaligned_upsampling_fails_validation() {
        let yaml = MINIMAL.replace("factors: [2, 4]", "factors: [2, 2]");
        let config: Config = serde_yaml::from_str(&yaml).expect("parse");
        assert!(matches!(
            config.validate(),
            Err(VocoderError::Alignment { product: 4, hop_length: 8, .. })
        ));
    }

    #[test]
    fn default_config_matches_reference_model() {
        let config = Config::default();
        config.validate().expect("valid");
        assert_eq!(config.num_layers(), 20);
        assert_eq!(config.dilations()[9], 512);
        assert_eq!(config.sampler_config(Some(3)).seed, Some(3));
    }

    #[test]
    fn load_config_round_trips_and_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        save_config(&Config::default(), &path).expect("save");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, Config::default());
        assert!(load_config(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let config_path = Path::new("/models/wavenet/config.yaml");
        assert_eq!(
            resolve_relative_path(config_path, "weights.safetensors"),
            PathBuf::from("/models/wavenet/weights.safetensors")
        );
        assert_eq!(
            resolve_relative_path(config_path, "/abs/w.safetensors"),
            PathBuf::from("/abs/w.safetensors")
        );
    }
}
