//! Encoder-decoder composition: conditioning upsampler plus WaveNet decoder.
//!
//! [`WaveNetModel`] owns every parameter, builds itself from a [`Config`],
//! and moves its weights in and out of a [`CheckpointStore`].

use crate::config::Config;
use crate::error::{Result, VocoderError};
use crate::model::vocoder::Vocoder;
use crate::modules::conv::ConvWeights;
use crate::modules::residual::ResidualLayer;
use crate::modules::upsample::ConditionUpsampler;
use crate::perf::{self, Metric};
use crate::weights::{
    normalize_names, tensor_from_data, tensor_to_data, CheckpointStore, ParameterMap,
};
use anyhow::{bail, Context};
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Mel-conditioned WaveNet vocoder.
#[derive(Debug, Clone)]
pub struct WaveNetModel<B: Backend> {
    /// Frame-rate to sample-rate conditioning network.
    pub encoder: ConditionUpsampler<B>,
    /// Autoregressive decoder.
    pub decoder: Vocoder<B>,
}

impl<B: Backend> WaveNetModel<B> {
    /// Pair an encoder with a decoder of matching depth and width.
    pub fn new(encoder: ConditionUpsampler<B>, decoder: Vocoder<B>) -> Result<Self> {
        if encoder.num_layers() != decoder.num_layers() {
            return Err(VocoderError::config(format!(
                "encoder produces conditioning for {} layers, decoder has {}",
                encoder.num_layers(),
                decoder.num_layers()
            )));
        }
        Ok(Self { encoder, decoder })
    }

    /// Randomly initialised model (LeCun-normal weights, zero biases).
    pub fn init(config: &Config, seed: u64, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let encoder = ConditionUpsampler::init(&config.upsampler_config(), &mut rng, device)?;
        let decoder = Vocoder::init(&config.vocoder_config(), &mut rng, device)?;
        Self::new(encoder, decoder)
    }

    /// Build from a config and load weights from `store`.
    pub fn from_checkpoint(
        config: &Config,
        store: &impl CheckpointStore,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        let mut model = Self::init(config, 0, device)?;
        model.load(store, device)?;
        Ok(model)
    }

    /// Per-layer conditioning `[layers, batch, 2R, frames * hop]`.
    ///
    /// `mel` is `[batch, mels, frames]` with at least one frame.
    pub fn conditions(&self, mel: Tensor<B, 3>) -> Result<Tensor<B, 4>> {
        let dims = mel.dims();
        if dims[1] != self.encoder.in_channels() || dims[2] == 0 {
            return Err(VocoderError::shape(
                "wavenet.mel",
                [dims[0], self.encoder.in_channels(), dims[2].max(1)],
                dims,
            ));
        }
        let _span = perf::span(Metric::ConditionTransform);
        self.encoder.transform(mel)
    }

    /// Teacher-forced logits `[batch, Q, time]` for one-hot `input` and `mel`.
    ///
    /// `time` must equal `frames * hop`.
    pub fn forward(&self, input: Tensor<B, 3>, mel: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let conditions = self.conditions(mel)?;
        let _span = perf::span(Metric::DecoderFull);
        self.decoder.evaluate_full(input, conditions)
    }

    /// Samples per mel frame.
    pub fn hop_length(&self) -> usize {
        self.encoder.hop_length()
    }

    /// Device holding the parameters.
    pub fn device(&self) -> B::Device {
        self.decoder.device()
    }

    /// Number of quantization classes.
    pub fn num_classes(&self) -> usize {
        self.decoder.num_classes()
    }

    /// All parameters under their checkpoint names.
    pub fn parameters(&self) -> Vec<(String, &ConvWeights<B>)> {
        let mut params = Vec::new();
        for (idx, stage) in self.encoder.stages.iter().enumerate() {
            params.push((format!("encoder.upsample.{idx}"), &stage.params));
        }
        for (idx, proj) in self.encoder.projections.iter().enumerate() {
            params.push((format!("encoder.proj.{idx}"), &proj.params));
        }
        params.push(("decoder.embed".to_string(), &self.decoder.embed.params));
        for (idx, layer) in self.decoder.stack.layers.iter().enumerate() {
            params.push((format!("decoder.stack.{idx}.conv"), &layer.conv.params));
            params.push((format!("decoder.stack.{idx}.res"), &layer.res.params));
            params.push((format!("decoder.stack.{idx}.skip"), &layer.skip.params));
        }
        params.push(("decoder.proj1".to_string(), &self.decoder.proj1.params));
        params.push(("decoder.proj2".to_string(), &self.decoder.proj2.params));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut ConvWeights<B>)> {
        let Self { encoder, decoder } = self;
        let mut params = Vec::new();
        for (idx, stage) in encoder.stages.iter_mut().enumerate() {
            params.push((format!("encoder.upsample.{idx}"), &mut stage.params));
        }
        for (idx, proj) in encoder.projections.iter_mut().enumerate() {
            params.push((format!("encoder.proj.{idx}"), &mut proj.params));
        }
        params.push(("decoder.embed".to_string(), &mut decoder.embed.params));
        for (idx, layer) in decoder.stack.layers.iter_mut().enumerate() {
            let ResidualLayer { conv, res, skip } = layer;
            params.push((format!("decoder.stack.{idx}.conv"), &mut conv.params));
            params.push((format!("decoder.stack.{idx}.res"), &mut res.params));
            params.push((format!("decoder.stack.{idx}.skip"), &mut skip.params));
        }
        params.push(("decoder.proj1".to_string(), &mut decoder.proj1.params));
        params.push(("decoder.proj2".to_string(), &mut decoder.proj2.params));
        params
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.parameters()
            .iter()
            .map(|(_, weights)| weights.num_params())
            .sum()
    }

    /// Snapshot every parameter as raw f32 tensors.
    pub fn state_dict(&self) -> ParameterMap {
        let mut state = ParameterMap::new();
        for (name, weights) in self.parameters() {
            state.insert(format!("{name}.weight"), tensor_to_data(&weights.weight));
            if let Some(bias) = weights.bias.as_ref() {
                state.insert(format!("{name}.bias"), tensor_to_data(bias));
            }
        }
        state
    }

    /// Replace every parameter from `state`; shapes must match exactly.
    pub fn load_state_dict(
        &mut self,
        state: &ParameterMap,
        device: &B::Device,
    ) -> anyhow::Result<()> {
        let mut used = 0;
        for (name, weights) in self.parameters_mut() {
            let key = format!("{name}.weight");
            let data = state
                .get(&key)
                .with_context(|| format!("checkpoint is missing {key}"))?;
            let weight: Tensor<B, 3> =
                tensor_from_data(data, device).with_context(|| format!("loading {key}"))?;
            if weight.dims() != weights.weight.dims() {
                bail!(
                    "{key}: checkpoint shape {:?} does not match model shape {:?}",
                    weight.dims(),
                    weights.weight.dims()
                );
            }
            weights.weight = weight;
            used += 1;

            if let Some(current) = weights.bias.as_mut() {
                let key = format!("{name}.bias");
                let data = state
                    .get(&key)
                    .with_context(|| format!("checkpoint is missing {key}"))?;
                let bias: Tensor<B, 1> =
                    tensor_from_data(data, device).with_context(|| format!("loading {key}"))?;
                if bias.dims() != current.dims() {
                    bail!(
                        "{key}: checkpoint shape {:?} does not match model shape {:?}",
                        bias.dims(),
                        current.dims()
                    );
                }
                *current = bias;
                used += 1;
            }
        }
        if used < state.len() {
            tracing::warn!(
                unused = state.len() - used,
                "checkpoint holds tensors the model does not use"
            );
        }
        Ok(())
    }

    /// Write all parameters to `store`.
    pub fn save(&self, store: &impl CheckpointStore) -> anyhow::Result<()> {
        store.save(&self.state_dict())
    }

    /// Load parameters from `store`, accepting native or snapshot names.
    pub fn load(
        &mut self,
        store: &impl CheckpointStore,
        device: &B::Device,
    ) -> anyhow::Result<()> {
        let raw = store.load()?;
        let state = normalize_names(raw, self.encoder.stages.len());
        self.load_state_dict(&state, device)?;
        tracing::info!(params = self.num_params(), "loaded model weights");
        Ok(())
    }
}
