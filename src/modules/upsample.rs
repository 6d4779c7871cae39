//! Frame-rate to sample-rate conditioning network.
//!
//! A chain of learned transposed convolutions stretches the mel frames by the
//! hop length, then one pointwise projection per residual layer produces that
//! layer's private conditioning slice.

use crate::error::{Result, VocoderError};
use crate::modules::conv::{CausalConv1dOp, CausalConvConfig, Upsample1dOp};
use burn::tensor::{activation::relu, backend::Backend, Tensor};
use rand::Rng;

/// Shape of a [`ConditionUpsampler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpsamplerConfig {
    /// Channels of the incoming conditioning (mel bins).
    pub in_channels: usize,
    /// Output channels of each upsampling stage.
    pub channels: Vec<usize>,
    /// Temporal expansion factor of each stage.
    pub factors: Vec<usize>,
    /// Number of residual layers to produce conditioning for.
    pub out_layers: usize,
    /// Residual channels of the vocoder; each projection emits twice this.
    pub residual_channels: usize,
    /// Audio hop length the expansion must reproduce.
    pub hop_length: usize,
}

impl ConditionUpsamplerConfig {
    /// Fail with [`VocoderError::Alignment`] unless the factors multiply to the hop length.
    pub fn validate(&self) -> Result<()> {
        if self.channels.len() != self.factors.len() {
            return Err(VocoderError::config(format!(
                "upsample channels ({}) and factors ({}) must have the same length",
                self.channels.len(),
                self.factors.len()
            )));
        }
        check_alignment(&self.factors, self.hop_length)
    }
}

/// Verify that `factors` multiply to `hop_length`.
pub fn check_alignment(factors: &[usize], hop_length: usize) -> Result<()> {
    let product = factors.iter().product::<usize>();
    if factors.is_empty() || factors.contains(&0) || product != hop_length {
        return Err(VocoderError::Alignment {
            factors: factors.to_vec(),
            product,
            hop_length,
        });
    }
    Ok(())
}

/// Upsampling stages followed by per-layer projections.
#[derive(Debug, Clone)]
pub struct ConditionUpsampler<B: Backend> {
    pub(crate) stages: Vec<Upsample1dOp<B>>,
    pub(crate) projections: Vec<CausalConv1dOp<B>>,
}

impl<B: Backend> ConditionUpsampler<B> {
    /// Assemble from pre-built ops, checking alignment against `hop_length`.
    pub fn new(
        stages: Vec<Upsample1dOp<B>>,
        projections: Vec<CausalConv1dOp<B>>,
        hop_length: usize,
    ) -> Result<Self> {
        let factors: Vec<usize> = stages.iter().map(|stage| stage.factor).collect();
        check_alignment(&factors, hop_length)?;
        Ok(Self {
            stages,
            projections,
        })
    }

    /// Randomly initialised upsampler.
    pub fn init<R: Rng>(
        config: &ConditionUpsamplerConfig,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;
        let mut in_channels = config.in_channels;
        let mut stages = Vec::with_capacity(config.factors.len());
        for (&channels, &factor) in config.channels.iter().zip(config.factors.iter()) {
            stages.push(Upsample1dOp::init(factor, in_channels, channels, rng, device));
            in_channels = channels;
        }
        let projections = (0..config.out_layers)
            .map(|_| {
                CausalConv1dOp::init(
                    CausalConvConfig::pointwise(),
                    in_channels,
                    2 * config.residual_channels,
                    true,
                    rng,
                    device,
                )
            })
            .collect();
        Self::new(stages, projections, config.hop_length)
    }

    /// Product of all expansion factors.
    pub fn hop_length(&self) -> usize {
        self.stages.iter().map(|stage| stage.factor).product()
    }

    /// Number of per-layer projections.
    pub fn num_layers(&self) -> usize {
        self.projections.len()
    }

    /// Expected channel count of the incoming conditioning.
    pub fn in_channels(&self) -> usize {
        self.stages
            .first()
            .map(Upsample1dOp::in_channels)
            .unwrap_or(0)
    }

    /// Stretch `[batch, mels, frames]` to `[batch, channels, frames * hop]`.
    pub fn expand(&self, condition: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let mut hidden = condition;
        for stage in &self.stages {
            hidden = relu(stage.forward(hidden)?);
        }
        Ok(hidden)
    }

    /// Produce per-layer conditioning `[layers, batch, 2R, frames * hop]`.
    pub fn transform(&self, condition: Tensor<B, 3>) -> Result<Tensor<B, 4>> {
        let dense = self.expand(condition)?;
        let per_layer = self
            .projections
            .iter()
            .map(|projection| projection.forward(dense.clone()))
            .collect::<Result<Vec<_>>>()?;
        if per_layer.is_empty() {
            return Err(VocoderError::config("condition upsampler has no projections"));
        }
        Ok(Tensor::stack(per_layer, 0))
    }
}
