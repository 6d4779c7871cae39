//! Causal 1D convolution primitives with a full-sequence and a windowed path.
//!
//! The full path pads both sides and crops the tail so output `t` only sees
//! inputs `<= t`. The windowed path convolves an exact receptive-field window
//! (kept by a [`HistoryBuffer`](crate::modules::history::HistoryBuffer)) with no
//! padding and yields the single newest output. Both paths read the same
//! weights, so they agree numerically.

use crate::error::{Result, VocoderError};
use burn::tensor::{
    backend::Backend,
    module::{conv1d, conv_transpose1d},
    ops::{ConvOptions, ConvTransposeOptions},
    Tensor, TensorData,
};
use rand::Rng;
use rand_distr::StandardNormal;

/// Weight and optional bias of a convolution.
#[derive(Debug, Clone)]
pub struct ConvWeights<B: Backend> {
    /// Weight tensor: `[out, in, kernel]` for convs, `[in, out, kernel]` for transposed convs.
    pub weight: Tensor<B, 3>,
    /// Optional bias `[out]`.
    pub bias: Option<Tensor<B, 1>>,
}

impl<B: Backend> ConvWeights<B> {
    /// Wrap existing tensors.
    pub fn new(weight: Tensor<B, 3>, bias: Option<Tensor<B, 1>>) -> Self {
        Self { weight, bias }
    }

    /// LeCun-normal weights (`std = 1/sqrt(fan_in)`) and zero bias.
    ///
    /// `fan_in` is the number of inputs feeding one output element.
    pub fn lecun_normal<R: Rng>(
        shape: [usize; 3],
        fan_in: usize,
        bias_len: Option<usize>,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let std = 1.0 / (fan_in.max(1) as f32).sqrt();
        let count = shape.iter().product::<usize>();
        let values: Vec<f32> = (0..count)
            .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
            .collect();
        let weight = Tensor::from_data(TensorData::new(values, shape), device);
        let bias = bias_len.map(|len| Tensor::zeros([len], device));
        Self { weight, bias }
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        let weight = self.weight.dims().iter().product::<usize>();
        let bias = self.bias.as_ref().map(|b| b.dims()[0]).unwrap_or(0);
        weight + bias
    }
}

/// Kernel geometry of a causal convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalConvConfig {
    /// Kernel size in samples.
    pub kernel_size: usize,
    /// Dilation factor.
    pub dilation: usize,
}

impl CausalConvConfig {
    /// Kernel of `kernel_size` taps spaced `dilation` apart.
    pub fn new(kernel_size: usize, dilation: usize) -> Self {
        Self {
            kernel_size,
            dilation,
        }
    }

    /// A pointwise (1x1) convolution.
    pub fn pointwise() -> Self {
        Self::new(1, 1)
    }

    /// Left context needed to keep the output causal.
    pub fn padding(&self) -> usize {
        self.dilation * self.kernel_size.saturating_sub(1)
    }

    /// Number of timesteps one output reads: `dilation * (kernel - 1) + 1`.
    pub fn window_len(&self) -> usize {
        self.padding() + 1
    }
}

impl Default for CausalConvConfig {
    fn default() -> Self {
        Self::pointwise()
    }
}

/// Causal 1D convolution op.
#[derive(Debug, Clone)]
pub struct CausalConv1dOp<B: Backend> {
    /// Kernel geometry.
    pub config: CausalConvConfig,
    /// Learned parameters.
    pub params: ConvWeights<B>,
}

impl<B: Backend> CausalConv1dOp<B> {
    /// Create a new causal conv op.
    pub fn new(config: CausalConvConfig, params: ConvWeights<B>) -> Self {
        Self { config, params }
    }

    /// Randomly initialised op mapping `in_channels` to `out_channels`.
    pub fn init<R: Rng>(
        config: CausalConvConfig,
        in_channels: usize,
        out_channels: usize,
        bias: bool,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let params = ConvWeights::lecun_normal(
            [out_channels, in_channels, config.kernel_size],
            in_channels * config.kernel_size,
            bias.then_some(out_channels),
            rng,
            device,
        );
        Self::new(config, params)
    }

    /// Input channel count.
    pub fn in_channels(&self) -> usize {
        self.params.weight.dims()[1]
    }

    /// Output channel count.
    pub fn out_channels(&self) -> usize {
        self.params.weight.dims()[0]
    }

    /// Convolve a whole `[batch, in, time]` sequence, returning `[batch, out, time]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        self.check_channels(&input)?;
        let len = input.dims()[2];
        let padding = self.config.padding();
        let output = self.conv(input, padding);
        if padding == 0 {
            return Ok(output);
        }
        // Symmetric padding adds `padding` extra steps at the end; drop them.
        Ok(output.narrow(2, 0, len))
    }

    /// Convolve one receptive-field window `[batch, in, window_len]` into `[batch, out, 1]`.
    pub fn forward_window(&self, window: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        self.check_channels(&window)?;
        let dims = window.dims();
        let window_len = self.config.window_len();
        if dims[2] != window_len {
            return Err(VocoderError::shape(
                "causal_conv.window",
                [dims[0], dims[1], window_len],
                dims,
            ));
        }
        Ok(self.conv(window, 0))
    }

    fn conv(&self, input: Tensor<B, 3>, padding: usize) -> Tensor<B, 3> {
        conv1d(
            input,
            self.params.weight.clone(),
            self.params.bias.clone(),
            ConvOptions::new([1], [padding], [self.config.dilation], 1),
        )
    }

    fn check_channels(&self, input: &Tensor<B, 3>) -> Result<()> {
        let dims = input.dims();
        if dims[1] != self.in_channels() {
            return Err(VocoderError::shape(
                "causal_conv",
                [dims[0], self.in_channels(), dims[2]],
                dims,
            ));
        }
        Ok(())
    }
}

/// Transposed 1D convolution whose kernel equals its stride.
///
/// Each input frame expands into exactly `factor` output steps with no overlap,
/// so output length is `frames * factor`.
#[derive(Debug, Clone)]
pub struct Upsample1dOp<B: Backend> {
    /// Temporal expansion factor (kernel size and stride).
    pub factor: usize,
    /// Learned parameters, weight `[in, out, factor]`.
    pub params: ConvWeights<B>,
}

impl<B: Backend> Upsample1dOp<B> {
    /// Create a new upsampling op.
    pub fn new(factor: usize, params: ConvWeights<B>) -> Self {
        Self { factor, params }
    }

    /// Randomly initialised op mapping `in_channels` to `out_channels`.
    pub fn init<R: Rng>(
        factor: usize,
        in_channels: usize,
        out_channels: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let params = ConvWeights::lecun_normal(
            [in_channels, out_channels, factor],
            in_channels,
            Some(out_channels),
            rng,
            device,
        );
        Self::new(factor, params)
    }

    /// Input channel count.
    pub fn in_channels(&self) -> usize {
        self.params.weight.dims()[0]
    }

    /// Output channel count.
    pub fn out_channels(&self) -> usize {
        self.params.weight.dims()[1]
    }

    /// Expand `[batch, in, frames]` into `[batch, out, frames * factor]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let dims = input.dims();
        if dims[1] != self.in_channels() {
            return Err(VocoderError::shape(
                "upsample",
                [dims[0], self.in_channels(), dims[2]],
                dims,
            ));
        }
        Ok(conv_transpose1d(
            input,
            self.params.weight.clone(),
            self.params.bias.clone(),
            ConvTransposeOptions::new([self.factor], [0], [0], [1], 1),
        ))
    }
}
