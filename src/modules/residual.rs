//! Gated residual blocks and the dilated stack built from them.
//!
//! Each [`ResidualLayer`] runs a causal dilated convolution, adds its slice of
//! the conditioning, gates with `tanh(a) * sigmoid(b)` and projects the result
//! twice: once back onto the residual path, once onto the skip path. The
//! [`ResidualStack`] chains layers along the dilation schedule and sums skips.

use crate::error::{Result, VocoderError};
use crate::modules::conv::{CausalConv1dOp, CausalConvConfig};
use crate::modules::history::HistoryBuffer;
use crate::state::StreamingModule;
use burn::tensor::{activation::sigmoid, backend::Backend, Tensor};
use rand::Rng;

/// Dilations for `n_loop` repetitions of `[1, 2, 4, ..., 2^(n_layer-1)]`.
pub fn dilation_schedule(n_loop: usize, n_layer: usize) -> Vec<usize> {
    (0..n_loop)
        .flat_map(|_| (0..n_layer).map(|i| 1_usize << i))
        .collect()
}

/// Geometry of one residual layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidualLayerConfig {
    /// Taps of the dilated convolution.
    pub filter_size: usize,
    /// Dilation of the dilated convolution.
    pub dilation: usize,
    /// Channels on the residual path.
    pub residual_channels: usize,
    /// Channels on the skip path.
    pub skip_channels: usize,
}

impl ResidualLayerConfig {
    /// Channels produced by the dilated convolution (tanh half + sigmoid half).
    pub fn dilated_channels(&self) -> usize {
        2 * self.residual_channels
    }

    /// Kernel geometry of the dilated convolution.
    pub fn conv_config(&self) -> CausalConvConfig {
        CausalConvConfig::new(self.filter_size, self.dilation)
    }
}

/// Streaming state of one residual layer.
///
/// `Default` yields an uninitialized state; stepping it is an error.
#[derive(Debug, Clone)]
pub struct ResidualLayerState<B: Backend> {
    history: Option<HistoryBuffer<B>>,
}

impl<B: Backend> Default for ResidualLayerState<B> {
    fn default() -> Self {
        Self { history: None }
    }
}

impl<B: Backend> ResidualLayerState<B> {
    /// The layer's input window, if streaming has been initialized.
    pub fn history(&self) -> Option<&HistoryBuffer<B>> {
        self.history.as_ref()
    }
}

/// One gated, dilated, causal residual block.
#[derive(Debug, Clone)]
pub struct ResidualLayer<B: Backend> {
    /// Dilated conv `[2R, R, filter_size]` with bias.
    pub(crate) conv: CausalConv1dOp<B>,
    /// Residual projection `[R, R, 1]` with bias.
    pub(crate) res: CausalConv1dOp<B>,
    /// Skip projection `[S, R, 1]` with bias.
    pub(crate) skip: CausalConv1dOp<B>,
}

impl<B: Backend> ResidualLayer<B> {
    /// Assemble a layer from its three convolutions.
    pub fn new(
        conv: CausalConv1dOp<B>,
        res: CausalConv1dOp<B>,
        skip: CausalConv1dOp<B>,
    ) -> Self {
        Self { conv, res, skip }
    }

    /// Randomly initialised layer.
    pub fn init<R: Rng>(config: ResidualLayerConfig, rng: &mut R, device: &B::Device) -> Self {
        let conv = CausalConv1dOp::init(
            config.conv_config(),
            config.residual_channels,
            config.dilated_channels(),
            true,
            rng,
            device,
        );
        let res = CausalConv1dOp::init(
            CausalConvConfig::pointwise(),
            config.residual_channels,
            config.residual_channels,
            true,
            rng,
            device,
        );
        let skip = CausalConv1dOp::init(
            CausalConvConfig::pointwise(),
            config.residual_channels,
            config.skip_channels,
            true,
            rng,
            device,
        );
        Self::new(conv, res, skip)
    }

    /// Dilation of the causal convolution.
    pub fn dilation(&self) -> usize {
        self.conv.config.dilation
    }

    /// History length needed for one streaming step.
    pub fn window_len(&self) -> usize {
        self.conv.config.window_len()
    }

    /// Channels on the residual path.
    pub fn residual_channels(&self) -> usize {
        self.conv.in_channels()
    }

    /// Channels on the skip path.
    pub fn skip_channels(&self) -> usize {
        self.skip.out_channels()
    }

    /// Evaluate a whole sequence.
    ///
    /// `input` is `[batch, R, time]` and `condition` is `[batch, 2R, time]`.
    /// Returns `(residual [batch, R, time], skip [batch, S, time])`.
    pub fn evaluate_full(
        &self,
        input: Tensor<B, 3>,
        condition: Tensor<B, 3>,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 3>)> {
        let hidden = self.conv.forward(input.clone())?;
        self.gate_and_project(hidden, condition, input)
    }

    /// Evaluate one timestep `[batch, R, 1]` against this session's history.
    pub fn generate_step(
        &self,
        state: &mut ResidualLayerState<B>,
        input: Tensor<B, 3>,
        condition: Tensor<B, 3>,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 3>)> {
        let history = state.history.as_mut().ok_or_else(|| {
            VocoderError::state("residual layer stepped before streaming was initialized")
        })?;
        let dims = input.dims();
        if dims[2] != 1 || dims[1] != self.residual_channels() {
            return Err(VocoderError::shape(
                "residual_layer.step",
                [dims[0], self.residual_channels(), 1],
                dims,
            ));
        }
        if dims[0] != history.batch_size() {
            return Err(VocoderError::state(format!(
                "session allocated for batch {}, step has batch {}",
                history.batch_size(),
                dims[0]
            )));
        }
        history.push(input.clone());
        let hidden = self.conv.forward_window(history.contents())?;
        self.gate_and_project(hidden, condition, input)
    }

    fn gate_and_project(
        &self,
        hidden: Tensor<B, 3>,
        condition: Tensor<B, 3>,
        input: Tensor<B, 3>,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 3>)> {
        let [batch, channels, len] = hidden.dims();
        if condition.dims() != [batch, channels, len] {
            return Err(VocoderError::shape(
                "residual_layer.condition",
                [batch, channels, len],
                condition.dims(),
            ));
        }
        let hidden = hidden + condition;
        let half = channels / 2;
        let filter = hidden.clone().narrow(1, 0, half).tanh();
        let gate = sigmoid(hidden.narrow(1, half, half));
        let gated = filter * gate;

        // The residual input may carry more history than the gated output.
        let input_len = input.dims()[2];
        let input = if input_len == len {
            input
        } else if input_len > len {
            input.narrow(2, input_len - len, len)
        } else {
            return Err(VocoderError::shape(
                "residual_layer.input",
                [batch, self.residual_channels(), len],
                input.dims(),
            ));
        };

        let residual = self.res.forward(gated.clone())? + input;
        let skip = self.skip.forward(gated)?;
        Ok((residual, skip))
    }
}

impl<B: Backend> StreamingModule<B> for ResidualLayer<B> {
    type State = ResidualLayerState<B>;

    fn init_state(&self, batch_size: usize) -> Self::State {
        let device = self.conv.params.weight.device();
        ResidualLayerState {
            history: Some(HistoryBuffer::initialize(
                batch_size,
                self.residual_channels(),
                self.window_len(),
                &device,
            )),
        }
    }
}

/// Per-layer streaming states of a [`ResidualStack`].
#[derive(Debug, Clone)]
pub struct ResidualStackState<B: Backend> {
    layers: Vec<ResidualLayerState<B>>,
}

impl<B: Backend> Default for ResidualStackState<B> {
    fn default() -> Self {
        Self { layers: Vec::new() }
    }
}

impl<B: Backend> ResidualStackState<B> {
    /// Per-layer states in schedule order.
    pub fn layers(&self) -> &[ResidualLayerState<B>] {
        &self.layers
    }
}

/// Residual layers applied in dilation-schedule order.
#[derive(Debug, Clone)]
pub struct ResidualStack<B: Backend> {
    pub(crate) layers: Vec<ResidualLayer<B>>,
}

impl<B: Backend> ResidualStack<B> {
    /// Wrap pre-built layers.
    pub fn new(layers: Vec<ResidualLayer<B>>) -> Self {
        Self { layers }
    }

    /// Randomly initialised stack following `dilations`.
    pub fn init<R: Rng>(
        dilations: &[usize],
        filter_size: usize,
        residual_channels: usize,
        skip_channels: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let layers = dilations
            .iter()
            .map(|&dilation| {
                let config = ResidualLayerConfig {
                    filter_size,
                    dilation,
                    residual_channels,
                    skip_channels,
                };
                ResidualLayer::init(config, rng, device)
            })
            .collect();
        Self::new(layers)
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True when the stack has no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers in schedule order.
    pub fn layers(&self) -> &[ResidualLayer<B>] {
        &self.layers
    }

    /// Dilation of each layer, in order.
    pub fn dilations(&self) -> Vec<usize> {
        self.layers.iter().map(ResidualLayer::dilation).collect()
    }

    /// Input timesteps that can influence one stack output.
    pub fn receptive_field(&self) -> usize {
        1 + self
            .layers
            .iter()
            .map(|layer| layer.window_len() - 1)
            .sum::<usize>()
    }

    /// Run all layers over a sequence and return the summed skip `[batch, S, time]`.
    ///
    /// `conditions` is `[layers, batch, 2R, time]`.
    pub fn evaluate_full(
        &self,
        mut input: Tensor<B, 3>,
        conditions: Tensor<B, 4>,
    ) -> Result<Tensor<B, 3>> {
        self.check_conditions(&conditions)?;
        let mut skips: Option<Tensor<B, 3>> = None;
        for (idx, layer) in self.layers.iter().enumerate() {
            let condition = layer_condition(&conditions, idx);
            let (residual, skip) = layer.evaluate_full(input, condition)?;
            input = residual;
            skips = Some(match skips {
                Some(acc) => acc + skip,
                None => skip,
            });
        }
        skips.ok_or_else(|| VocoderError::config("residual stack has no layers"))
    }

    /// Run all layers for one timestep; `conditions` is `[layers, batch, 2R, 1]`.
    pub fn generate_step(
        &self,
        state: &mut ResidualStackState<B>,
        mut input: Tensor<B, 3>,
        conditions: Tensor<B, 4>,
    ) -> Result<Tensor<B, 3>> {
        if state.layers.len() != self.layers.len() {
            return Err(VocoderError::state(format!(
                "stack state holds {} layers, model has {}",
                state.layers.len(),
                self.layers.len()
            )));
        }
        self.check_conditions(&conditions)?;
        let mut skips: Option<Tensor<B, 3>> = None;
        for (idx, (layer, layer_state)) in
            self.layers.iter().zip(state.layers.iter_mut()).enumerate()
        {
            let condition = layer_condition(&conditions, idx);
            let (residual, skip) = layer.generate_step(layer_state, input, condition)?;
            input = residual;
            skips = Some(match skips {
                Some(acc) => acc + skip,
                None => skip,
            });
        }
        skips.ok_or_else(|| VocoderError::config("residual stack has no layers"))
    }

    fn check_conditions(&self, conditions: &Tensor<B, 4>) -> Result<()> {
        let dims = conditions.dims();
        if dims[0] != self.layers.len() {
            return Err(VocoderError::shape(
                "residual_stack.conditions",
                [self.layers.len(), dims[1], dims[2], dims[3]],
                dims,
            ));
        }
        Ok(())
    }
}

impl<B: Backend> StreamingModule<B> for ResidualStack<B> {
    type State = ResidualStackState<B>;

    fn init_state(&self, batch_size: usize) -> Self::State {
        ResidualStackState {
            layers: self
                .layers
                .iter()
                .map(|layer| layer.init_state(batch_size))
                .collect(),
        }
    }
}

/// Slice `[layers, batch, channels, time]` down to one layer's `[batch, channels, time]`.
fn layer_condition<B: Backend>(conditions: &Tensor<B, 4>, idx: usize) -> Tensor<B, 3> {
    let [_, batch, channels, time] = conditions.dims();
    conditions
        .clone()
        .narrow(0, idx, 1)
        .reshape([batch, channels, time])
}
