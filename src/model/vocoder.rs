//! Autoregressive WaveNet decoder.
//!
//! Maps one-hot quantized samples plus per-layer conditioning to logits over
//! the next sample's class. Runs either over a whole sequence (teacher forcing)
//! or one sample at a time against a [`VocoderState`].

use crate::error::{Result, VocoderError};
use crate::modules::conv::{CausalConv1dOp, CausalConvConfig};
use crate::modules::history::HistoryBuffer;
use crate::modules::residual::{ResidualStack, ResidualStackState};
use crate::state::{SessionPhase, StreamingModule};
use burn::tensor::{activation::relu, backend::Backend, Tensor, TensorData};
use rand::Rng;

/// Sizes of a [`Vocoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocoderConfig {
    /// Number of quantization classes.
    pub quantize: usize,
    /// Channels on the residual path.
    pub residual_channels: usize,
    /// Channels on the skip path.
    pub skip_channels: usize,
    /// Taps of each dilated convolution.
    pub filter_size: usize,
    /// Dilation of every residual layer, in order.
    pub dilations: Vec<usize>,
    /// Apply `tanh` after the input embedding.
    pub use_embed_tanh: bool,
}

/// Streaming session of a [`Vocoder`].
///
/// Built by [`Vocoder::init_streaming`]. A `Default` state is uninitialized
/// and every step on it fails with [`VocoderError::InvalidState`].
#[derive(Debug, Clone)]
pub struct VocoderState<B: Backend> {
    phase: SessionPhase,
    batch_size: usize,
    embed: Option<HistoryBuffer<B>>,
    proj1: Option<HistoryBuffer<B>>,
    proj2: Option<HistoryBuffer<B>>,
    stack: ResidualStackState<B>,
}

impl<B: Backend> Default for VocoderState<B> {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            batch_size: 0,
            embed: None,
            proj1: None,
            proj2: None,
            stack: ResidualStackState::default(),
        }
    }
}

impl<B: Backend> VocoderState<B> {
    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Batch size the session was allocated for.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Steps generated so far.
    pub fn steps(&self) -> usize {
        self.phase.steps()
    }

    /// End the session, returning how many steps it ran.
    pub fn finish(self) -> usize {
        self.phase.steps()
    }
}

/// Embedding conv, residual stack and two output projections.
#[derive(Debug, Clone)]
pub struct Vocoder<B: Backend> {
    pub(crate) embed: CausalConv1dOp<B>,
    pub(crate) stack: ResidualStack<B>,
    pub(crate) proj1: CausalConv1dOp<B>,
    pub(crate) proj2: CausalConv1dOp<B>,
    use_embed_tanh: bool,
}

impl<B: Backend> Vocoder<B> {
    /// Assemble from pre-built parts.
    pub fn new(
        embed: CausalConv1dOp<B>,
        stack: ResidualStack<B>,
        proj1: CausalConv1dOp<B>,
        proj2: CausalConv1dOp<B>,
        use_embed_tanh: bool,
    ) -> Self {
        Self {
            embed,
            stack,
            proj1,
            proj2,
            use_embed_tanh,
        }
    }

    /// Randomly initialised decoder.
    pub fn init<R: Rng>(config: &VocoderConfig, rng: &mut R, device: &B::Device) -> Result<Self> {
        if config.dilations.is_empty() {
            return Err(VocoderError::config("vocoder needs at least one residual layer"));
        }
        if config.filter_size == 0 || config.quantize == 0 || config.residual_channels == 0 {
            return Err(VocoderError::config(
                "filter_size, quantize and residual_channels must be non-zero",
            ));
        }
        let embed = CausalConv1dOp::init(
            CausalConvConfig::new(2, 1),
            config.quantize,
            config.residual_channels,
            false,
            rng,
            device,
        );
        let stack = ResidualStack::init(
            &config.dilations,
            config.filter_size,
            config.residual_channels,
            config.skip_channels,
            rng,
            device,
        );
        let proj1 = CausalConv1dOp::init(
            CausalConvConfig::pointwise(),
            config.skip_channels,
            config.skip_channels,
            false,
            rng,
            device,
        );
        let proj2 = CausalConv1dOp::init(
            CausalConvConfig::pointwise(),
            config.skip_channels,
            config.quantize,
            false,
            rng,
            device,
        );
        Ok(Self::new(embed, stack, proj1, proj2, config.use_embed_tanh))
    }

    /// Number of quantization classes.
    pub fn num_classes(&self) -> usize {
        self.embed.in_channels()
    }

    /// Channels on the residual path.
    pub fn residual_channels(&self) -> usize {
        self.embed.out_channels()
    }

    /// Number of residual layers.
    pub fn num_layers(&self) -> usize {
        self.stack.len()
    }

    /// The residual stack.
    pub fn stack(&self) -> &ResidualStack<B> {
        &self.stack
    }

    /// Device holding the parameters.
    pub fn device(&self) -> B::Device {
        self.embed.params.weight.device()
    }

    /// Input samples able to influence one output, embedding included.
    pub fn receptive_field(&self) -> usize {
        self.stack.receptive_field() + self.embed.config.window_len() - 1
    }

    /// Teacher-forced logits `[batch, Q, time]`.
    ///
    /// `input` is one-hot `[batch, Q, time]` with `time > 0`; `conditions` is
    /// `[layers, batch, 2R, time]`.
    pub fn evaluate_full(
        &self,
        input: Tensor<B, 3>,
        conditions: Tensor<B, 4>,
    ) -> Result<Tensor<B, 3>> {
        let [batch, _, time] = input.dims();
        if time == 0 {
            return Err(VocoderError::shape(
                "vocoder.input",
                [batch, self.num_classes(), 1],
                input.dims(),
            ));
        }
        self.check_conditions(&conditions, batch, time)?;
        let hidden = self.embed_input(self.embed.forward(input)?);
        let skip = self.stack.evaluate_full(hidden, conditions)?;
        let hidden = self.proj1.forward(relu(skip))?;
        self.proj2.forward(relu(hidden))
    }

    /// Allocate a zeroed streaming session for `batch_size` sequences.
    pub fn init_streaming(&self, batch_size: usize) -> VocoderState<B> {
        self.init_state(batch_size)
    }

    /// Logits `[batch, Q, 1]` for one step.
    ///
    /// `input` is the previous sample one-hot `[batch, Q, 1]`, `conditions` the
    /// current conditioning column `[layers, batch, 2R, 1]`.
    pub fn generate_step(
        &self,
        state: &mut VocoderState<B>,
        input: Tensor<B, 3>,
        conditions: Tensor<B, 4>,
    ) -> Result<Tensor<B, 3>> {
        if !state.phase.is_streaming() {
            return Err(VocoderError::state(
                "vocoder stepped before streaming was initialized",
            ));
        }
        let dims = input.dims();
        if dims[0] != state.batch_size {
            return Err(VocoderError::state(format!(
                "session allocated for batch {}, step has batch {}",
                state.batch_size, dims[0]
            )));
        }
        if dims[1] != self.num_classes() || dims[2] != 1 {
            return Err(VocoderError::shape(
                "vocoder.step",
                [state.batch_size, self.num_classes(), 1],
                dims,
            ));
        }
        self.check_conditions(&conditions, state.batch_size, 1)?;

        let hidden = step_through(&self.embed, state.embed.as_mut(), input)?;
        let hidden = self.embed_input(hidden);
        let skip = self
            .stack
            .generate_step(&mut state.stack, hidden, conditions)?;
        let hidden = step_through(&self.proj1, state.proj1.as_mut(), relu(skip))?;
        let logits = step_through(&self.proj2, state.proj2.as_mut(), relu(hidden))?;
        state.phase.advance();
        Ok(logits)
    }

    fn embed_input(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        if self.use_embed_tanh {
            hidden.tanh()
        } else {
            hidden
        }
    }

    fn check_conditions(
        &self,
        conditions: &Tensor<B, 4>,
        batch: usize,
        time: usize,
    ) -> Result<()> {
        let expected = [self.num_layers(), batch, 2 * self.residual_channels(), time];
        if conditions.dims() != expected {
            return Err(VocoderError::shape(
                "vocoder.conditions",
                expected,
                conditions.dims(),
            ));
        }
        Ok(())
    }
}

impl<B: Backend> StreamingModule<B> for Vocoder<B> {
    type State = VocoderState<B>;

    fn init_state(&self, batch_size: usize) -> Self::State {
        let device = self.device();
        let buffer = |op: &CausalConv1dOp<B>| {
            Some(HistoryBuffer::initialize(
                batch_size,
                op.in_channels(),
                op.config.window_len(),
                &device,
            ))
        };
        VocoderState {
            phase: SessionPhase::Streaming { steps: 0 },
            batch_size,
            embed: buffer(&self.embed),
            proj1: buffer(&self.proj1),
            proj2: buffer(&self.proj2),
            stack: self.stack.init_state(batch_size),
        }
    }
}

/// Push one step into `history` and convolve the resulting window.
fn step_through<B: Backend>(
    op: &CausalConv1dOp<B>,
    history: Option<&mut HistoryBuffer<B>>,
    step: Tensor<B, 3>,
) -> Result<Tensor<B, 3>> {
    let history = history.ok_or_else(|| VocoderError::state("missing history buffer"))?;
    history.push(step);
    op.forward_window(history.contents())
}

/// One-hot encode one class per batch item into `[batch, classes, 1]`.
pub fn one_hot<B: Backend>(
    classes: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<Tensor<B, 3>> {
    let mut values = vec![0.0_f32; classes.len() * num_classes];
    for (batch, &class) in classes.iter().enumerate() {
        if class >= num_classes {
            return Err(VocoderError::shape("one_hot", [num_classes], [class]));
        }
        values[batch * num_classes + class] = 1.0;
    }
    Ok(Tensor::from_data(
        TensorData::new(values, [classes.len(), num_classes, 1]),
        device,
    ))
}

/// One-hot encode `[batch][time]` class sequences into `[batch, classes, time]`.
pub fn one_hot_sequence<B: Backend>(
    sequences: &[Vec<usize>],
    num_classes: usize,
    device: &B::Device,
) -> Result<Tensor<B, 3>> {
    let time = sequences.first().map(Vec::len).unwrap_or(0);
    let mut values = vec![0.0_f32; sequences.len() * num_classes * time];
    for (batch, sequence) in sequences.iter().enumerate() {
        if sequence.len() != time {
            return Err(VocoderError::shape(
                "one_hot_sequence",
                [sequences.len(), time],
                [sequences.len(), sequence.len()],
            ));
        }
        for (t, &class) in sequence.iter().enumerate() {
            if class >= num_classes {
                return Err(VocoderError::shape("one_hot_sequence", [num_classes], [class]));
            }
            values[(batch * num_classes + class) * time + t] = 1.0;
        }
    }
    Ok(Tensor::from_data(
        TensorData::new(values, [sequences.len(), num_classes, time]),
        device,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::residual::dilation_schedule;
    use burn::tensor::{Distribution, Tolerance};
    use burn_ndarray::{NdArray, NdArrayDevice};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn tiny() -> Vocoder<TestBackend> {
        let config = VocoderConfig {
            quantize: 8,
            residual_channels: 4,
            skip_channels: 6,
            filter_size: 2,
            dilations: dilation_schedule(2, 2),
            use_embed_tanh: true,
        };
        Vocoder::init(&config, &mut StdRng::seed_from_u64(21), &NdArrayDevice::default())
            .expect("init")
    }

    #[test]
    fn streaming_matches_teacher_forcing() {
        let device = NdArrayDevice::default();
        let vocoder = tiny();
        let time = 9;
        let classes = vec![
            vec![0, 3, 7, 1, 1, 5, 2, 6, 4],
            vec![2, 2, 0, 7, 3, 3, 1, 0, 5],
        ];
        let input = one_hot_sequence::<TestBackend>(&classes, 8, &device).expect("one-hot");
        let conditions = Tensor::<TestBackend, 4>::random(
            [4, 2, 8, time],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let full = vocoder
            .evaluate_full(input.clone(), conditions.clone())
            .expect("full");

        let mut state = vocoder.init_streaming(2);
        let mut steps = Vec::new();
        for t in 0..time {
            steps.push(
                vocoder
                    .generate_step(
                        &mut state,
                        input.clone().narrow(2, t, 1),
                        conditions.clone().narrow(3, t, 1),
                    )
                    .expect("step"),
            );
        }
        assert_eq!(state.steps(), time);
        Tensor::cat(steps, 2)
            .to_data()
            .assert_approx_eq(&full.to_data(), Tolerance::<f32>::absolute(1e-4));
        assert_eq!(state.finish(), time);
    }

    #[test]
    fn default_state_is_uninitialized() {
        let device = NdArrayDevice::default();
        let vocoder = tiny();
        let mut state = VocoderState::default();
        let err = vocoder
            .generate_step(
                &mut state,
                Tensor::zeros([1, 8, 1], &device),
                Tensor::zeros([4, 1, 8, 1], &device),
            )
            .unwrap_err();
        assert!(matches!(err, VocoderError::InvalidState(_)));
    }

    #[test]
    fn batch_mismatch_is_invalid_state() {
        let device = NdArrayDevice::default();
        let vocoder = tiny();
        let mut state = vocoder.init_streaming(1);
        let err = vocoder
            .generate_step(
                &mut state,
                Tensor::zeros([2, 8, 1], &device),
                Tensor::zeros([4, 2, 8, 1], &device),
            )
            .unwrap_err();
        assert!(matches!(err, VocoderError::InvalidState(_)));
    }

    #[test]
    fn full_rejects_condition_length_mismatch() {
        let device = NdArrayDevice::default();
        let vocoder = tiny();
        let err = vocoder
            .evaluate_full(
                Tensor::zeros([1, 8, 6], &device),
                Tensor::zeros([4, 1, 8, 5], &device),
            )
            .unwrap_err();
        assert!(matches!(err, VocoderError::InvalidShape { .. }));
    }

    #[test]
    fn full_rejects_empty_sequence() {
        let device = NdArrayDevice::default();
        let vocoder = tiny();
        let err = vocoder
            .evaluate_full(
                Tensor::zeros([1, 8, 0], &device),
                Tensor::zeros([4, 1, 8, 0], &device),
            )
            .unwrap_err();
        assert!(matches!(err, VocoderError::InvalidShape { .. }));
    }

    #[test]
    fn receptive_field_includes_embedding() {
        // stack [1, 2, 1, 2] -> 1 + 1 + 2 + 1 + 2 = 7, embed adds 1
        assert_eq!(tiny().receptive_field(), 8);
    }

    #[test]
    fn one_hot_places_ones() {
        let device = NdArrayDevice::default();
        let encoded = one_hot::<TestBackend>(&[2, 0], 3, &device).expect("one-hot");
        assert_eq!(encoded.dims(), [2, 3, 1]);
        assert_eq!(
            encoded.to_data().as_slice::<f32>().unwrap(),
            &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0]
        );
        assert!(one_hot::<TestBackend>(&[3], 3, &device).is_err());
    }
}
