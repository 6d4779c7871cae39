//! Sequential sampling loop over a [`Vocoder`].
//!
//! Each step feeds the previous sample (one-hot) and the current conditioning
//! column to the decoder, turns the logits into a categorical distribution and
//! draws the next class. Generation starts from an all-zero input.

use crate::error::{Result, VocoderError};
use crate::model::vocoder::{one_hot, Vocoder};
use crate::perf::{self, Metric};
use burn::tensor::{backend::Backend, Tensor};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::ControlFlow;

/// Sampling configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Logits are divided by this before the softmax.
    pub temperature: f32,
    /// Random seed (None = seeded from entropy).
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            seed: None,
        }
    }
}

/// Draws classes from per-step logits.
#[derive(Debug)]
pub struct Sampler {
    temperature: f64,
    rng: StdRng,
}

impl Sampler {
    /// Create a sampler; the temperature must be finite and positive.
    pub fn new(config: &SamplerConfig) -> Result<Self> {
        if !(config.temperature.is_finite() && config.temperature > 0.0) {
            return Err(VocoderError::config(format!(
                "sampling temperature must be positive, got {}",
                config.temperature
            )));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            temperature: f64::from(config.temperature),
            rng,
        })
    }

    /// Softmax over `logits` (in f64) and draw one class.
    pub fn sample(&mut self, logits: &[f32], step: usize) -> Result<usize> {
        if logits.is_empty() || logits.iter().any(|v| !v.is_finite()) {
            return Err(VocoderError::NonFiniteLogits { step });
        }
        let scaled: Vec<f64> = logits
            .iter()
            .map(|&v| f64::from(v) / self.temperature)
            .collect();
        let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = scaled.iter().map(|v| (v - max).exp()).collect();
        let dist =
            WeightedIndex::new(&weights).map_err(|_| VocoderError::NonFiniteLogits { step })?;
        Ok(dist.sample(&mut self.rng))
    }
}

/// Autoregressive generator borrowing a decoder.
pub struct Generator<'a, B: Backend> {
    vocoder: &'a Vocoder<B>,
    sampler: Sampler,
}

impl<'a, B: Backend> Generator<'a, B> {
    /// Create a generator over `vocoder`.
    pub fn new(vocoder: &'a Vocoder<B>, config: &SamplerConfig) -> Result<Self> {
        Ok(Self {
            vocoder,
            sampler: Sampler::new(config)?,
        })
    }

    /// Generate `num_steps` samples; result is indexed `[step][batch]`.
    ///
    /// `conditions` is `[layers, batch, 2R, time]` with `time >= num_steps`.
    pub fn run(&mut self, conditions: Tensor<B, 4>, num_steps: usize) -> Result<Vec<Vec<usize>>> {
        let mut output = Vec::with_capacity(num_steps);
        self.run_chunked(conditions, num_steps, num_steps.max(1), |chunk| {
            output.extend_from_slice(chunk);
            ControlFlow::Continue(())
        })?;
        Ok(output)
    }

    /// Generate in chunks of `chunk_size` steps, handing each to `sink`.
    ///
    /// The sink may return [`ControlFlow::Break`] to stop early. Returns the
    /// number of steps generated.
    pub fn run_chunked<F>(
        &mut self,
        conditions: Tensor<B, 4>,
        num_steps: usize,
        chunk_size: usize,
        mut sink: F,
    ) -> Result<usize>
    where
        F: FnMut(&[Vec<usize>]) -> ControlFlow<()>,
    {
        let [_, batch, _, available] = conditions.dims();
        if num_steps > available {
            return Err(VocoderError::IndexOutOfRange {
                requested: num_steps,
                available,
            });
        }
        if chunk_size == 0 {
            return Err(VocoderError::config("chunk size must be non-zero"));
        }
        if num_steps == 0 {
            return Ok(0);
        }

        let num_classes = self.vocoder.num_classes();
        let device = conditions.device();
        let mut state = self.vocoder.init_streaming(batch);
        let mut current = Tensor::<B, 3>::zeros([batch, num_classes, 1], &device);
        let mut chunk: Vec<Vec<usize>> = Vec::with_capacity(chunk_size);
        let mut produced = 0;

        for step in 0..num_steps {
            let logits = {
                let _span = perf::span(Metric::DecoderStep);
                self.vocoder.generate_step(
                    &mut state,
                    current,
                    conditions.clone().narrow(3, step, 1),
                )?
            };
            let values: Vec<f32> = logits.into_data().iter::<f32>().collect();
            let classes = {
                let _span = perf::span(Metric::Sample);
                values
                    .chunks(num_classes)
                    .map(|row| self.sampler.sample(row, step))
                    .collect::<Result<Vec<_>>>()?
            };
            current = one_hot(&classes, num_classes, &device)?;
            chunk.push(classes);
            produced += 1;

            if chunk.len() == chunk_size || step + 1 == num_steps {
                perf::add_count(Metric::GeneratedSamples, chunk.len() as u64);
                perf::add_count(Metric::GeneratedChunks, 1);
                tracing::debug!(produced, total = num_steps, "generated chunk");
                let flow = sink(&chunk);
                chunk.clear();
                if flow.is_break() {
                    tracing::info!(produced, "generation stopped by caller");
                    break;
                }
            }
        }
        state.finish();
        Ok(produced)
    }
}
