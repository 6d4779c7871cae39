//! # wavenet - Mel-conditioned autoregressive WaveNet vocoder
//!
//! Turns mel spectrograms into mu-law sample sequences one sample at a time,
//! with a full-sequence evaluation path that produces the same logits for
//! teacher-forced scoring.
//!
//! ## Architecture Overview
//!
//! 1. **Condition upsampler** ([`ConditionUpsampler`]): transposed convolutions
//!    stretch mel frames to the sample rate, then a 1x1 projection per residual
//!    layer produces that layer's conditioning.
//!
//! 2. **Decoder** ([`Vocoder`]): causal embedding, a stack of dilated gated
//!    residual layers with skip connections, and two 1x1 output projections.
//!    [`Vocoder::evaluate_full`] runs a whole sequence at once;
//!    [`Vocoder::generate_step`] advances a streaming session by one sample,
//!    reading past inputs from bounded history buffers.
//!
//! 3. **Generator** ([`Generator`]): samples each next class from the
//!    decoder's logits and feeds it back as the following input.
//!
//! ## Quick Start
//!
//! ```no_run
//! use burn_ndarray::{NdArray, NdArrayDevice};
//! use std::path::Path;
//! use wavenet::{VocodeParams, VocoderRuntime};
//!
//! let device = NdArrayDevice::default();
//! let runtime =
//!     VocoderRuntime::<NdArray<f32>>::from_config_path("wavenet.yaml", None, &device).unwrap();
//! let mel = runtime.mel_from_wav(Path::new("speech.wav")).unwrap();
//! let samples = runtime.vocode_to_vec(&mel, &VocodeParams::default()).unwrap();
//! println!("generated {} samples", samples.len());
//! ```
//!
//! ## Streaming Sessions
//!
//! ```no_run
//! # use burn_ndarray::{NdArray, NdArrayDevice};
//! # use burn::tensor::Tensor;
//! # use wavenet::{load_config, WaveNetModel};
//! # let config = load_config("wavenet.yaml").unwrap();
//! # let device = NdArrayDevice::default();
//! # let model = WaveNetModel::<NdArray<f32>>::init(&config, 0, &device).unwrap();
//! # let mel = Tensor::<NdArray<f32>, 3>::zeros([1, 128, 4], &device);
//! let conditions = model.conditions(mel).unwrap();
//! let mut state = model.decoder.init_streaming(1);
//! let mut input = Tensor::zeros([1, model.num_classes(), 1], &device);
//! for t in 0..conditions.dims()[3] {
//!     let step = conditions.clone().narrow(3, t, 1);
//!     let logits = model.decoder.generate_step(&mut state, input, step).unwrap();
//!     input = logits; // feed a sampled one-hot here in practice
//! }
//! ```
//!
//! ## Configuration
//!
//! Models are configured via YAML files describing the architecture, the
//! audio front end and the weights location. Weights load from local files or
//! from HuggingFace Hub through the `hf://` URL scheme. See [`Config`].

// Public modules - these are part of the stable API
pub mod audio;
pub mod codec;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod perf;
pub mod runtime;

// Internal modules - exposed for integration tests but not part of stable API.
#[doc(hidden)]
pub mod model;
#[doc(hidden)]
pub mod modules;
#[doc(hidden)]
pub mod state;
#[doc(hidden)]
pub mod weights;

// Re-exports forming the public API
pub use codec::{MuLaw, QuantizationCodec};
pub use config::{load_config, Config};
pub use download::download_if_necessary;
pub use error::{Result, VocoderError};
pub use model::generator::{Generator, SamplerConfig};
pub use model::vocoder::{Vocoder, VocoderState};
pub use model::wavenet::WaveNetModel;
pub use modules::upsample::ConditionUpsampler;
pub use runtime::{VocodeParams, VocoderRuntime};
pub use state::{SessionPhase, StreamingModule};
