//! Error taxonomy for the vocoder core.
//!
//! Core modules return [`VocoderError`] so callers can match on the failure
//! class. Application-edge code (config loading, checkpoints, the CLI) works
//! in `anyhow::Result`, into which these errors convert.

use thiserror::Error;

/// Result alias used throughout the model code.
pub type Result<T> = std::result::Result<T, VocoderError>;

/// Failures raised by the vocoder core. None are retried internally.
#[derive(Debug, Error)]
pub enum VocoderError {
    /// A tensor's rank or dimensions do not match what a layer expects.
    #[error("invalid shape in {context}: expected {expected:?}, got {actual:?}")]
    InvalidShape {
        /// Component that rejected the tensor.
        context: &'static str,
        /// Expected dimensions (0 means "any").
        expected: Vec<usize>,
        /// Dimensions that were supplied.
        actual: Vec<usize>,
    },

    /// A streaming step was attempted on a state that is not ready for it.
    #[error("invalid streaming state: {0}")]
    InvalidState(String),

    /// Upsampling factors do not reproduce the audio hop length.
    #[error("upsampling factors {factors:?} multiply to {product}, but hop length is {hop_length}")]
    Alignment {
        /// Configured temporal expansion factors.
        factors: Vec<usize>,
        /// Product of the factors.
        product: usize,
        /// Hop length used by feature extraction.
        hop_length: usize,
    },

    /// Generation asked for more steps than there is conditioning for.
    #[error("requested {requested} steps but only {available} conditioning frames are available")]
    IndexOutOfRange {
        /// Number of steps requested.
        requested: usize,
        /// Number of sample-rate conditioning frames supplied.
        available: usize,
    },

    /// Logits contained NaN or infinite values at sampling time.
    #[error("non-finite logits at step {step}")]
    NonFiniteLogits {
        /// Generation step that produced the logits.
        step: usize,
    },

    /// Invalid model or sampling configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl VocoderError {
    /// Build an [`VocoderError::InvalidShape`] from any dims-like inputs.
    pub fn shape(
        context: &'static str,
        expected: impl Into<Vec<usize>>,
        actual: impl Into<Vec<usize>>,
    ) -> Self {
        Self::InvalidShape {
            context,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Build an [`VocoderError::InvalidState`] with a message.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Build a [`VocoderError::Config`] with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_error_mentions_factors_and_hop() {
        let err = VocoderError::Alignment {
            factors: vec![4, 4],
            product: 16,
            hop_length: 256,
        };
        let msg = err.to_string();
        assert!(msg.contains("[4, 4]"));
        assert!(msg.contains("256"));
    }

    #[test]
    fn shape_constructor_builds_invalid_shape() {
        let err = VocoderError::shape("residual_layer", [1, 8, 0], [1, 4, 10]);
        assert!(matches!(err, VocoderError::InvalidShape { .. }));
        assert!(err.to_string().contains("residual_layer"));
    }
}
