//! Streaming session state shared across the vocoder.
//!
//! Every component that can run one sample at a time implements
//! [`StreamingModule`]. The state it returns is owned by the caller and passed
//! back into each step, so one set of weights can serve any number of
//! independent sessions.

use burn::tensor::backend::Backend;

/// Trait implemented by modules that keep per-session streaming state.
pub trait StreamingModule<B: Backend> {
    /// Concrete state type for this module.
    type State;

    /// Allocate a fresh, zeroed state for `batch_size` parallel sequences.
    fn init_state(&self, batch_size: usize) -> Self::State;
}

/// Lifecycle of a streaming session.
///
/// A session starts [`SessionPhase::Uninitialized`] when built through
/// `Default`, moves to [`SessionPhase::Streaming`] once its buffers are
/// allocated, and ends when the owner drops or finishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No buffers allocated; stepping is an error.
    #[default]
    Uninitialized,
    /// Buffers allocated; `steps` generation steps have run.
    Streaming {
        /// Number of completed steps.
        steps: usize,
    },
}

impl SessionPhase {
    /// True once buffers have been allocated.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Completed steps, zero when uninitialized.
    pub fn steps(&self) -> usize {
        match self {
            Self::Uninitialized => 0,
            Self::Streaming { steps } => *steps,
        }
    }

    /// Record one more completed step.
    pub fn advance(&mut self) {
        if let Self::Streaming { steps } = self {
            *steps = steps.saturating_add(1);
        }
    }
}
