//! Convolutional building blocks shared by the encoder and decoder.
//!
//! Each causal block evaluates either a full sequence or a single step against
//! history held in caller-owned state.

pub mod conv;
pub mod history;
pub mod residual;
pub mod upsample;
