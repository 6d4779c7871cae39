//! Model-level components built on the streaming modules.
//!
//! `vocoder` is the WaveNet decoder, `generator` drives it sample by sample,
//! `wavenet` pairs it with the conditioning encoder and `classifier` scores
//! teacher-forced output.

pub mod classifier;
pub mod generator;
pub mod vocoder;
pub mod wavenet;
