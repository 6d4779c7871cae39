//! Shared test utilities for fixtures, tiny models and tensor comparison.
#![allow(dead_code)]

use burn::tensor::{Distribution, Tensor, TensorData};
use burn_ndarray::{NdArray, NdArrayDevice};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use wavenet::audio::io::WavIo;
use wavenet::config::{load_config, Config};
use wavenet::model::wavenet::WaveNetModel;

pub type TestBackend = NdArray<f32>;

pub const FIXTURE_DIR: &str = "tests/fixtures";

/// The small architecture from `tests/fixtures/tiny_config.yaml`.
pub fn tiny_config() -> Config {
    load_config(format!("{FIXTURE_DIR}/tiny_config.yaml")).expect("load tiny config")
}

/// Randomly initialised tiny model.
pub fn tiny_model(seed: u64) -> WaveNetModel<TestBackend> {
    WaveNetModel::init(&tiny_config(), seed, &NdArrayDevice::default()).expect("init model")
}

/// Random mel input `[batch, n_mels, frames]`.
pub fn random_mel(
    batch: usize,
    n_mels: usize,
    frames: usize,
    device: &NdArrayDevice,
) -> Tensor<TestBackend, 3> {
    Tensor::random([batch, n_mels, frames], Distribution::Normal(0.0, 1.0), device)
}

/// Random class sequences `[batch][time]` in `0..classes`.
pub fn random_classes(batch: usize, time: usize, classes: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..batch)
        .map(|_| (0..time).map(|_| rng.gen_range(0..classes)).collect())
        .collect()
}

/// Write a decaying two-tone test signal.
pub fn write_test_wav(path: &Path, sample_rate: u32, samples: usize) {
    let rate = sample_rate as f32;
    let signal: Vec<f32> = (0..samples)
        .map(|n| {
            let t = n as f32 / rate;
            let envelope = (-2.0 * t).exp();
            envelope
                * (0.5 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                    + 0.2 * (2.0 * std::f32::consts::PI * 660.0 * t).sin())
        })
        .collect();
    WavIo::write_mono(path, &signal, sample_rate).expect("write wav");
}

/// Assert two tensor data slices are element-wise close within tolerance.
pub fn assert_close(a: &TensorData, b: &TensorData, tol: f32) {
    let a_slice = a.as_slice::<f32>().expect("a slice");
    let b_slice = b.as_slice::<f32>().expect("b slice");
    assert_eq!(
        a_slice.len(),
        b_slice.len(),
        "tensor length mismatch: {} vs {}",
        a_slice.len(),
        b_slice.len()
    );
    for (idx, (x, y)) in a_slice.iter().zip(b_slice.iter()).enumerate() {
        if (x - y).abs() > tol {
            panic!(
                "mismatch at {idx}: {x} vs {y} (diff: {}, tol: {tol})",
                (x - y).abs()
            );
        }
    }
}
