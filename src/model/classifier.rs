//! Teacher-forced cross-entropy and accuracy over next-sample classes.

use crate::error::{Result, VocoderError};
use burn::tensor::{activation::log_softmax, backend::Backend, ElementConversion, Int, Tensor};

/// Scalar metrics of one teacher-forced evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierReport {
    /// Mean categorical cross-entropy in nats.
    pub loss: f32,
    /// Fraction of timesteps whose argmax equals the target.
    pub accuracy: f32,
}

/// Cross-entropy and accuracy of `logits` `[batch, Q, time]` against `targets` `[batch, time]`.
pub fn loss_and_accuracy<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
) -> Result<ClassifierReport> {
    let [batch, classes, time] = logits.dims();
    if targets.dims() != [batch, time] {
        return Err(VocoderError::shape(
            "classifier.targets",
            [batch, time],
            targets.dims(),
        ));
    }
    if classes == 0 || time == 0 {
        return Err(VocoderError::shape(
            "classifier.logits",
            [batch, 1, 1],
            [batch, classes, time],
        ));
    }
    let targets = targets.reshape([batch, 1, time]);
    let log_probs = log_softmax(logits.clone(), 1);
    let picked = log_probs.gather(1, targets.clone());
    let loss = picked.mean().neg().into_scalar().elem::<f32>();

    let predicted = logits.argmax(1);
    let accuracy = predicted
        .equal(targets)
        .float()
        .mean()
        .into_scalar()
        .elem::<f32>();
    Ok(ClassifierReport { loss, accuracy })
}

/// Build an Int tensor `[batch, time]` from class sequences of equal length.
pub fn targets_tensor<B: Backend>(
    sequences: &[Vec<usize>],
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let time = sequences.first().map(Vec::len).unwrap_or(0);
    if sequences.iter().any(|s| s.len() != time) {
        return Err(VocoderError::shape(
            "classifier.targets",
            [sequences.len(), time],
            [sequences.len(), 0],
        ));
    }
    let values: Vec<i64> = sequences
        .iter()
        .flat_map(|s| s.iter().map(|&c| c as i64))
        .collect();
    Ok(Tensor::from_data(
        burn::tensor::TensorData::new(values, [sequences.len(), time]),
        device,
    ))
}
