//! Sliding-window activation history for one causal convolution.

use burn::tensor::{backend::Backend, Tensor};

/// Fixed-length window of the most recent timesteps fed to a layer.
///
/// Holds `[batch, channels, window_len]`; every push evicts the oldest step.
/// Starts zero-filled, which matches the zero padding of the full-sequence path.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<B: Backend> {
    window: Tensor<B, 3>,
}

impl<B: Backend> HistoryBuffer<B> {
    /// Allocate a zeroed buffer.
    pub fn initialize(
        batch_size: usize,
        channels: usize,
        window_len: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            window: Tensor::zeros([batch_size, channels, window_len.max(1)], device),
        }
    }

    /// Append `[batch, channels, 1]` and drop the oldest timestep.
    pub fn push(&mut self, step: Tensor<B, 3>) {
        debug_assert_eq!(step.dims()[2], 1, "history push expects a single timestep");
        let [_, _, window_len] = self.window.dims();
        if window_len == 1 {
            self.window = step;
            return;
        }
        let kept = self.window.clone().narrow(2, 1, window_len - 1);
        self.window = Tensor::cat(vec![kept, step], 2);
    }

    /// Current window contents, oldest first.
    pub fn contents(&self) -> Tensor<B, 3> {
        self.window.clone()
    }

    /// Number of timesteps held.
    pub fn window_len(&self) -> usize {
        self.window.dims()[2]
    }

    /// Batch size the buffer was allocated for.
    pub fn batch_size(&self) -> usize {
        self.window.dims()[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn step(value: f32, device: &NdArrayDevice) -> Tensor<TestBackend, 3> {
        Tensor::from_floats([[[value]]], device)
    }

    #[test]
    fn fills_in_order_then_evicts_oldest() {
        let device = NdArrayDevice::default();
        let mut buffer = HistoryBuffer::<TestBackend>::initialize(1, 1, 5, &device);
        assert_eq!(
            buffer.contents().to_data().as_slice::<f32>().unwrap(),
            &[0.0; 5]
        );

        for value in 1..=5 {
            buffer.push(step(value as f32, &device));
        }
        assert_eq!(
            buffer.contents().to_data().as_slice::<f32>().unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0]
        );

        buffer.push(step(6.0, &device));
        assert_eq!(
            buffer.contents().to_data().as_slice::<f32>().unwrap(),
            &[2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(buffer.window_len(), 5);
    }

    #[test]
    fn single_step_window_replaces_contents() {
        let device = NdArrayDevice::default();
        let mut buffer = HistoryBuffer::<TestBackend>::initialize(2, 3, 1, &device);
        let next = Tensor::<TestBackend, 3>::ones([2, 3, 1], &device);
        buffer.push(next);
        assert_eq!(buffer.contents().dims(), [2, 3, 1]);
        assert_eq!(
            buffer.contents().to_data().as_slice::<f32>().unwrap(),
            &[1.0; 6]
        );
        assert_eq!(buffer.batch_size(), 2);
    }
}
