//! Mu-law companding between waveforms and discrete sample classes.

/// Maps waveforms to class indices and back.
pub trait QuantizationCodec {
    /// Number of classes produced by [`encode`](Self::encode).
    fn classes(&self) -> usize;
    /// Quantize samples in `[-1, 1]` to class indices in `0..classes()`.
    fn encode(&self, waveform: &[f32]) -> Vec<usize>;
    /// Reconstruct samples from class indices.
    fn decode(&self, classes: &[usize]) -> Vec<f32>;
}

/// Logarithmic mu-law codec with `mu` classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuLaw {
    mu: usize,
}

impl MuLaw {
    /// Codec with `mu` classes (at least 2).
    pub fn new(mu: usize) -> Self {
        Self { mu: mu.max(2) }
    }

    /// Class that decodes to silence.
    pub fn silence(&self) -> usize {
        self.mu / 2
    }

    fn compress(&self, x: f32) -> f32 {
        let mu = self.mu as f32;
        let x = x.clamp(-1.0, 1.0);
        x.signum() * (1.0 + mu * x.abs()).ln() / (1.0 + mu).ln()
    }
}

impl Default for MuLaw {
    fn default() -> Self {
        Self::new(256)
    }
}

impl QuantizationCodec for MuLaw {
    fn classes(&self) -> usize {
        self.mu
    }

    fn encode(&self, waveform: &[f32]) -> Vec<usize> {
        let mu = self.mu as f32;
        waveform
            .iter()
            .map(|&x| {
                let x = if x.is_finite() { x } else { 0.0 };
                // bin edges are 2k/mu - 1
                let bin = ((self.compress(x) + 1.0) * mu / 2.0).floor();
                (bin.max(0.0) as usize).min(self.mu - 1)
            })
            .collect()
    }

    fn decode(&self, classes: &[usize]) -> Vec<f32> {
        let mu = self.mu as f32;
        classes
            .iter()
            .map(|&c| {
                let y = 2.0 * c.min(self.mu - 1) as f32 / mu - 1.0;
                if y == 0.0 {
                    return 0.0;
                }
                y.signum() / mu * ((1.0 + mu).powf(y.abs()) - 1.0)
            })
            .collect()
    }
}
