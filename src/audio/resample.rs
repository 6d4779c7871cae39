use anyhow::Result;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

#[derive(Debug, Default)]
pub struct AudioResampler;

impl AudioResampler {
    /// Average all channels into one.
    pub fn downmix(channels: Vec<Vec<f32>>) -> Result<Vec<f32>> {
        let mut channels = channels.into_iter();
        let Some(mut mixed) = channels.next() else {
            return Ok(Vec::new());
        };
        let mut count = 1usize;
        for channel in channels {
            if channel.len() != mixed.len() {
                anyhow::bail!("Channel length mismatch in downmix");
            }
            for (acc, value) in mixed.iter_mut().zip(channel) {
                *acc += value;
            }
            count += 1;
        }
        if count > 1 {
            let scale = 1.0 / count as f32;
            mixed.iter_mut().for_each(|v| *v *= scale);
        }
        Ok(mixed)
    }

    /// Sinc-resample a mono signal from `from_rate` to `to_rate`.
    pub fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
        if from_rate == to_rate || samples.is_empty() {
            return Ok(samples);
        }
        if from_rate == 0 || to_rate == 0 {
            anyhow::bail!("Cannot resample from {from_rate} Hz to {to_rate} Hz");
        }
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, samples.len(), 1)?;
        let mut output = resampler.process(&[samples], None)?;
        Ok(output.pop().unwrap_or_default())
    }
}
