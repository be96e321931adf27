//! Channel mixing and sample-rate conversion for dataset audio.

use crate::error::{Result, TtsError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

#[derive(Debug, Default)]
pub struct AudioResampler;

impl AudioResampler {
    /// Mix `samples` to `to_channels` and resample from `from_rate` to `to_rate`.
    pub fn convert_audio(
        samples: Vec<Vec<f32>>,
        from_rate: u32,
        to_rate: u32,
        to_channels: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let samples = mix_channels(samples, to_channels)?;
        if from_rate == to_rate || samples.is_empty() || samples[0].is_empty() {
            return Ok(samples);
        }

        let channels = samples.len();
        let input_len = samples[0].len();
        let ratio = to_rate as f64 / from_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_len, channels)
            .map_err(|e| TtsError::Audio(format!("resampler setup: {e}")))?;
        resampler
            .process(&samples, None)
            .map_err(|e| TtsError::Audio(format!("resampling {from_rate} -> {to_rate}: {e}")))
    }
}

fn mix_channels(samples: Vec<Vec<f32>>, to_channels: usize) -> Result<Vec<Vec<f32>>> {
    let from_channels = samples.len();
    if from_channels == 0 || from_channels == to_channels {
        return Ok(samples);
    }
    if to_channels == 1 {
        let len = samples[0].len();
        if samples.iter().any(|c| c.len() != len) {
            return Err(TtsError::Audio("channel length mismatch".to_string()));
        }
        let scale = 1.0 / from_channels as f32;
        let mixed = (0..len)
            .map(|i| samples.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect();
        return Ok(vec![mixed]);
    }
    if from_channels == 1 {
        return Ok(vec![samples[0].clone(); to_channels]);
    }
    Err(TtsError::Audio(format!(
        "unsupported channel conversion from {from_channels} to {to_channels}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmixes_stereo_by_averaging() {
        let samples = vec![vec![1.0_f32, 0.0], vec![0.0, -1.0]];
        let mono = AudioResampler::convert_audio(samples, 8000, 8000, 1).expect("mix");
        assert_eq!(mono, vec![vec![0.5, -0.5]]);
    }

    #[test]
    fn resampling_scales_length() {
        let samples = vec![vec![0.0_f32; 4800]];
        let output = AudioResampler::convert_audio(samples, 48000, 16000, 1).expect("resample");
        assert_eq!(output.len(), 1);
        let len = output[0].len() as f32;
        assert!((len - 1600.0).abs() < 200.0, "unexpected length {len}");
    }
}
