//! Signal analysis and synthesis.
//!
//! The [`AudioProcessor`] turns waveforms into normalized mel and linear
//! spectrograms and inverts linear spectrograms with Griffin-Lim. WAV
//! access and resampling live in [`io`] and [`resample`].

pub mod io;
pub mod mel;
pub mod processor;
pub mod resample;
pub mod stft;

pub use io::WavIo;
pub use processor::{AudioProcessor, SpectralFeatures};

/// Mono audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Row-major `frames x channels` array.
///
/// Used for both mel spectrograms (`channels = num_mels`) and linear
/// spectrograms (`channels = num_freq`).
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    data: Vec<f32>,
    frames: usize,
    channels: usize,
}

impl Spectrogram {
    /// Wrap `data`, which must hold `frames * channels` values.
    pub fn new(data: Vec<f32>, frames: usize, channels: usize) -> crate::Result<Self> {
        if data.len() != frames * channels {
            return Err(crate::TtsError::shape(
                "spectrogram",
                format!(
                    "{} values for {frames} frames of {channels} channels",
                    data.len()
                ),
            ));
        }
        Ok(Self {
            data,
            frames,
            channels,
        })
    }

    /// Build from per-frame rows of equal width.
    pub fn from_rows(rows: Vec<Vec<f32>>, channels: usize) -> crate::Result<Self> {
        let frames = rows.len();
        let data: Vec<f32> = rows.into_iter().flatten().collect();
        Self::new(data, frames, channels)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame(&self, index: usize) -> &[f32] {
        &self.data[index * self.channels..(index + 1) * self.channels]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks(self.channels.max(1)).take(self.frames)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}
