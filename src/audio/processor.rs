//! Waveform <-> normalized spectrogram conversion.
//!
//! Forward: pre-emphasis, STFT magnitude, optional mel projection, decibels
//! relative to `ref_level_db`, then a linear map of `[min_level_db, 0]` onto
//! `[0, 1]`. Inverse: undo the normalization, raise the magnitude to
//! `power`, Griffin-Lim, then inverse pre-emphasis.

use crate::audio::mel::MelFilterBank;
use crate::audio::stft::Stft;
use crate::audio::{Spectrogram, Waveform};
use crate::config::Config;
use crate::error::{Result, TtsError};
use crate::perf::{self, Metric};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Mel and linear spectrograms of one waveform; frame counts always agree.
#[derive(Debug, Clone)]
pub struct SpectralFeatures {
    pub mel: Spectrogram,
    pub linear: Spectrogram,
}

/// Configured analysis/synthesis pipeline.
#[derive(Debug, Clone)]
pub struct AudioProcessor {
    sample_rate: u32,
    num_mels: usize,
    num_freq: usize,
    preemphasis: f32,
    min_level_db: f32,
    ref_level_db: f32,
    /// Griffin-Lim iterations.
    pub griffin_lim_iters: usize,
    /// Magnitude exponent applied before phase reconstruction.
    pub power: f32,
    /// Seed of the initial random phase.
    pub seed: u64,
    stft: Stft,
    mel_basis: MelFilterBank,
}

impl AudioProcessor {
    pub fn from_config(config: &Config) -> Self {
        let n_fft = config.n_fft();
        let fmax = config
            .mel_fmax
            .unwrap_or(config.sample_rate as f32 / 2.0);
        Self {
            sample_rate: config.sample_rate,
            num_mels: config.num_mels,
            num_freq: config.num_freq,
            preemphasis: config.preemphasis,
            min_level_db: config.min_level_db,
            ref_level_db: config.ref_level_db,
            griffin_lim_iters: config.griffin_lim_iters,
            power: config.power,
            seed: config.seed,
            stft: Stft::new(n_fft, config.hop_length(), config.win_length()),
            mel_basis: MelFilterBank::new(
                config.sample_rate,
                n_fft,
                config.num_mels,
                config.mel_fmin,
                fmax,
            ),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_mels(&self) -> usize {
        self.num_mels
    }

    pub fn num_freq(&self) -> usize {
        self.num_freq
    }

    pub fn hop_length(&self) -> usize {
        self.stft.hop_length()
    }

    /// `y[n] = x[n] - k * x[n - 1]`.
    pub fn apply_preemphasis(&self, samples: &[f32]) -> Vec<f32> {
        let k = self.preemphasis;
        let mut prev = 0.0;
        samples
            .iter()
            .map(|&x| {
                let y = x - k * prev;
                prev = x;
                y
            })
            .collect()
    }

    /// `y[n] = x[n] + k * y[n - 1]`.
    pub fn inverse_preemphasis(&self, samples: &[f32]) -> Vec<f32> {
        let k = self.preemphasis;
        let mut prev = 0.0;
        samples
            .iter()
            .map(|&x| {
                prev = x + k * prev;
                prev
            })
            .collect()
    }

    pub fn amp_to_db(x: f32) -> f32 {
        20.0 * x.max(1e-5).log10()
    }

    pub fn db_to_amp(x: f32) -> f32 {
        10.0_f32.powf(0.05 * x)
    }

    /// Map `[min_level_db, 0]` dB onto `[0, 1]`, clamping outside values.
    pub fn normalize(&self, db: f32) -> f32 {
        ((db - self.min_level_db) / -self.min_level_db).clamp(0.0, 1.0)
    }

    pub fn denormalize(&self, value: f32) -> f32 {
        value.clamp(0.0, 1.0) * -self.min_level_db + self.min_level_db
    }

    /// Compute both spectrograms of `waveform`.
    pub fn analyze(&self, waveform: &Waveform) -> Result<SpectralFeatures> {
        let _span = perf::span(Metric::AudioAnalyze);
        if waveform.sample_rate != self.sample_rate {
            return Err(TtsError::Audio(format!(
                "expected {} Hz audio, got {} Hz",
                self.sample_rate, waveform.sample_rate
            )));
        }
        if waveform.is_empty() {
            return Err(TtsError::Audio("empty waveform".to_string()));
        }
        let emphasized = self.apply_preemphasis(&waveform.samples);
        let magnitude: Vec<Vec<f32>> = self
            .stft
            .forward(&emphasized)
            .into_iter()
            .map(|frame| frame.iter().map(|c| c.norm()).collect())
            .collect();

        let frames = magnitude.len();
        let mut linear = Vec::with_capacity(frames * self.num_freq);
        let mut mel = Vec::with_capacity(frames * self.num_mels);
        for frame in &magnitude {
            linear.extend(frame.iter().map(|&m| self.to_normalized(m)));
            mel.extend(
                self.mel_basis
                    .apply(frame)
                    .into_iter()
                    .map(|m| self.to_normalized(m)),
            );
        }
        perf::add_count(Metric::AnalyzedFrames, frames as u64);
        Ok(SpectralFeatures {
            mel: Spectrogram::new(mel, frames, self.num_mels)?,
            linear: Spectrogram::new(linear, frames, self.num_freq)?,
        })
    }

    fn to_normalized(&self, magnitude: f32) -> f32 {
        self.normalize(Self::amp_to_db(magnitude) - self.ref_level_db)
    }

    /// Invert a normalized linear spectrogram using the configured seed.
    pub fn synthesize(&self, linear: &Spectrogram) -> Result<Waveform> {
        self.synthesize_with_seed(linear, self.seed)
    }

    /// Invert a normalized linear spectrogram with an explicit phase seed.
    pub fn synthesize_with_seed(&self, linear: &Spectrogram, seed: u64) -> Result<Waveform> {
        let _span = perf::span(Metric::GriffinLim);
        if linear.channels() != self.num_freq {
            return Err(TtsError::shape(
                "griffin-lim input",
                format!(
                    "expected {} frequency bins, got {}",
                    self.num_freq,
                    linear.channels()
                ),
            ));
        }
        let magnitude: Vec<Vec<f32>> = linear
            .rows()
            .map(|row| {
                row.iter()
                    .map(|&v| {
                        Self::db_to_amp(self.denormalize(v) + self.ref_level_db).powf(self.power)
                    })
                    .collect()
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let signal = self
            .stft
            .griffin_lim(&magnitude, self.griffin_lim_iters, &mut rng);
        Ok(Waveform::new(
            self.inverse_preemphasis(&signal),
            self.sample_rate,
        ))
    }

    /// Invert several spectrograms in parallel; each uses the configured seed.
    pub fn synthesize_many(&self, spectrograms: &[Spectrogram]) -> Result<Vec<Waveform>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = spectrograms
                .iter()
                .map(|spec| scope.spawn(move || self.synthesize(spec)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| TtsError::Audio("griffin-lim worker panicked".to_string()))?
                })
                .collect()
        })
    }

    /// Index just past the last non-silent window.
    ///
    /// Scans windows of `min_silence_sec` with a quarter-window hop and
    /// returns the first position whose window stays below `threshold_db`.
    pub fn find_endpoint(&self, samples: &[f32], threshold_db: f32, min_silence_sec: f32) -> usize {
        let window = ((self.sample_rate as f32 * min_silence_sec) as usize).max(1);
        let hop = (window / 4).max(1);
        let threshold = Self::db_to_amp(threshold_db);
        let mut x = hop;
        while x + window <= samples.len() {
            if samples[x..x + window].iter().all(|s| s.abs() < threshold) {
                return x + hop;
            }
            x += hop;
        }
        samples.len()
    }

    /// Drop trailing silence (below -40 dB for at least 0.8 s).
    pub fn trim_silence(&self, waveform: Waveform) -> Waveform {
        let end = self.find_endpoint(&waveform.samples, -40.0, 0.8);
        let mut samples = waveform.samples;
        samples.truncate(end);
        Waveform::new(samples, waveform.sample_rate)
    }
}
