//! Short-time Fourier transform, its overlap-add inverse, and Griffin-Lim.
//!
//! Frames are centred: the signal is reflect-padded by `n_fft / 2` on both
//! sides, so frame `i` is centred on sample `i * hop`. The analysis window is
//! a periodic Hann of `win_length` samples, zero-padded to `n_fft`.

use rand::Rng;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// One analysed frame: `n_fft / 2 + 1` complex bins.
pub type SpectrumFrame = Vec<Complex32>;

/// Planned forward and inverse transforms for a fixed frame geometry.
///
/// Plans are shared behind `Arc`, so one `Stft` can serve many threads.
#[derive(Clone)]
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Arc<[f32]>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

impl Stft {
    /// Plan transforms for the given geometry. Requires `hop_length <= win_length <= n_fft`.
    pub fn new(n_fft: usize, hop_length: usize, win_length: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop_length,
            window: padded_hann(win_length, n_fft).into(),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Positive-frequency bin count, `n_fft / 2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for a signal of `len` samples.
    pub fn num_frames(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    /// Analyse `signal` into complex frames.
    pub fn forward(&self, signal: &[f32]) -> Vec<SpectrumFrame> {
        if signal.is_empty() {
            return Vec::new();
        }
        let pad = self.n_fft / 2;
        let padded: Vec<f32> = (0..signal.len() + 2 * pad)
            .map(|i| signal[reflect_index(i as isize - pad as isize, signal.len())])
            .collect();

        let frames = self.num_frames(signal.len());
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.n_fft];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.forward.get_inplace_scratch_len()];
        let mut out = Vec::with_capacity(frames);
        for frame in 0..frames {
            let start = frame * self.hop_length;
            for (j, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex32::new(padded[start + j] * self.window[j], 0.0);
            }
            self.forward.process_with_scratch(&mut buffer, &mut scratch);
            out.push(buffer[..self.num_bins()].to_vec());
        }
        out
    }

    /// Overlap-add inverse of [`Stft::forward`].
    ///
    /// Returns `hop * (frames - 1)` samples, the length that re-analyses to
    /// the same frame count. A single frame yields `hop - 1` samples (at
    /// least one) so it still re-analyses to one frame.
    pub fn inverse(&self, frames: &[SpectrumFrame]) -> Vec<f32> {
        if frames.is_empty() {
            return Vec::new();
        }
        let n = self.n_fft;
        let bins = self.num_bins();
        let total = n + self.hop_length * (frames.len() - 1);
        let mut signal = vec![0.0_f32; total];
        let mut norm = vec![0.0_f32; total];
        let mut buffer = vec![Complex32::new(0.0, 0.0); n];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.inverse.get_inplace_scratch_len()];
        let scale = 1.0 / n as f32;

        for (index, frame) in frames.iter().enumerate() {
            for k in 0..n {
                buffer[k] = if k < bins {
                    frame.get(k).copied().unwrap_or_default()
                } else {
                    frame.get(n - k).copied().unwrap_or_default().conj()
                };
            }
            // DC and Nyquist bins of a real signal carry no imaginary part.
            buffer[0].im = 0.0;
            if n % 2 == 0 {
                buffer[n / 2].im = 0.0;
            }
            self.inverse.process_with_scratch(&mut buffer, &mut scratch);
            let start = index * self.hop_length;
            for j in 0..n {
                let w = self.window[j];
                signal[start + j] += buffer[j].re * scale * w;
                norm[start + j] += w * w;
            }
        }

        let pad = n / 2;
        let len = match frames.len() {
            1 => self.hop_length.saturating_sub(1).max(1),
            count => self.hop_length * (count - 1),
        }
        .min(total - pad);
        (pad..pad + len)
            .map(|i| {
                if norm[i] > 1e-8 {
                    signal[i] / norm[i]
                } else {
                    signal[i]
                }
            })
            .collect()
    }

    /// Estimate a waveform whose STFT magnitude matches `magnitude`.
    ///
    /// Starts from uniformly random phase drawn from `rng`, then alternates
    /// inverse and forward transforms for `iterations` rounds, keeping the
    /// target magnitude and the latest phase each round.
    pub fn griffin_lim<R: Rng>(
        &self,
        magnitude: &[Vec<f32>],
        iterations: usize,
        rng: &mut R,
    ) -> Vec<f32> {
        if magnitude.is_empty() {
            return Vec::new();
        }
        let mut spectrum: Vec<SpectrumFrame> = magnitude
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .map(|&m| Complex32::from_polar(m, 2.0 * PI * rng.gen::<f32>()))
                    .collect()
            })
            .collect();
        let mut signal = self.inverse(&spectrum);
        for _ in 0..iterations {
            let estimate = self.forward(&signal);
            for ((target, frame), current) in
                magnitude.iter().zip(spectrum.iter_mut()).zip(&estimate)
            {
                for ((&m, slot), bin) in target.iter().zip(frame.iter_mut()).zip(current) {
                    *slot = Complex32::from_polar(m, bin.arg());
                }
            }
            signal = self.inverse(&spectrum);
        }
        signal
    }
}

/// Periodic Hann window of `win_length` centred inside `n_fft` zeros.
fn padded_hann(win_length: usize, n_fft: usize) -> Vec<f32> {
    let win_length = win_length.min(n_fft);
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0; n_fft];
    for i in 0..win_length {
        window[offset + i] = 0.5 - 0.5 * (2.0 * PI * i as f32 / win_length as f32).cos();
    }
    window
}

/// Mirror an out-of-range index back into `[0, len)` without repeating the edge sample.
fn reflect_index(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut i = i.rem_euclid(period);
    if i >= len as isize {
        i = period - i;
    }
    i as usize
}
