//! Slaney-style mel filter bank.

/// Hz to mel on the Slaney scale (linear below 1 kHz, logarithmic above).
pub fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f32.ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

/// Inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f32.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

/// Triangular filters mapping `num_bins` linear bins onto `num_mels` bands.
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    /// `[num_mels][num_bins]` weights, area-normalised.
    weights: Vec<Vec<f32>>,
}

impl MelFilterBank {
    pub fn new(sample_rate: u32, n_fft: usize, num_mels: usize, fmin: f32, fmax: f32) -> Self {
        let num_bins = n_fft / 2 + 1;
        let nyquist = sample_rate as f32 / 2.0;
        let fft_freqs: Vec<f32> = (0..num_bins)
            .map(|k| k as f32 * nyquist / (num_bins - 1).max(1) as f32)
            .collect();
        let (mel_min, mel_max) = (hz_to_mel(fmin), hz_to_mel(fmax));
        let edges: Vec<f32> = (0..num_mels + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (num_mels + 1) as f32))
            .collect();

        let weights = (0..num_mels)
            .map(|m| {
                let (lo, mid, hi) = (edges[m], edges[m + 1], edges[m + 2]);
                let enorm = 2.0 / (hi - lo);
                fft_freqs
                    .iter()
                    .map(|&f| {
                        let lower = (f - lo) / (mid - lo);
                        let upper = (hi - f) / (hi - mid);
                        lower.min(upper).max(0.0) * enorm
                    })
                    .collect()
            })
            .collect();
        Self { weights }
    }

    pub fn num_mels(&self) -> usize {
        self.weights.len()
    }

    /// Project one magnitude frame onto the mel bands.
    pub fn apply(&self, frame: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .map(|band| band.iter().zip(frame).map(|(w, x)| w * x).sum())
            .collect()
    }
}
