//! Run configuration for the audio front-end, model, data pipeline and trainer.
//!
//! Configurations are usually loaded from YAML with [`load_config`]. Every
//! recognized option has a default; unknown keys are rejected at load time.

use crate::error::{Result, TtsError};
use crate::text::cleaners::CleanerPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Flat configuration consumed by every component.
///
/// # Example YAML
///
/// ```yaml
/// num_mels: 80
/// num_freq: 1025
/// sample_rate: 22050
/// r: 5
/// text_cleaner: english_cleaners
/// data_path: /data/LJSpeech-1.1
/// output_path: /runs
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Number of mel bands.
    pub num_mels: usize,
    /// Linear-frequency bins, `n_fft / 2 + 1`.
    pub num_freq: usize,
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
    /// Analysis window length in milliseconds.
    pub frame_length_ms: f32,
    /// Hop between frames in milliseconds.
    pub frame_shift_ms: f32,
    /// Pre-emphasis coefficient applied before the STFT.
    pub preemphasis: f32,
    /// Decibel floor of the normalized range.
    pub min_level_db: f32,
    /// Reference level subtracted after the dB conversion.
    pub ref_level_db: f32,
    /// Lowest mel filter edge in Hz.
    pub mel_fmin: f32,
    /// Highest mel filter edge in Hz (Nyquist when unset).
    pub mel_fmax: Option<f32>,
    /// Griffin-Lim iterations.
    pub griffin_lim_iters: usize,
    /// Magnitude exponent applied before phase reconstruction.
    pub power: f32,
    /// Trim trailing silence from synthesized audio.
    pub trim_silence: bool,

    /// Encoder and decoder width.
    pub hidden_size: usize,
    /// Character embedding width.
    pub embedding_size: usize,
    /// Frames produced per decoder step.
    pub r: usize,
    /// Widest kernel in the encoder convolution bank.
    pub encoder_bank_k: usize,
    /// Widest kernel in the post-net convolution bank.
    pub postnet_bank_k: usize,
    /// Pre-net dropout probability (training only).
    pub prenet_dropout: f64,
    /// Feed previous and cumulative alignments into the attention scores.
    pub location_attn: bool,
    /// Safety bound on free-running decoder steps.
    pub max_decoder_steps: usize,
    /// Stop probability above which free-running decoding ends.
    pub stop_threshold: f32,

    /// Name of the text cleaning policy.
    pub text_cleaner: String,

    /// Training epochs.
    pub epochs: usize,
    /// Base learning rate.
    pub lr: f64,
    /// Noam warm-up steps; 0 keeps the learning rate constant.
    pub warmup_steps: usize,
    /// Gradient norm clip; 0 disables clipping.
    pub grad_clip: f32,
    /// Examples per batch.
    pub batch_size: usize,
    /// Batches per length bucket when shuffling.
    pub batch_group_size: usize,
    /// Shortest accepted text sequence.
    pub min_seq_len: usize,
    /// Longest accepted text sequence.
    pub max_seq_len: usize,
    /// Items held out from training for evaluation.
    pub eval_split: usize,
    /// Data-loading worker threads.
    pub num_loader_workers: usize,
    /// Completed batches buffered between loaders and the training loop.
    pub queue_capacity: usize,
    /// Write periodic checkpoints.
    pub checkpoint: bool,
    /// Steps between periodic checkpoints.
    pub save_step: u64,
    /// Steps between loss events.
    pub print_step: u64,
    /// Seed for the epoch plan, the eval split and the Griffin-Lim start phase.
    pub seed: u64,
    /// Prefix of the run directory name.
    pub run_name: String,

    /// Dataset root.
    pub data_path: String,
    /// Parent directory of run directories.
    pub output_path: String,
    /// Event log directory, relative to the run directory.
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_mels: 80,
            num_freq: 1025,
            sample_rate: 22050,
            frame_length_ms: 50.0,
            frame_shift_ms: 12.5,
            preemphasis: 0.97,
            min_level_db: -100.0,
            ref_level_db: 20.0,
            mel_fmin: 0.0,
            mel_fmax: None,
            griffin_lim_iters: 60,
            power: 1.5,
            trim_silence: false,
            hidden_size: 256,
            embedding_size: 256,
            r: 5,
            encoder_bank_k: 16,
            postnet_bank_k: 8,
            prenet_dropout: 0.5,
            location_attn: true,
            max_decoder_steps: 500,
            stop_threshold: 0.5,
            text_cleaner: "english_cleaners".to_string(),
            epochs: 1000,
            lr: 0.002,
            warmup_steps: 0,
            grad_clip: 1.0,
            batch_size: 32,
            batch_group_size: 4,
            min_seq_len: 6,
            max_seq_len: 150,
            eval_split: 0,
            num_loader_workers: 4,
            queue_capacity: 8,
            checkpoint: true,
            save_step: 2000,
            print_step: 50,
            seed: 54321,
            run_name: "tacotron".to_string(),
            data_path: String::new(),
            output_path: "runs".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

impl Config {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(data).map_err(|e| TtsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from a plain key-value mapping.
    pub fn from_mapping(mapping: serde_yaml::Mapping) -> Result<Self> {
        let config: Config = serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))
            .map_err(|e| TtsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to YAML (stored alongside runs and inside checkpoints).
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| TtsError::Config(e.to_string()))
    }

    /// FFT size derived from `num_freq`.
    pub fn n_fft(&self) -> usize {
        (self.num_freq - 1) * 2
    }

    /// Hop length in samples.
    pub fn hop_length(&self) -> usize {
        (self.frame_shift_ms / 1000.0 * self.sample_rate as f32).round() as usize
    }

    /// Window length in samples.
    pub fn win_length(&self) -> usize {
        (self.frame_length_ms / 1000.0 * self.sample_rate as f32).round() as usize
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        fn fail(message: impl Into<String>) -> Result<()> {
            Err(TtsError::Config(message.into()))
        }

        if self.num_freq < 2 {
            return fail(format!("num_freq must be >= 2, got {}", self.num_freq));
        }
        if self.num_mels == 0 {
            return fail("num_mels must be > 0");
        }
        if self.sample_rate == 0 {
            return fail("sample_rate must be > 0");
        }
        let hop = self.hop_length();
        let win = self.win_length();
        if hop == 0 || win == 0 {
            return fail(format!(
                "frame_shift_ms/frame_length_ms give hop {hop} and window {win} samples"
            ));
        }
        if hop > win {
            return fail(format!("hop length {hop} exceeds window length {win}"));
        }
        if win > self.n_fft() {
            return fail(format!(
                "window length {win} exceeds FFT size {}",
                self.n_fft()
            ));
        }
        if self.min_level_db >= 0.0 {
            return fail("min_level_db must be negative");
        }
        if !(0.0..1.0).contains(&self.preemphasis) {
            return fail("preemphasis must be in [0, 1)");
        }
        if self.power <= 0.0 {
            return fail("power must be positive");
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        let fmax = self.mel_fmax.unwrap_or(nyquist);
        if self.mel_fmin < 0.0 || fmax <= self.mel_fmin || fmax > nyquist {
            return fail(format!(
                "mel band [{}, {fmax}] must lie inside [0, {nyquist}]",
                self.mel_fmin
            ));
        }
        if self.r == 0 {
            return fail("reduction factor r must be >= 1");
        }
        if self.hidden_size < 2 || self.hidden_size % 2 != 0 {
            return fail("hidden_size must be an even number >= 2");
        }
        if self.embedding_size == 0 {
            return fail("embedding_size must be > 0");
        }
        if self.encoder_bank_k == 0 || self.postnet_bank_k == 0 {
            return fail("convolution bank widths must be >= 1");
        }
        if !(0.0..1.0).contains(&self.prenet_dropout) {
            return fail("prenet_dropout must be in [0, 1)");
        }
        if self.max_decoder_steps == 0 {
            return fail("max_decoder_steps must be > 0");
        }
        if CleanerPolicy::from_name(&self.text_cleaner).is_none() {
            return fail(format!("unknown text_cleaner {:?}", self.text_cleaner));
        }
        if self.batch_size == 0 {
            return fail("batch_size must be > 0");
        }
        if self.min_seq_len > self.max_seq_len {
            return fail("min_seq_len exceeds max_seq_len");
        }
        if self.num_loader_workers == 0 || self.queue_capacity == 0 {
            return fail("num_loader_workers and queue_capacity must be > 0");
        }
        if self.save_step == 0 || self.print_step == 0 {
            return fail("save_step and print_step must be > 0");
        }
        if self.lr <= 0.0 {
            return fail("lr must be positive");
        }
        if self.grad_clip < 0.0 || self.grad_clip.is_nan() {
            return fail("grad_clip must be >= 0 (0 disables clipping)");
        }
        if self.run_name.is_empty() || self.run_name.contains(['/', '\\']) {
            return fail("run_name must be a plain directory name");
        }
        Ok(())
    }
}

/// Load and validate a configuration from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TtsError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let data = fs::read_to_string(path).map_err(|e| TtsError::io("reading config", e))?;
    Config::from_yaml_str(&data)
}

/// Resolve a possibly relative path against a config file location.
pub fn resolve_relative_path(config_path: &Path, maybe_relative: &str) -> PathBuf {
    let candidate = Path::new(maybe_relative);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().expect("default config is valid");
        assert_eq!(config.n_fft(), 2048);
        assert_eq!(config.hop_length(), 276);
        assert_eq!(config.win_length(), 1102);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_yaml_str("num_mels: 80\nnot_an_option: 3\n").unwrap_err();
        assert!(err.to_string().contains("not_an_option"));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = Config::from_yaml_str("r: 2\nbatch_size: 4\n").expect("parse");
        assert_eq!(config.r, 2);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.num_mels, 80);
    }

    #[test]
    fn mapping_round_trips_through_yaml() {
        let mut mapping = serde_yaml::Mapping::new();
        mapping.insert("num_mels".into(), 40.into());
        mapping.insert("text_cleaner".into(), "basic_cleaners".into());
        let config = Config::from_mapping(mapping).expect("mapping");
        let again = Config::from_yaml_str(&config.to_yaml().expect("yaml")).expect("reparse");
        assert_eq!(config, again);
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        let config = Config {
            r: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            text_cleaner: "klingon_cleaners".to_string(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("klingon_cleaners"));

        let config = Config {
            frame_shift_ms: 80.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn grad_clip_must_not_be_negative() {
        let config = Config {
            grad_clip: -1.0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TtsError::Config(_))));
        let disabled = Config {
            grad_clip: 0.0,
            ..Config::default()
        };
        disabled.validate().expect("zero disables clipping");
    }

    #[test]
    fn resolves_relative_paths() {
        let resolved = resolve_relative_path(Path::new("/runs/a/config.yaml"), "data");
        assert_eq!(resolved, PathBuf::from("/runs/a/data"));
        let absolute = resolve_relative_path(Path::new("/runs/a/config.yaml"), "/data");
        assert_eq!(absolute, PathBuf::from("/data"));
    }
}
