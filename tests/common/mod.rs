//! Shared test utilities: tiny configs, synthetic datasets and sinks.
#![allow(dead_code)]

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tacotron::audio::Waveform;
use tacotron::config::Config;
use tacotron::data::{InMemoryDataset, Sample};
use tacotron::train::{EventSink, TrainingEvent};

pub type TestBackend = NdArray<f32>;
pub type TrainBackend = Autodiff<TestBackend>;

pub const SAMPLE_RATE: u32 = 8000;

/// A model and signal chain small enough to train in a unit test.
pub fn tiny_config(output_path: &str) -> Config {
    Config {
        num_mels: 8,
        num_freq: 33,
        sample_rate: SAMPLE_RATE,
        frame_length_ms: 8.0,
        frame_shift_ms: 2.0,
        griffin_lim_iters: 4,
        hidden_size: 16,
        embedding_size: 16,
        r: 2,
        encoder_bank_k: 2,
        postnet_bank_k: 2,
        max_decoder_steps: 10,
        epochs: 3,
        batch_size: 2,
        batch_group_size: 1,
        min_seq_len: 1,
        max_seq_len: 200,
        num_loader_workers: 2,
        queue_capacity: 2,
        save_step: 2,
        print_step: 1,
        run_name: "test".to_string(),
        output_path: output_path.to_string(),
        ..Config::default()
    }
}

/// Sum of two sines with a short fade, `seconds` long.
pub fn tone(freq: f32, seconds: f32) -> Waveform {
    let len = (seconds * SAMPLE_RATE as f32) as usize;
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let fade = (i.min(len - i) as f32 / 40.0).min(1.0);
            fade * (0.4 * (2.0 * PI * freq * t).sin() + 0.2 * (2.0 * PI * 2.5 * freq * t).sin())
        })
        .collect();
    Waveform::new(samples, SAMPLE_RATE)
}

/// Four utterances with distinct text and pitch.
pub fn toy_dataset() -> InMemoryDataset {
    let items = [
        ("a", "Hello there.", 220.0, 0.05),
        ("b", "Dr. Smith paid $5.", 330.0, 0.06),
        ("c", "It was 1984!", 440.0, 0.04),
        ("d", "Quiet, please", 550.0, 0.05),
    ];
    InMemoryDataset::new(
        items
            .iter()
            .map(|&(id, text, freq, seconds)| Sample {
                id: id.to_string(),
                text: text.to_string(),
                audio: tone(freq, seconds),
            })
            .collect(),
    )
}

/// Raises the interrupt flag once a scalar event for `step` arrives.
pub struct InterruptAt {
    pub step: u64,
    pub flag: Arc<AtomicBool>,
}

impl EventSink for InterruptAt {
    fn emit(&mut self, event: &TrainingEvent) -> tacotron::Result<()> {
        if let TrainingEvent::Scalar { step, .. } = event {
            if *step >= self.step {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

/// Mean absolute difference between equally shaped buffers.
pub fn mean_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "length mismatch");
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f32>() / a.len().max(1) as f32
}
