//! Training events and the sinks that receive them.

use crate::audio::{WavIo, Waveform};
use crate::error::{Result, TtsError};
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Attention weights of one example, `decoder_steps x encoder_steps` row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentSnapshot {
    pub decoder_steps: usize,
    pub encoder_steps: usize,
    pub weights: Vec<f32>,
}

impl AlignmentSnapshot {
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.weights.chunks(self.encoder_steps.max(1))
    }
}

#[derive(Debug, Clone)]
pub enum TrainingEvent {
    Scalar {
        step: u64,
        name: &'static str,
        value: f32,
    },
    Alignment {
        step: u64,
        alignment: AlignmentSnapshot,
    },
    Audio {
        step: u64,
        waveform: Waveform,
    },
}

impl TrainingEvent {
    pub fn step(&self) -> u64 {
        match self {
            Self::Scalar { step, .. } | Self::Alignment { step, .. } | Self::Audio { step, .. } => {
                *step
            }
        }
    }
}

/// Receiver of training events. Sink failures are logged by the trainer and
/// never stop training.
pub trait EventSink: Send {
    fn emit(&mut self, event: &TrainingEvent) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Forwards scalars to `tracing`; snapshots are summarized.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: &TrainingEvent) -> Result<()> {
        match event {
            TrainingEvent::Scalar { step, name, value } => {
                tracing::info!(step, metric = *name, value = *value, "training scalar");
            }
            TrainingEvent::Alignment { step, alignment } => {
                tracing::debug!(
                    step,
                    decoder_steps = alignment.decoder_steps,
                    encoder_steps = alignment.encoder_steps,
                    "alignment snapshot"
                );
            }
            TrainingEvent::Audio { step, waveform } => {
                tracing::debug!(step, seconds = waveform.duration_secs(), "audio snapshot");
            }
        }
        Ok(())
    }
}

/// Appends one JSON object per event to `events.jsonl`; audio snapshots are
/// written as WAV files beside it.
pub struct JsonLinesSink {
    dir: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| TtsError::storage(&dir, e))?;
        let path = dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TtsError::storage(&path, e))?;
        Ok(Self {
            dir,
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&mut self, event: &TrainingEvent) -> Result<()> {
        let record = match event {
            TrainingEvent::Scalar { step, name, value } => {
                json!({ "kind": "scalar", "step": step, "name": name, "value": value })
            }
            TrainingEvent::Alignment { step, alignment } => {
                let rows: Vec<&[f32]> = alignment.rows().collect();
                json!({ "kind": "alignment", "step": step, "weights": rows })
            }
            TrainingEvent::Audio { step, waveform } => {
                let file = format!("audio_{step:08}.wav");
                WavIo::write_wav(self.dir.join(&file), waveform)?;
                json!({
                    "kind": "audio",
                    "step": step,
                    "file": file,
                    "sample_rate": waveform.sample_rate,
                    "samples": waveform.len(),
                })
            }
        };
        serde_json::to_writer(&mut self.writer, &record)
            .map_err(|e| TtsError::storage(&self.dir, e))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| TtsError::storage(&self.dir, e))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| TtsError::storage(&self.dir, e))
    }
}

/// Collects events in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TrainingEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrainingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &TrainingEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
