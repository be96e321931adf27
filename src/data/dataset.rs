//! Sources of `(text, audio)` training pairs.

use crate::audio::io::WavIo;
use crate::audio::Waveform;
use crate::error::{Result, TtsError};
use std::fs;
use std::path::{Path, PathBuf};

/// One utterance as delivered by a dataset.
#[derive(Debug, Clone)]
pub struct Sample {
    pub id: String,
    pub text: String,
    pub audio: Waveform,
}

/// Random-access collection of utterances.
///
/// Transcripts are cheap; audio is loaded on demand by loader workers.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw transcript of item `index`.
    fn transcript(&self, index: usize) -> Result<String>;

    /// Full sample, audio at the dataset's configured sample rate.
    fn load(&self, index: usize) -> Result<Sample>;
}

fn out_of_range(index: usize, len: usize) -> TtsError {
    TtsError::Dataset(format!("index {index} out of range for {len} items"))
}

/// Samples held in memory, mainly for tests and small experiments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn transcript(&self, index: usize) -> Result<String> {
        self.samples
            .get(index)
            .map(|s| s.text.clone())
            .ok_or_else(|| out_of_range(index, self.samples.len()))
    }

    fn load(&self, index: usize) -> Result<Sample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.samples.len()))
    }
}

/// `metadata.csv` + `wavs/` layout (LJSpeech style).
///
/// Each metadata row is `id|text` or `id|text|normalized_text`; the
/// normalized column wins when present and non-empty. Audio lives at
/// `wavs/<id>.wav` and is downmixed and resampled on load.
#[derive(Debug, Clone)]
pub struct MetadataCsvDataset {
    root: PathBuf,
    entries: Vec<(String, String)>,
    sample_rate: u32,
}

impl MetadataCsvDataset {
    pub fn open(root: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let metadata = root.join("metadata.csv");
        let contents =
            fs::read_to_string(&metadata).map_err(|e| TtsError::io("reading metadata.csv", e))?;
        let entries = parse_metadata(&contents)?;
        tracing::info!(
            path = %metadata.display(),
            items = entries.len(),
            "opened dataset"
        );
        Ok(Self {
            root,
            entries,
            sample_rate,
        })
    }

    fn wav_path(&self, id: &str) -> PathBuf {
        self.root.join("wavs").join(format!("{id}.wav"))
    }
}

fn parse_metadata(contents: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('|');
        let id = fields.next().unwrap_or_default().trim();
        let text = fields.next().ok_or_else(|| {
            TtsError::Dataset(format!("metadata line {} has no text column", line_no + 1))
        })?;
        let text = match fields.next() {
            Some(normalized) if !normalized.trim().is_empty() => normalized,
            _ => text,
        };
        if id.is_empty() {
            return Err(TtsError::Dataset(format!(
                "metadata line {} has an empty id",
                line_no + 1
            )));
        }
        entries.push((id.to_string(), text.to_string()));
    }
    Ok(entries)
}

impl Dataset for MetadataCsvDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn transcript(&self, index: usize) -> Result<String> {
        self.entries
            .get(index)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| out_of_range(index, self.entries.len()))
    }

    fn load(&self, index: usize) -> Result<Sample> {
        let (id, text) = self
            .entries
            .get(index)
            .ok_or_else(|| out_of_range(index, self.entries.len()))?;
        let audio = WavIo::read_mono(self.wav_path(id), self.sample_rate)?;
        Ok(Sample {
            id: id.clone(),
            text: text.clone(),
            audio,
        })
    }
}
