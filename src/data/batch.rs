//! Example selection, length-bucketed epoch plans and padded batches.

use crate::audio::SpectralFeatures;
use crate::data::dataset::Dataset;
use crate::error::{Result, TtsError};
use crate::perf::{self, Metric};
use crate::text::{TextEncoder, TextSequence};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// A dataset item whose transcript encoded cleanly.
#[derive(Debug, Clone)]
pub struct EncodedExample {
    /// Index into the dataset.
    pub index: usize,
    pub sequence: TextSequence,
}

/// Encode every transcript, dropping items the front-end rejects or whose
/// length falls outside `[min_len, max_len]`.
pub fn encode_dataset(
    dataset: &dyn Dataset,
    encoder: &TextEncoder,
    min_len: usize,
    max_len: usize,
) -> Result<Vec<EncodedExample>> {
    let mut kept = Vec::with_capacity(dataset.len());
    let mut dropped = 0u64;
    for index in 0..dataset.len() {
        let text = dataset.transcript(index)?;
        match encoder.clean_and_encode(&text) {
            Ok(sequence) if (min_len..=max_len).contains(&sequence.len()) => {
                kept.push(EncodedExample { index, sequence });
            }
            Ok(sequence) => {
                tracing::debug!(index, len = sequence.len(), "dropping example outside length bounds");
                dropped += 1;
            }
            Err(err) if err.is_example_error() => {
                tracing::warn!(index, error = %err, "dropping example");
                dropped += 1;
            }
            Err(err) => return Err(err),
        }
    }
    perf::add_count(Metric::DroppedExamples, dropped);
    tracing::info!(kept = kept.len(), dropped, "encoded transcripts");
    Ok(kept)
}

/// Hold out `eval_items` examples, chosen deterministically from `seed`.
pub fn split_eval(
    examples: Vec<EncodedExample>,
    eval_items: usize,
    seed: u64,
) -> (Vec<EncodedExample>, Vec<EncodedExample>) {
    if eval_items == 0 {
        return (examples, Vec::new());
    }
    let mut order: Vec<usize> = (0..examples.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let held: std::collections::HashSet<usize> =
        order.into_iter().take(eval_items).collect();
    let (eval, train): (Vec<_>, Vec<_>) = examples
        .into_iter()
        .enumerate()
        .partition(|(i, _)| held.contains(i));
    (
        train.into_iter().map(|(_, e)| e).collect(),
        eval.into_iter().map(|(_, e)| e).collect(),
    )
}

fn epoch_rng(seed: u64, epoch: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Batches of positions into `examples` for one epoch.
///
/// Examples are sorted by text length, shuffled within buckets of
/// `batch_size * group_size`, cut into batches, and the batch order is
/// shuffled. The same `(seed, epoch)` always yields the same plan.
pub fn epoch_plan(
    examples: &[EncodedExample],
    batch_size: usize,
    group_size: usize,
    seed: u64,
    epoch: usize,
) -> Vec<Vec<usize>> {
    let mut rng = epoch_rng(seed, epoch);
    let mut order: Vec<usize> = (0..examples.len()).collect();
    order.sort_by_key(|&i| (examples[i].sequence.len(), examples[i].index));
    let bucket = (batch_size * group_size.max(1)).max(1);
    for chunk in order.chunks_mut(bucket) {
        chunk.shuffle(&mut rng);
    }
    let mut batches: Vec<Vec<usize>> = order
        .chunks(batch_size.max(1))
        .map(|c| c.to_vec())
        .collect();
    batches.shuffle(&mut rng);
    batches
}

/// An example after spectral analysis, ready for collation.
#[derive(Debug, Clone)]
pub struct AnalyzedExample {
    pub id: String,
    pub sequence: TextSequence,
    pub features: SpectralFeatures,
}

/// Padded batch held as plain host arrays.
///
/// Text is padded with the pad index 0; spectrogram frames are padded with
/// zeros up to `r * ceil(max_frames / r)`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub ids: Vec<String>,
    /// `[batch, text_steps]` row-major.
    pub text: Vec<i64>,
    pub text_lengths: Vec<usize>,
    pub text_steps: usize,
    /// `[batch, frames, num_mels]`.
    pub mel: Vec<f32>,
    /// `[batch, frames, num_freq]`.
    pub linear: Vec<f32>,
    pub frame_lengths: Vec<usize>,
    pub frames: usize,
    pub num_mels: usize,
    pub num_freq: usize,
}

impl Batch {
    /// Pad `items` to common lengths.
    pub fn collate(items: Vec<AnalyzedExample>, r: usize) -> Result<Self> {
        let first = items
            .first()
            .ok_or_else(|| TtsError::shape("collate", "empty batch"))?;
        let num_mels = first.features.mel.channels();
        let num_freq = first.features.linear.channels();
        let text_steps = items.iter().map(|e| e.sequence.len()).max().unwrap_or(0);
        let max_frames = items
            .iter()
            .map(|e| e.features.mel.frames())
            .max()
            .unwrap_or(0);
        let frames = max_frames.div_ceil(r) * r;
        let batch = items.len();

        let mut out = Self {
            ids: Vec::with_capacity(batch),
            text: vec![0; batch * text_steps],
            text_lengths: Vec::with_capacity(batch),
            text_steps,
            mel: vec![0.0; batch * frames * num_mels],
            linear: vec![0.0; batch * frames * num_freq],
            frame_lengths: Vec::with_capacity(batch),
            frames,
            num_mels,
            num_freq,
        };
        for (b, item) in items.into_iter().enumerate() {
            let SpectralFeatures { mel, linear } = item.features;
            if mel.channels() != num_mels
                || linear.channels() != num_freq
                || mel.frames() != linear.frames()
            {
                return Err(TtsError::shape(
                    "collate",
                    format!(
                        "example {} has mel {}x{} and linear {}x{}",
                        item.id,
                        mel.frames(),
                        mel.channels(),
                        linear.frames(),
                        linear.channels()
                    ),
                ));
            }
            let text_offset = b * text_steps;
            for (t, id) in item.sequence.ids().iter().enumerate() {
                out.text[text_offset + t] = *id as i64;
            }
            let mel_offset = b * frames * num_mels;
            out.mel[mel_offset..mel_offset + mel.as_slice().len()].copy_from_slice(mel.as_slice());
            let lin_offset = b * frames * num_freq;
            out.linear[lin_offset..lin_offset + linear.as_slice().len()]
                .copy_from_slice(linear.as_slice());
            out.ids.push(item.id);
            out.text_lengths.push(item.sequence.len());
            out.frame_lengths.push(mel.frames());
        }
        out.validate(r)?;
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.text_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text_lengths.is_empty()
    }

    /// Check padding and length invariants.
    pub fn validate(&self, r: usize) -> Result<()> {
        let batch = self.len();
        let check = |ok: bool, message: String| {
            if ok {
                Ok(())
            } else {
                Err(TtsError::shape("batch", message))
            }
        };
        check(
            self.frame_lengths.len() == batch && self.ids.len() == batch,
            format!(
                "{batch} text lengths, {} frame lengths, {} ids",
                self.frame_lengths.len(),
                self.ids.len()
            ),
        )?;
        check(
            self.text.len() == batch * self.text_steps,
            format!("text buffer {} for {batch}x{}", self.text.len(), self.text_steps),
        )?;
        check(
            self.mel.len() == batch * self.frames * self.num_mels
                && self.linear.len() == batch * self.frames * self.num_freq,
            "spectrogram buffers do not match the padded shape".to_string(),
        )?;
        check(
            r > 0 && self.frames % r == 0,
            format!("{} frames is not a multiple of r = {r}", self.frames),
        )?;
        check(
            self.text_lengths.iter().all(|&l| l > 0 && l <= self.text_steps)
                && self.frame_lengths.iter().all(|&l| l > 0 && l <= self.frames),
            "a length is zero or exceeds the padded size".to_string(),
        )
    }

    /// Move the batch onto `device`.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> BatchTensors<B> {
        let batch = self.len();
        BatchTensors {
            text: Tensor::from_data(
                TensorData::new(self.text.clone(), [batch, self.text_steps]),
                device,
            ),
            mel: Tensor::from_data(
                TensorData::new(self.mel.clone(), [batch, self.frames, self.num_mels]),
                device,
            ),
            linear: Tensor::from_data(
                TensorData::new(self.linear.clone(), [batch, self.frames, self.num_freq]),
                device,
            ),
        }
    }
}

/// Device copies of a [`Batch`].
#[derive(Debug, Clone)]
pub struct BatchTensors<B: Backend> {
    pub text: Tensor<B, 2, Int>,
    pub mel: Tensor<B, 3>,
    pub linear: Tensor<B, 3>,
}
