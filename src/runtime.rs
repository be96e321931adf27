//! High-level inference wrapper.
//!
//! A [`Synthesizer`] owns a model, its text encoder and an audio processor,
//! and turns raw text into a waveform. It is the surface the CLI and other
//! callers use; training lives in [`crate::train`].

use crate::audio::{AudioProcessor, Spectrogram, Waveform};
use crate::config::Config;
use crate::error::{Result, TtsError};
use crate::model::{Decoded, InferenceOptions, Tacotron, TacotronConfig, TacotronOutput};
use crate::perf::{self, Metric};
use crate::text::TextEncoder;
use crate::train::checkpoint::Checkpoint;
use crate::train::events::AlignmentSnapshot;
use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use std::path::Path;

/// Everything produced for one utterance.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub waveform: Waveform,
    /// Normalized mel frames from the decoder.
    pub mel: Spectrogram,
    /// Normalized linear frames from the post-net.
    pub linear: Spectrogram,
    pub alignment: AlignmentSnapshot,
}

#[derive(Debug)]
pub struct Synthesizer<B: Backend> {
    config: Config,
    model: Tacotron<B>,
    encoder: TextEncoder,
    processor: AudioProcessor,
    options: InferenceOptions,
    device: B::Device,
}

impl<B: Backend> Synthesizer<B> {
    /// Build with freshly initialised weights.
    pub fn from_config(config: &Config, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let encoder = TextEncoder::from_name(&config.text_cleaner)?;
        let model = TacotronConfig::from_config(config, encoder.vocab_size()).init(device);
        Ok(Self::from_parts(config.clone(), model, encoder, device))
    }

    /// Rebuild the model described by a checkpoint's stored config and load its weights.
    pub fn from_checkpoint(path: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let checkpoint = {
            let _span = perf::span(Metric::CheckpointLoad);
            Checkpoint::load(path)?
        };
        Self::from_loaded_checkpoint(&checkpoint, device)
    }

    pub fn from_loaded_checkpoint(checkpoint: &Checkpoint, device: &B::Device) -> Result<Self> {
        let config = checkpoint.config.clone();
        let encoder = TextEncoder::from_name(&config.text_cleaner)?;
        let model = TacotronConfig::from_config(&config, encoder.vocab_size()).init::<B>(device);
        let model = model.load_record(checkpoint.model_record::<B, _>(device)?);
        tracing::info!(step = checkpoint.position.step, "loaded checkpoint for synthesis");
        Ok(Self::from_parts(config, model, encoder, device))
    }

    fn from_parts(config: Config, model: Tacotron<B>, encoder: TextEncoder, device: &B::Device) -> Self {
        Self {
            processor: AudioProcessor::from_config(&config),
            options: InferenceOptions::from_config(&config),
            config,
            model,
            encoder,
            device: device.clone(),
        }
    }

    /// Override the decoding limits taken from the config.
    pub fn with_options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &Tacotron<B> {
        &self.model
    }

    pub fn processor(&self) -> &AudioProcessor {
        &self.processor
    }

    /// Text in, audio out.
    ///
    /// A decoder timeout still yields audio for the frames produced before the
    /// step bound, wrapped in [`Decoded::TimedOut`].
    pub fn synthesize_text(&self, raw_text: &str) -> Result<Decoded<Synthesis>> {
        let _span = perf::span(Metric::SynthesizeText);
        let sequence = self.encoder.clean_and_encode(raw_text)?;
        let len = sequence.len();
        let text = Tensor::<B, 2, Int>::from_data(TensorData::new(sequence.to_i64(), [1, len]), &self.device);
        let decoded = self.model.infer(text, &[len], self.options)?;
        match decoded {
            Decoded::Complete(output) => Ok(Decoded::Complete(self.render(output)?)),
            Decoded::TimedOut { partial, error } => {
                tracing::warn!(%error, text = raw_text, "returning truncated synthesis");
                Ok(Decoded::TimedOut {
                    partial: self.render(partial)?,
                    error,
                })
            }
        }
    }

    fn render(&self, output: TacotronOutput<B>) -> Result<Synthesis> {
        let mel = spectrogram(output.mel)?;
        let linear = spectrogram(output.linear)?;
        let [_, decoder_steps, encoder_steps] = output.alignments.dims();
        let alignment = AlignmentSnapshot {
            decoder_steps,
            encoder_steps,
            weights: host_vec(output.alignments)?,
        };
        let mut waveform = self.processor.synthesize(&linear)?;
        if self.config.trim_silence {
            waveform = self.processor.trim_silence(waveform);
        }
        Ok(Synthesis {
            waveform,
            mel,
            linear,
            alignment,
        })
    }
}

fn host_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TtsError::shape("synthesis output", format!("{e:?}")))
}

/// `[1, frames, channels]` to a host spectrogram.
fn spectrogram<B: Backend>(tensor: Tensor<B, 3>) -> Result<Spectrogram> {
    let [_, frames, channels] = tensor.dims();
    Spectrogram::new(host_vec(tensor)?, frames, channels)
}
