//! Full text-to-spectrogram model.

use crate::config::Config;
use crate::error::{Result, TtsError};
use crate::model::decoder::{Decoder, DecoderConfig, Termination};
use crate::model::encoder::{Encoder, EncoderConfig};
use crate::model::mask::length_mask;
use crate::model::postnet::{Postnet, PostnetConfig};
use crate::model::Decoded;
use crate::state::{FreeRunning, TeacherForced};
use burn::module::Module;
use burn::tensor::{backend::Backend, Int, Tensor};

/// Architecture hyper-parameters, usually derived from a [`Config`].
#[derive(Debug, Clone)]
pub struct TacotronConfig {
    pub vocab_size: usize,
    pub embedding_size: usize,
    pub hidden_size: usize,
    pub num_mels: usize,
    pub num_freq: usize,
    pub r: usize,
    pub encoder_bank_k: usize,
    pub postnet_bank_k: usize,
    pub prenet_dropout: f64,
    pub location_attn: bool,
}

impl TacotronConfig {
    pub fn from_config(config: &Config, vocab_size: usize) -> Self {
        Self {
            vocab_size,
            embedding_size: config.embedding_size,
            hidden_size: config.hidden_size,
            num_mels: config.num_mels,
            num_freq: config.num_freq,
            r: config.r,
            encoder_bank_k: config.encoder_bank_k,
            postnet_bank_k: config.postnet_bank_k,
            prenet_dropout: config.prenet_dropout,
            location_attn: config.location_attn,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Tacotron<B> {
        let encoder = EncoderConfig {
            vocab_size: self.vocab_size,
            embedding_size: self.embedding_size,
            hidden_size: self.hidden_size,
            bank_k: self.encoder_bank_k,
            dropout: self.prenet_dropout,
        };
        let decoder = DecoderConfig {
            num_mels: self.num_mels,
            r: self.r,
            hidden_size: self.hidden_size,
            memory_size: self.hidden_size,
            dropout: self.prenet_dropout,
            location: self.location_attn,
        };
        let postnet = PostnetConfig {
            num_mels: self.num_mels,
            num_freq: self.num_freq,
            hidden_size: self.hidden_size,
            bank_k: self.postnet_bank_k,
        };
        Tacotron {
            encoder: encoder.init(device),
            decoder: decoder.init(device),
            postnet: postnet.init(device),
            r: self.r,
        }
    }
}

/// Free-running decoding limits.
#[derive(Debug, Clone, Copy)]
pub struct InferenceOptions {
    pub max_decoder_steps: usize,
    pub stop_threshold: f32,
}

impl InferenceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_decoder_steps: config.max_decoder_steps,
            stop_threshold: config.stop_threshold,
        }
    }
}

/// Model predictions for a batch.
#[derive(Debug, Clone)]
pub struct TacotronOutput<B: Backend> {
    /// Decoder mel frames, `[batch, steps * r, num_mels]`.
    pub mel: Tensor<B, 3>,
    /// Post-net linear frames, `[batch, steps * r, num_freq]`.
    pub linear: Tensor<B, 3>,
    /// `[batch, steps]`.
    pub stop_logits: Tensor<B, 2>,
    /// `[batch, steps, text_len]`.
    pub alignments: Tensor<B, 3>,
}

#[derive(Module, Debug)]
pub struct Tacotron<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
    pub postnet: Postnet<B>,
    pub r: usize,
}

impl<B: Backend> Tacotron<B> {
    /// Teacher-forced pass over padded targets.
    ///
    /// Runs `ceil(frames / r)` decoder steps, so outputs hold `r * ceil(frames / r)`
    /// frames. `frame_lengths` bound the post-net mask.
    pub fn forward(
        &self,
        text: Tensor<B, 2, Int>,
        text_lengths: &[usize],
        mel_targets: Tensor<B, 3>,
        frame_lengths: &[usize],
    ) -> Result<TacotronOutput<B>> {
        let [batch, text_steps] = text.dims();
        let [target_batch, frames, _] = mel_targets.dims();
        if batch != target_batch || text_lengths.len() != batch || frame_lengths.len() != batch {
            return Err(TtsError::shape(
                "tacotron forward",
                format!(
                    "text batch {batch}, target batch {target_batch}, {} text lengths, {} frame lengths",
                    text_lengths.len(),
                    frame_lengths.len()
                ),
            ));
        }
        if frames == 0 || text_steps == 0 {
            return Err(TtsError::shape(
                "tacotron forward",
                format!("{text_steps} text steps and {frames} target frames"),
            ));
        }
        let device = text.device();
        let memory = self
            .encoder
            .forward(text, length_mask(text_lengths, text_steps, &device));
        let steps = frames.div_ceil(self.r);
        let mut source = TeacherForced::new(mel_targets, self.r);
        let decoded = self
            .decoder
            .unroll(memory, text_lengths, &mut source, Termination::Steps(steps));

        let output_frames = steps * self.r;
        let linear = self.postnet.forward(
            decoded.mel.clone(),
            length_mask(frame_lengths, output_frames, &device),
        );
        Ok(TacotronOutput {
            mel: decoded.mel,
            linear,
            stop_logits: decoded.stop_logits,
            alignments: decoded.alignments,
        })
    }

    /// Free-running synthesis of a batch of encoded texts.
    ///
    /// Decoding ends when every sequence's stop probability exceeds the
    /// threshold; hitting `max_decoder_steps` first yields
    /// [`Decoded::TimedOut`] with the frames produced so far.
    pub fn infer(
        &self,
        text: Tensor<B, 2, Int>,
        text_lengths: &[usize],
        options: InferenceOptions,
    ) -> Result<Decoded<TacotronOutput<B>>> {
        let [batch, text_steps] = text.dims();
        if text_steps == 0 || text_lengths.iter().any(|&len| len == 0) {
            return Err(TtsError::EmptyInput);
        }
        if options.max_decoder_steps == 0 {
            return Err(TtsError::Config("max_decoder_steps must be > 0".to_string()));
        }
        if text_lengths.len() != batch {
            return Err(TtsError::shape(
                "tacotron infer",
                format!("{} lengths for batch {batch}", text_lengths.len()),
            ));
        }
        let device = text.device();
        let memory = self
            .encoder
            .forward(text, length_mask(text_lengths, text_steps, &device));
        let mut source = FreeRunning::new(self.decoder.num_mels);
        let decoded = self.decoder.unroll(
            memory,
            text_lengths,
            &mut source,
            Termination::StopToken {
                max_steps: options.max_decoder_steps,
                threshold: options.stop_threshold,
            },
        );
        let frames = decoded.steps * self.r;
        let linear = self
            .postnet
            .forward(decoded.mel.clone(), Tensor::ones([batch, frames], &device));
        let output = TacotronOutput {
            mel: decoded.mel,
            linear,
            stop_logits: decoded.stop_logits,
            alignments: decoded.alignments,
        };
        Ok(if decoded.stopped {
            Decoded::Complete(output)
        } else {
            Decoded::TimedOut {
                partial: output,
                error: TtsError::DecodingTimeout {
                    max_steps: options.max_decoder_steps,
                },
            }
        })
    }
}
