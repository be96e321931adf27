//! Attention decoder: one step produces `r` mel frames and a stop logit.
//!
//! [`Decoder::step`] is the only state transition. [`Decoder::unroll`] drives
//! it with a [`FrameSource`] for either a fixed number of steps (training) or
//! until the stop head fires (inference).

use crate::model::mask::padding_mask;
use crate::modules::attention::{Attention, AttentionConfig};
use crate::modules::gru::GruCell;
use crate::modules::prenet::Prenet;
use crate::perf::{self, Metric};
use crate::state::{DecoderState, FrameSource};
use burn::module::{Module, Param};
use burn::tensor::{
    activation::sigmoid, backend::Backend, Bool, ElementConversion, Tensor,
};
use burn_nn::{Linear, LinearConfig};

const DECODER_LAYERS: usize = 2;

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub num_mels: usize,
    pub r: usize,
    pub hidden_size: usize,
    /// Width of the encoder outputs.
    pub memory_size: usize,
    pub dropout: f64,
    pub location: bool,
}

impl DecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        let hidden = self.hidden_size;
        let prenet_out = hidden / 2;
        let frames = self.num_mels * self.r;
        Decoder {
            prenet: Prenet::new(self.num_mels, &[hidden, prenet_out], self.dropout, device),
            attention_rnn: GruCell::new(prenet_out + self.memory_size, hidden, device),
            attention: AttentionConfig::new(hidden, self.memory_size, hidden)
                .with_location(self.location)
                .init(device),
            decoder_input: LinearConfig::new(hidden + self.memory_size, hidden).init(device),
            decoder_rnns: (0..DECODER_LAYERS)
                .map(|_| GruCell::new(hidden, hidden, device))
                .collect(),
            frame_projection: LinearConfig::new(hidden, frames).init(device),
            stop_projection: LinearConfig::new(hidden + frames, 1).init(device),
            start_frame: Param::from_tensor(Tensor::zeros([self.num_mels], device)),
            num_mels: self.num_mels,
            r: self.r,
        }
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub prenet: Prenet<B>,
    pub attention_rnn: GruCell<B>,
    pub attention: Attention<B>,
    pub decoder_input: Linear<B>,
    pub decoder_rnns: Vec<GruCell<B>>,
    pub frame_projection: Linear<B>,
    pub stop_projection: Linear<B>,
    /// Learned input frame for step 0.
    pub start_frame: Param<Tensor<B, 1>>,
    pub num_mels: usize,
    pub r: usize,
}

/// Output of a single decoder step.
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    /// `[batch, r * num_mels]`, frames in time order.
    pub frames: Tensor<B, 2>,
    /// `[batch, 1]`.
    pub stop_logit: Tensor<B, 2>,
    /// `[batch, encoder_steps]`.
    pub alignment: Tensor<B, 2>,
}

/// When to stop unrolling.
#[derive(Debug, Clone, Copy)]
pub enum Termination {
    /// Exactly this many steps.
    Steps(usize),
    /// Until every sequence's stop probability exceeds `threshold`, or `max_steps`.
    StopToken { max_steps: usize, threshold: f32 },
}

/// Stacked outputs of an unrolled decoder.
#[derive(Debug, Clone)]
pub struct DecoderOutput<B: Backend> {
    /// `[batch, steps * r, num_mels]`.
    pub mel: Tensor<B, 3>,
    /// `[batch, steps]`.
    pub stop_logits: Tensor<B, 2>,
    /// `[batch, steps, encoder_steps]`.
    pub alignments: Tensor<B, 3>,
    pub steps: usize,
    /// False when a stop-token run hit `max_steps` first.
    pub stopped: bool,
}

impl<B: Backend> Decoder<B> {
    /// Fresh state for a batch attending over `memory`.
    pub fn init_state(&self, memory: &Tensor<B, 3>) -> DecoderState<B> {
        let [batch, encoder_steps, memory_size] = memory.dims();
        DecoderState::initial(
            &self.start_frame,
            batch,
            self.attention_rnn.hidden_size,
            self.decoder_rnns.len(),
            memory_size,
            encoder_steps,
            &memory.device(),
        )
    }

    /// Advance one step. The returned state still holds the old input frame;
    /// the caller's [`FrameSource`] supplies the next one.
    pub fn step(
        &self,
        memory: &Tensor<B, 3>,
        processed_memory: &Tensor<B, 3>,
        padding: &Tensor<B, 2, Bool>,
        state: DecoderState<B>,
    ) -> (DecoderState<B>, StepOutput<B>) {
        let x = self.prenet.forward(state.input_frame.clone());
        let attention_hidden = self
            .attention_rnn
            .step(Tensor::cat(vec![x, state.context], 1), state.attention_hidden);
        let (context, alignment) = self.attention.forward(
            attention_hidden.clone(),
            memory.clone(),
            processed_memory.clone(),
            padding.clone(),
            state.alignment,
            state.cumulative.clone(),
        );

        let mut x = self
            .decoder_input
            .forward(Tensor::cat(vec![attention_hidden.clone(), context.clone()], 1));
        let mut decoder_hidden = Vec::with_capacity(self.decoder_rnns.len());
        for (rnn, h) in self.decoder_rnns.iter().zip(state.decoder_hidden) {
            let h = rnn.step(x.clone(), h);
            x = x + h.clone();
            decoder_hidden.push(h);
        }
        let frames = self.frame_projection.forward(x.clone());
        let stop_logit = self
            .stop_projection
            .forward(Tensor::cat(vec![x, frames.clone()], 1));

        let next = DecoderState {
            input_frame: state.input_frame,
            attention_hidden,
            decoder_hidden,
            context,
            alignment: alignment.clone(),
            cumulative: state.cumulative + alignment.clone(),
            step: state.step + 1,
        };
        (
            next,
            StepOutput {
                frames,
                stop_logit,
                alignment,
            },
        )
    }

    /// Run the decoder over `memory` until `termination` says stop.
    pub fn unroll<S: FrameSource<B>>(
        &self,
        memory: Tensor<B, 3>,
        memory_lengths: &[usize],
        source: &mut S,
        termination: Termination,
    ) -> DecoderOutput<B> {
        let _span = perf::span(Metric::DecoderForward);
        let [batch, encoder_steps, _] = memory.dims();
        let device = memory.device();
        let padding = padding_mask::<B>(memory_lengths, encoder_steps, &device);
        let processed = self.attention.process_memory(memory.clone());
        let limit = match termination {
            Termination::Steps(steps) => steps,
            Termination::StopToken { max_steps, .. } => max_steps,
        };

        let mut state = self.init_state(&memory);
        let mut frames = Vec::with_capacity(limit);
        let mut stops = Vec::with_capacity(limit);
        let mut alignments = Vec::with_capacity(limit);
        let mut stopped = matches!(termination, Termination::Steps(_));
        for step in 0..limit {
            let (next, out) = self.step(&memory, &processed, &padding, state);
            state = next;
            state.input_frame = source.next_frame(step, &out.frames);

            frames.push(out.frames.reshape([batch, self.r, self.num_mels]));
            alignments.push(out.alignment.unsqueeze_dim::<3>(1));
            let stop_logit = out.stop_logit;
            stops.push(stop_logit.clone());

            if let Termination::StopToken { threshold, .. } = termination {
                let pending: bool = sigmoid(stop_logit)
                    .lower_equal_elem(threshold)
                    .any()
                    .into_scalar()
                    .elem();
                if !pending {
                    stopped = true;
                    break;
                }
            }
        }
        let steps = frames.len();
        perf::add_count(Metric::DecoderSteps, steps as u64);
        DecoderOutput {
            mel: Tensor::cat(frames, 1),
            stop_logits: Tensor::cat(stops, 1),
            alignments: Tensor::cat(alignments, 1),
            steps,
            stopped,
        }
    }
}
