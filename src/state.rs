//! Explicit decoder state and the frame sources that drive it.
//!
//! The decoder is a pure transition `(state, input frame) -> (state, output)`.
//! A [`FrameSource`] decides what the next step reads: the ground-truth frame
//! during training, or the model's own last frame at inference time.

use burn::module::Param;
use burn::tensor::{backend::Backend, Tensor};

/// Everything the decoder carries from one step to the next.
#[derive(Debug, Clone)]
pub struct DecoderState<B: Backend> {
    /// Frame fed to the pre-net at the next step, `[batch, num_mels]`.
    pub input_frame: Tensor<B, 2>,
    /// Attention GRU hidden state, `[batch, hidden]`.
    pub attention_hidden: Tensor<B, 2>,
    /// Residual decoder GRU hidden states.
    pub decoder_hidden: Vec<Tensor<B, 2>>,
    /// Context vector from the previous step, `[batch, memory]`.
    pub context: Tensor<B, 2>,
    /// Alignment from the previous step, `[batch, encoder_steps]`.
    pub alignment: Tensor<B, 2>,
    /// Running sum of all previous alignments.
    pub cumulative: Tensor<B, 2>,
    /// Steps taken so far.
    pub step: usize,
}

impl<B: Backend> DecoderState<B> {
    /// Initial state: learned start frame, zero recurrences, empty alignments.
    pub fn initial(
        start_frame: &Param<Tensor<B, 1>>,
        batch: usize,
        hidden: usize,
        decoder_layers: usize,
        memory_size: usize,
        encoder_steps: usize,
        device: &B::Device,
    ) -> Self {
        let start = start_frame.val();
        let num_mels = start.dims()[0];
        Self {
            input_frame: start.reshape([1, num_mels]).repeat_dim(0, batch),
            attention_hidden: Tensor::zeros([batch, hidden], device),
            decoder_hidden: (0..decoder_layers)
                .map(|_| Tensor::zeros([batch, hidden], device))
                .collect(),
            context: Tensor::zeros([batch, memory_size], device),
            alignment: Tensor::zeros([batch, encoder_steps], device),
            cumulative: Tensor::zeros([batch, encoder_steps], device),
            step: 0,
        }
    }
}

/// Chooses the frame the decoder reads at the next step.
pub trait FrameSource<B: Backend> {
    /// `produced` is the step's output group `[batch, r * num_mels]`, frames
    /// in time order. Returns the next input frame `[batch, num_mels]`.
    fn next_frame(&mut self, step: usize, produced: &Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Reads the last ground-truth frame of each group.
#[derive(Debug, Clone)]
pub struct TeacherForced<B: Backend> {
    targets: Tensor<B, 3>,
    r: usize,
}

impl<B: Backend> TeacherForced<B> {
    /// `targets: [batch, frames, num_mels]` with `frames` a multiple of `r`.
    pub fn new(targets: Tensor<B, 3>, r: usize) -> Self {
        Self { targets, r }
    }
}

impl<B: Backend> FrameSource<B> for TeacherForced<B> {
    fn next_frame(&mut self, step: usize, _produced: &Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, frames, num_mels] = self.targets.dims();
        let index = ((step + 1) * self.r - 1).min(frames - 1);
        self.targets
            .clone()
            .narrow(1, index, 1)
            .reshape([batch, num_mels])
    }
}

/// Feeds back the last frame the model just produced.
#[derive(Debug, Clone, Copy)]
pub struct FreeRunning {
    num_mels: usize,
}

impl FreeRunning {
    pub fn new(num_mels: usize) -> Self {
        Self { num_mels }
    }
}

impl<B: Backend> FrameSource<B> for FreeRunning {
    fn next_frame(&mut self, _step: usize, produced: &Tensor<B, 2>) -> Tensor<B, 2> {
        let width = produced.dims()[1];
        produced
            .clone()
            .narrow(1, width - self.num_mels, self.num_mels)
    }
}
