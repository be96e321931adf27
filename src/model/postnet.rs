//! Mel-to-linear refinement network.

use crate::modules::cbhg::{Cbhg, CbhgConfig};
use crate::perf::{self, Metric};
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use burn_nn::{Linear, LinearConfig};

#[derive(Debug, Clone)]
pub struct PostnetConfig {
    pub num_mels: usize,
    pub num_freq: usize,
    pub hidden_size: usize,
    pub bank_k: usize,
}

impl PostnetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Postnet<B> {
        let half = self.hidden_size / 2;
        let cbhg = CbhgConfig::new(self.num_mels, self.bank_k, half)
            .with_projections([self.hidden_size, self.num_mels]);
        Postnet {
            output: LinearConfig::new(cbhg.output_size(), self.num_freq).init(device),
            cbhg: cbhg.init(device),
        }
    }
}

/// CBHG over decoder mel frames followed by a projection to linear bins.
#[derive(Module, Debug)]
pub struct Postnet<B: Backend> {
    pub cbhg: Cbhg<B>,
    pub output: Linear<B>,
}

impl<B: Backend> Postnet<B> {
    /// `mel: [batch, frames, num_mels]` -> `[batch, frames, num_freq]`.
    pub fn forward(&self, mel: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 3> {
        let _span = perf::span(Metric::PostnetForward);
        self.output.forward(self.cbhg.forward(mel, mask))
    }
}
