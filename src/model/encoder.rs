//! Character encoder: embedding, pre-net, CBHG.

use crate::modules::cbhg::{Cbhg, CbhgConfig};
use crate::modules::prenet::Prenet;
use crate::perf::{self, Metric};
use burn::module::Module;
use burn::tensor::{backend::Backend, Int, Tensor};
use burn_nn::{Embedding, EmbeddingConfig};

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    pub embedding_size: usize,
    /// Output width; each GRU direction gets half.
    pub hidden_size: usize,
    pub bank_k: usize,
    pub dropout: f64,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let half = self.hidden_size / 2;
        Encoder {
            embedding: EmbeddingConfig::new(self.vocab_size, self.embedding_size).init(device),
            prenet: Prenet::new(
                self.embedding_size,
                &[self.hidden_size, half],
                self.dropout,
                device,
            ),
            cbhg: CbhgConfig::new(half, self.bank_k, half).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub embedding: Embedding<B>,
    pub prenet: Prenet<B>,
    pub cbhg: Cbhg<B>,
}

impl<B: Backend> Encoder<B> {
    /// `text: [batch, time]`, `mask: [batch, time]` -> `[batch, time, hidden]`.
    ///
    /// One output vector per input symbol; padded positions come out as zeros
    /// from the recurrent layer.
    pub fn forward(&self, text: Tensor<B, 2, Int>, mask: Tensor<B, 2>) -> Tensor<B, 3> {
        let _span = perf::span(Metric::EncoderForward);
        let embedded = self.embedding.forward(text);
        let features = self.prenet.forward(embedded);
        self.cbhg.forward(features, mask)
    }
}
