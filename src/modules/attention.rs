//! Additive (Bahdanau) attention with optional location features.
//!
//! Scores are `v^T tanh(W q + V m + U f)` where `f` is a convolution over the
//! previous and cumulative alignments when location features are enabled.
//! Padded encoder positions are set to negative infinity before the softmax,
//! so every alignment row is a distribution over valid positions only.

use crate::modules::conv::{SameConv1d, SameConv1dConfig};
use burn::module::Module;
use burn::tensor::{activation::softmax, activation::tanh, backend::Backend, Bool, Tensor};
use burn_nn::{Linear, LinearConfig};

const LOCATION_FILTERS: usize = 32;
const LOCATION_KERNEL: usize = 31;

/// Configuration for [`Attention`].
#[derive(Debug, Clone)]
pub struct AttentionConfig {
    pub query_size: usize,
    pub memory_size: usize,
    pub attention_size: usize,
    pub location: bool,
}

impl AttentionConfig {
    pub fn new(query_size: usize, memory_size: usize, attention_size: usize) -> Self {
        Self {
            query_size,
            memory_size,
            attention_size,
            location: false,
        }
    }

    pub fn with_location(mut self, location: bool) -> Self {
        self.location = location;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Attention<B> {
        Attention {
            query: LinearConfig::new(self.query_size, self.attention_size)
                .with_bias(false)
                .init(device),
            memory: LinearConfig::new(self.memory_size, self.attention_size)
                .with_bias(false)
                .init(device),
            score: LinearConfig::new(self.attention_size, 1).init(device),
            location: self.location.then(|| LocationLayer {
                conv: SameConv1dConfig::new(2, LOCATION_FILTERS, LOCATION_KERNEL).init(device),
                dense: LinearConfig::new(LOCATION_FILTERS, self.attention_size)
                    .with_bias(false)
                    .init(device),
            }),
        }
    }
}

/// Convolution over `[previous, cumulative]` alignments.
#[derive(Module, Debug)]
pub struct LocationLayer<B: Backend> {
    pub conv: SameConv1d<B>,
    pub dense: Linear<B>,
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub query: Linear<B>,
    pub memory: Linear<B>,
    pub score: Linear<B>,
    pub location: Option<LocationLayer<B>>,
}

impl<B: Backend> Attention<B> {
    /// Project encoder outputs once per utterance: `[batch, time, memory] -> [batch, time, attn]`.
    pub fn process_memory(&self, memory: Tensor<B, 3>) -> Tensor<B, 3> {
        self.memory.forward(memory)
    }

    /// One attention step.
    ///
    /// `padding` is true at padded encoder positions. Returns the context
    /// `[batch, memory]` and the alignment `[batch, time]`.
    pub fn forward(
        &self,
        query: Tensor<B, 2>,
        memory: Tensor<B, 3>,
        processed_memory: Tensor<B, 3>,
        padding: Tensor<B, 2, Bool>,
        previous: Tensor<B, 2>,
        cumulative: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, time, _] = processed_memory.dims();
        let mut energy = processed_memory + self.query.forward(query).unsqueeze_dim::<3>(1);
        if let Some(location) = &self.location {
            let features = Tensor::cat(
                vec![previous.unsqueeze_dim::<3>(1), cumulative.unsqueeze_dim::<3>(1)],
                1,
            );
            let features = location.conv.forward(features).swap_dims(1, 2);
            energy = energy + location.dense.forward(features);
        }
        let scores = self
            .score
            .forward(tanh(energy))
            .reshape([batch, time])
            .mask_fill(padding, f32::NEG_INFINITY);
        let alignment = softmax(scores, 1);
        let memory_size = memory.dims()[2];
        let context = alignment
            .clone()
            .unsqueeze_dim::<3>(1)
            .matmul(memory)
            .reshape([batch, memory_size]);
        (context, alignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn rows_sum_to_one_and_ignore_padding() {
        let device = NdArrayDevice::default();
        for location in [false, true] {
            let attention = AttentionConfig::new(4, 6, 5)
                .with_location(location)
                .init::<TestBackend>(&device);
            let memory = Tensor::<TestBackend, 3>::random(
                [2, 7, 6],
                burn::tensor::Distribution::Normal(0.0, 1.0),
                &device,
            );
            let processed = attention.process_memory(memory.clone());
            let mut pad = vec![false; 14];
            for flag in pad.iter_mut().skip(7 + 4) {
                *flag = true;
            }
            let padding = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(pad, [2, 7]), &device);
            let (context, alignment) = attention.forward(
                Tensor::ones([2, 4], &device),
                memory,
                processed,
                padding,
                Tensor::zeros([2, 7], &device),
                Tensor::zeros([2, 7], &device),
            );
            assert_eq!(context.dims(), [2, 6]);
            let values = alignment.into_data().to_vec::<f32>().expect("vec");
            for row in values.chunks(7) {
                let sum: f32 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5, "row sums to {sum}");
            }
            assert!(values[7 + 4..].iter().all(|&w| w == 0.0));
        }
    }
}
