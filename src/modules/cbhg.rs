//! Convolution bank, highway network and bidirectional GRU (CBHG).
//!
//! Shared by the encoder (over character features) and the post-net (over
//! mel frames). The bank concatenates `K` convolutions of widths `1..=K`,
//! max-pools across time with stride 1, projects back to the input width,
//! adds the input residually, then runs highway layers and a BiGRU.

use crate::modules::conv::{ConvNorm, SameConv1dConfig};
use crate::modules::gru::BiGru;
use crate::modules::highway::Highway;
use burn::module::Module;
use burn::tensor::{activation::relu, backend::Backend, Tensor};
use burn_nn::{Linear, LinearConfig};

/// Configuration for [`Cbhg`].
#[derive(Debug, Clone)]
pub struct CbhgConfig {
    /// Input feature width.
    pub input_size: usize,
    /// Widest bank kernel; the bank holds kernels `1..=bank_k`.
    pub bank_k: usize,
    /// Channels per bank convolution.
    pub bank_channels: usize,
    /// Output widths of the two projection convolutions; the last must equal `input_size`.
    pub projections: [usize; 2],
    /// Width of the highway stack.
    pub highway_size: usize,
    pub num_highways: usize,
    /// Hidden size per GRU direction.
    pub gru_size: usize,
}

impl CbhgConfig {
    pub fn new(input_size: usize, bank_k: usize, hidden: usize) -> Self {
        Self {
            input_size,
            bank_k,
            bank_channels: hidden,
            projections: [hidden, input_size],
            highway_size: hidden,
            num_highways: 4,
            gru_size: hidden,
        }
    }

    pub fn with_projections(mut self, projections: [usize; 2]) -> Self {
        self.projections = projections;
        self
    }

    /// Output width: both GRU directions.
    pub fn output_size(&self) -> usize {
        2 * self.gru_size
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Cbhg<B> {
        let bank = (1..=self.bank_k)
            .map(|k| {
                ConvNorm::new(
                    &SameConv1dConfig::new(self.input_size, self.bank_channels, k),
                    device,
                )
            })
            .collect();
        let projection_in = ConvNorm::new(
            &SameConv1dConfig::new(self.bank_k * self.bank_channels, self.projections[0], 3),
            device,
        );
        let projection_out = ConvNorm::new(
            &SameConv1dConfig::new(self.projections[0], self.projections[1], 3),
            device,
        );
        let pre_highway = (self.projections[1] != self.highway_size)
            .then(|| LinearConfig::new(self.projections[1], self.highway_size).init(device));
        Cbhg {
            bank,
            projection_in,
            projection_out,
            pre_highway,
            highways: (0..self.num_highways)
                .map(|_| Highway::new(self.highway_size, device))
                .collect(),
            gru: BiGru::new(self.highway_size, self.gru_size, device),
        }
    }
}

#[derive(Module, Debug)]
pub struct Cbhg<B: Backend> {
    pub bank: Vec<ConvNorm<B>>,
    pub projection_in: ConvNorm<B>,
    pub projection_out: ConvNorm<B>,
    pub pre_highway: Option<Linear<B>>,
    pub highways: Vec<Highway<B>>,
    pub gru: BiGru<B>,
}

impl<B: Backend> Cbhg<B> {
    /// `input: [batch, time, input_size]`, `mask: [batch, time]`
    /// -> `[batch, time, 2 * gru_size]`.
    pub fn forward(&self, input: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 3> {
        let frame_mask = mask.clone().unsqueeze_dim::<3>(1);
        let x = input.clone().swap_dims(1, 2) * frame_mask.clone();

        let banked: Vec<Tensor<B, 3>> = self
            .bank
            .iter()
            .map(|conv| relu(conv.forward(x.clone())))
            .collect();
        let banked = max_pool_pairwise(Tensor::cat(banked, 1)) * frame_mask.clone();

        let projected = relu(self.projection_in.forward(banked)) * frame_mask.clone();
        let projected = self.projection_out.forward(projected) * frame_mask;
        let mut x = projected.swap_dims(1, 2) + input;

        if let Some(linear) = &self.pre_highway {
            x = linear.forward(x);
        }
        for highway in &self.highways {
            x = highway.forward(x);
        }
        self.gru.forward(x, mask)
    }
}

/// Max pool with kernel 2 and stride 1 over time: `out[t] = max(x[t - 1], x[t])`.
fn max_pool_pairwise<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    let time = x.dims()[2];
    if time < 2 {
        return x;
    }
    let shifted = Tensor::cat(
        vec![x.clone().narrow(2, 0, 1), x.clone().narrow(2, 0, time - 1)],
        2,
    );
    x.max_pair(shifted)
}
