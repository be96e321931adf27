//! Length-preserving 1D convolution with per-frame layer normalization.

use burn::module::{Module, Param};
use burn::tensor::{
    backend::Backend,
    module::conv1d,
    ops::{ConvOptions, PadMode},
    Distribution, Tensor,
};
use burn_nn::{LayerNorm, LayerNormConfig};

/// Configuration for [`SameConv1d`].
#[derive(Debug, Clone)]
pub struct SameConv1dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
}

impl SameConv1dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SameConv1d<B> {
        let fan_in = (self.in_channels * self.kernel_size) as f64;
        let bound = 1.0 / fan_in.sqrt();
        let weight = Tensor::random(
            [self.out_channels, self.in_channels, self.kernel_size],
            Distribution::Uniform(-bound, bound),
            device,
        );
        let bias = Tensor::random(
            [self.out_channels],
            Distribution::Uniform(-bound, bound),
            device,
        );
        SameConv1d {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
            kernel_size: self.kernel_size,
        }
    }
}

/// Stride-1 convolution whose output has the input's length.
///
/// Even kernels pad one more sample on the right than on the left.
#[derive(Module, Debug)]
pub struct SameConv1d<B: Backend> {
    /// `[out, in, kernel]`.
    pub weight: Param<Tensor<B, 3>>,
    pub bias: Param<Tensor<B, 1>>,
    pub kernel_size: usize,
}

impl<B: Backend> SameConv1d<B> {
    /// `[batch, in, time] -> [batch, out, time]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let left = (self.kernel_size - 1) / 2;
        let right = self.kernel_size / 2;
        let padded = if left + right > 0 {
            input.pad((left, right, 0, 0), PadMode::Constant(0.0))
        } else {
            input
        };
        conv1d(
            padded,
            self.weight.val(),
            Some(self.bias.val()),
            ConvOptions::new([1], [0], [1], 1),
        )
    }
}

/// Convolution followed by layer normalization over channels.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    pub conv: SameConv1d<B>,
    pub norm: LayerNorm<B>,
}

impl<B: Backend> ConvNorm<B> {
    pub fn new(config: &SameConv1dConfig, device: &B::Device) -> Self {
        Self {
            conv: config.init(device),
            norm: LayerNormConfig::new(config.out_channels).init(device),
        }
    }

    /// `[batch, in, time] -> [batch, out, time]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let out = self.conv.forward(input).swap_dims(1, 2);
        self.norm.forward(out).swap_dims(1, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn output_length_matches_input_for_odd_and_even_kernels() {
        let device = NdArrayDevice::default();
        for kernel in 1..=6 {
            let conv = SameConv1dConfig::new(3, 5, kernel).init::<TestBackend>(&device);
            let input = Tensor::<TestBackend, 3>::ones([2, 3, 7], &device);
            assert_eq!(conv.forward(input).dims(), [2, 5, 7]);
        }
    }

    #[test]
    fn identity_kernel_passes_input_through() {
        let device = NdArrayDevice::default();
        let mut conv = SameConv1dConfig::new(1, 1, 3).init::<TestBackend>(&device);
        conv.weight = Param::from_tensor(Tensor::from_data(
            TensorData::new(vec![0.0_f32, 1.0, 0.0], [1, 1, 3]),
            &device,
        ));
        conv.bias = Param::from_tensor(Tensor::zeros([1], &device));
        let input = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0_f32, 2.0, 3.0, 4.0], [1, 1, 4]),
            &device,
        );
        let output = conv.forward(input).into_data();
        assert_eq!(output.as_slice::<f32>().expect("slice"), &[1.0, 2.0, 3.0, 4.0]);
    }
}
