use burn::module::Module;
use burn::tensor::{activation::relu, backend::Backend, Tensor};
use burn_nn::{Dropout, DropoutConfig, Linear, LinearConfig};

/// Bottleneck MLP with dropout after every layer.
///
/// Dropout only fires on autodiff backends, so inference is deterministic.
#[derive(Module, Debug)]
pub struct Prenet<B: Backend> {
    pub layers: Vec<Linear<B>>,
    pub dropout: Dropout,
}

impl<B: Backend> Prenet<B> {
    /// Layers of widths `sizes`, starting from `input_size`.
    pub fn new(input_size: usize, sizes: &[usize], dropout: f64, device: &B::Device) -> Self {
        let mut layers = Vec::with_capacity(sizes.len());
        let mut width = input_size;
        for &size in sizes {
            layers.push(LinearConfig::new(width, size).init(device));
            width = size;
        }
        Self {
            layers,
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        self.layers.iter().fold(input, |x, layer| {
            self.dropout.forward(relu(layer.forward(x)))
        })
    }
}
