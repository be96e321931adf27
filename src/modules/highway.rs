use burn::module::Module;
use burn::tensor::{
    activation::{relu, sigmoid},
    backend::Backend,
    Tensor,
};
use burn_nn::{Linear, LinearConfig};

/// Gated residual layer: `relu(H x) * T(x) + x * (1 - T(x))`.
#[derive(Module, Debug)]
pub struct Highway<B: Backend> {
    pub transform: Linear<B>,
    pub gate: Linear<B>,
}

impl<B: Backend> Highway<B> {
    pub fn new(size: usize, device: &B::Device) -> Self {
        Self {
            transform: LinearConfig::new(size, size).init(device),
            gate: LinearConfig::new(size, size).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let h = relu(self.transform.forward(x.clone()));
        let t = sigmoid(self.gate.forward(x.clone()));
        h * t.clone() + x * t.neg().add_scalar(1.0)
    }
}
