//! Gated recurrent units: a single step cell and a masked bidirectional layer.

use burn::module::Module;
use burn::tensor::{
    activation::{sigmoid, tanh},
    backend::Backend,
    Tensor,
};
use burn_nn::{Linear, LinearConfig};

/// One GRU step: reset, update and candidate gates.
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    /// Input projection to the three gates, `[in] -> [3 * hidden]`.
    pub input: Linear<B>,
    /// Recurrent projection, `[hidden] -> [3 * hidden]`.
    pub hidden: Linear<B>,
    pub hidden_size: usize,
}

impl<B: Backend> GruCell<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            input: LinearConfig::new(input_size, 3 * hidden_size).init(device),
            hidden: LinearConfig::new(hidden_size, 3 * hidden_size).init(device),
            hidden_size,
        }
    }

    /// Zero state for `batch` sequences.
    pub fn zero_state(&self, batch: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch, self.hidden_size], device)
    }

    /// `x: [batch, in]`, `h: [batch, hidden]` -> next `h`.
    pub fn step(&self, x: Tensor<B, 2>, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let size = self.hidden_size;
        let gi = self.input.forward(x);
        let gh = self.hidden.forward(h.clone());
        let reset = sigmoid(gi.clone().narrow(1, 0, size) + gh.clone().narrow(1, 0, size));
        let update = sigmoid(gi.clone().narrow(1, size, size) + gh.clone().narrow(1, size, size));
        let candidate = tanh(gi.narrow(1, 2 * size, size) + reset * gh.narrow(1, 2 * size, size));
        let keep = update.clone();
        (update.neg().add_scalar(1.0)) * candidate + keep * h
    }
}

/// Bidirectional GRU over `[batch, time, in]` with a validity mask.
///
/// Padded steps neither update the state nor produce output, so the backward
/// direction of a short sequence starts at its own last valid frame.
#[derive(Module, Debug)]
pub struct BiGru<B: Backend> {
    pub forward_cell: GruCell<B>,
    pub backward_cell: GruCell<B>,
}

impl<B: Backend> BiGru<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            forward_cell: GruCell::new(input_size, hidden_size, device),
            backward_cell: GruCell::new(input_size, hidden_size, device),
        }
    }

    /// `input: [batch, time, in]`, `mask: [batch, time]` (1 valid, 0 padding)
    /// -> `[batch, time, 2 * hidden]`.
    pub fn forward(&self, input: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 3> {
        let forward = self.run(&self.forward_cell, &input, &mask, false);
        let backward = self.run(&self.backward_cell, &input, &mask, true);
        Tensor::cat(vec![forward, backward], 2)
    }

    fn run(
        &self,
        cell: &GruCell<B>,
        input: &Tensor<B, 3>,
        mask: &Tensor<B, 2>,
        reverse: bool,
    ) -> Tensor<B, 3> {
        let [batch, time, features] = input.dims();
        let device = input.device();
        let mut h = cell.zero_state(batch, &device);
        let mut outputs = Vec::with_capacity(time);
        let order: Vec<usize> = if reverse {
            (0..time).rev().collect()
        } else {
            (0..time).collect()
        };
        for t in order {
            let x = input.clone().narrow(1, t, 1).reshape([batch, features]);
            let m = mask.clone().narrow(1, t, 1);
            let next = cell.step(x, h.clone());
            h = next * m.clone() + h * m.clone().neg().add_scalar(1.0);
            outputs.push((t, (h.clone() * m).unsqueeze_dim::<3>(1)));
        }
        outputs.sort_by_key(|(t, _)| *t);
        Tensor::cat(outputs.into_iter().map(|(_, o)| o).collect(), 1)
    }
}
