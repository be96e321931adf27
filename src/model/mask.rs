//! Host-built masks from per-example lengths.

use burn::tensor::{backend::Backend, Bool, Tensor, TensorData};

/// `[batch, max_len]` float mask, 1 at valid positions.
pub fn length_mask<B: Backend>(lengths: &[usize], max_len: usize, device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = lengths
        .iter()
        .flat_map(|&len| (0..max_len).map(move |t| if t < len { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_data(TensorData::new(values, [lengths.len(), max_len]), device)
}

/// `[batch, max_len]` boolean mask, true at padded positions.
pub fn padding_mask<B: Backend>(
    lengths: &[usize],
    max_len: usize,
    device: &B::Device,
) -> Tensor<B, 2, Bool> {
    let values: Vec<bool> = lengths
        .iter()
        .flat_map(|&len| (0..max_len).map(move |t| t >= len))
        .collect();
    Tensor::from_data(TensorData::new(values, [lengths.len(), max_len]), device)
}

/// Decoder steps that cover at least one valid frame: `ceil(len / r)` per example.
pub fn step_lengths(frame_lengths: &[usize], r: usize) -> Vec<usize> {
    frame_lengths.iter().map(|&len| len.div_ceil(r)).collect()
}

/// Stop targets: 1 from the step that contains the last valid frame onwards.
pub fn stop_targets<B: Backend>(
    frame_lengths: &[usize],
    steps: usize,
    r: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let values: Vec<f32> = frame_lengths
        .iter()
        .flat_map(|&len| (0..steps).map(move |s| if (s + 1) * r >= len { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_data(TensorData::new(values, [frame_lengths.len(), steps]), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn masks_sum_to_lengths() {
        let device = NdArrayDevice::default();
        let lengths = [3, 5, 1];
        let mask = length_mask::<TestBackend>(&lengths, 5, &device);
        let sums = mask.sum_dim(1).into_data().to_vec::<f32>().expect("vec");
        assert_eq!(sums, vec![3.0, 5.0, 1.0]);
    }

    #[test]
    fn stop_target_marks_final_group() {
        let device = NdArrayDevice::default();
        let stops = stop_targets::<TestBackend>(&[7], 3, 3, &device);
        let values = stops.into_data().to_vec::<f32>().expect("vec");
        assert_eq!(values, vec![0.0, 0.0, 1.0]);
        assert_eq!(step_lengths(&[7, 6, 1], 3), vec![3, 2, 1]);
    }
}
