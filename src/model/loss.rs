//! Masked reconstruction and stop-token losses.
//!
//! Every term is averaged over valid elements only; padded frames and steps
//! are multiplied by zero before the reduction and so receive zero gradient.

use crate::error::{Result, TtsError};
use crate::model::mask::{length_mask, step_lengths, stop_targets};
use crate::model::TacotronOutput;
use burn::tensor::{backend::Backend, ElementConversion, Tensor};

/// Mean absolute error over valid frames: `pred, target: [batch, frames, channels]`,
/// `mask: [batch, frames]`.
pub fn masked_l1<B: Backend>(
    prediction: Tensor<B, 3>,
    target: Tensor<B, 3>,
    mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let channels = prediction.dims()[2] as f32;
    let mask = mask.unsqueeze_dim::<3>(2);
    let valid = mask.clone().sum().mul_scalar(channels).clamp_min(1.0);
    (prediction - target).abs().mul(mask).sum().div(valid)
}

/// Binary cross-entropy on logits averaged over valid steps.
pub fn masked_bce_with_logits<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    // max(x, 0) - x * y + log(1 + exp(-|x|))
    let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log();
    let loss = logits.clone().clamp_min(0.0) - logits * targets + softplus;
    let valid = mask.clone().sum().clamp_min(1.0);
    loss.mul(mask).sum().div(valid)
}

/// Loss terms for one batch; `total` carries the gradient.
#[derive(Debug, Clone)]
pub struct TacotronLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub mel: Tensor<B, 1>,
    pub linear: Tensor<B, 1>,
    pub stop: Tensor<B, 1>,
}

/// Scalar view of [`TacotronLoss`] for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossValues {
    pub total: f32,
    pub mel: f32,
    pub linear: f32,
    pub stop: f32,
}

impl<B: Backend> TacotronLoss<B> {
    /// Combine the three masked terms.
    ///
    /// Targets are `[batch, frames, _]` with `frames` equal to the output
    /// frame count; `frame_lengths` are the unpadded lengths.
    pub fn compute(
        output: &TacotronOutput<B>,
        mel_target: Tensor<B, 3>,
        linear_target: Tensor<B, 3>,
        frame_lengths: &[usize],
        r: usize,
    ) -> Result<Self> {
        let [batch, frames, _] = output.mel.dims();
        if mel_target.dims()[..2] != [batch, frames] || linear_target.dims()[..2] != [batch, frames]
        {
            return Err(TtsError::shape(
                "loss",
                format!(
                    "prediction {:?}, mel target {:?}, linear target {:?}",
                    output.mel.dims(),
                    mel_target.dims(),
                    linear_target.dims()
                ),
            ));
        }
        let device = output.mel.device();
        let frame_mask = length_mask::<B>(frame_lengths, frames, &device);
        let steps = output.stop_logits.dims()[1];
        let step_mask = length_mask::<B>(&step_lengths(frame_lengths, r), steps, &device);
        let stop_target = stop_targets::<B>(frame_lengths, steps, r, &device);

        let mel = masked_l1(output.mel.clone(), mel_target, frame_mask.clone());
        let linear = masked_l1(output.linear.clone(), linear_target, frame_mask);
        let stop = masked_bce_with_logits(output.stop_logits.clone(), stop_target, step_mask);
        Ok(Self {
            total: mel.clone() + linear.clone() + stop.clone(),
            mel,
            linear,
            stop,
        })
    }

    pub fn values(&self) -> LossValues {
        let scalar = |t: &Tensor<B, 1>| t.clone().into_scalar().elem::<f32>();
        LossValues {
            total: scalar(&self.total),
            mel: scalar(&self.mel),
            linear: scalar(&self.linear),
            stop: scalar(&self.stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;
    type TrainBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn l1_ignores_padded_frames() {
        let device = NdArrayDevice::default();
        let prediction = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0_f32, 1.0, 100.0, 100.0], [1, 2, 2]),
            &device,
        );
        let target = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);
        let loss = masked_l1(prediction, target, length_mask(&[1], 2, &device));
        assert!((loss.into_scalar() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn padded_positions_get_zero_gradient() {
        let device = NdArrayDevice::default();
        let prediction = Tensor::<TrainBackend, 3>::from_data(
            TensorData::new(vec![0.5_f32; 12], [2, 3, 2]),
            &device,
        )
        .require_grad();
        let target = Tensor::<TrainBackend, 3>::zeros([2, 3, 2], &device);
        let mask = length_mask::<TrainBackend>(&[3, 1], 3, &device);
        let grads = masked_l1(prediction.clone(), target, mask).backward();
        let grad = prediction
            .grad(&grads)
            .expect("gradient")
            .into_data()
            .to_vec::<f32>()
            .expect("vec");
        // Second example: only its first frame is valid.
        assert!(grad[..6].iter().all(|&g| g > 0.0));
        assert!(grad[6..8].iter().all(|&g| g > 0.0));
        assert!(grad[8..].iter().all(|&g| g == 0.0));
    }

    #[test]
    fn bce_matches_closed_form() {
        let device = NdArrayDevice::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0_f32, 2.0, -3.0], [1, 3]),
            &device,
        );
        let targets = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0_f32, 0.0, 0.0], [1, 3]),
            &device,
        );
        let mask = length_mask::<TestBackend>(&[2], 3, &device);
        let loss = masked_bce_with_logits(logits, targets, mask).into_scalar();
        let expected = (2.0_f32.ln() + (1.0 + 2.0_f32.exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }
}
