use burn::prelude::*;
use burn::tensor::{Distribution, ElementConversion};

use crate::model::constants::NUM_CLASSES;

const EPS: f32 = 1e-7; // to avoid log(0)

/// Cross-entropy on independent sigmoid outputs: rows are renormalized to sum
/// to one before taking the log.
pub fn categorical_cross_entropy<B: Backend>(
    probabilities: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let totals = probabilities.clone().sum_dim(1).clamp_min(EPS);
    let probabilities = (probabilities / totals).clamp(EPS, 1.0 - EPS);
    (targets * probabilities.log()).sum_dim(1).neg().mean()
}

/// Stable BCE on raw logits: `max(x, 0) - x * t + log(1 + exp(-|x|))`.
pub fn binary_cross_entropy_with_logits<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let loss = logits.clone().clamp_min(0.0) - logits.clone() * targets
        + logits.abs().neg().exp().log1p();
    loss.mean()
}

// -- Label Smoothing Functions --
// Smooth labels for the critic to improve training stability
/// Smooth positive labels: range 0.8 - 1.2
pub fn smooth_positive_labels<B: Backend>(labels: Tensor<B, 2>) -> Tensor<B, 2> {
    let shape = labels.dims();
    let noise =
        Tensor::<B, 2>::random(shape, Distribution::Uniform(0.0, 1.0), &labels.device()) * 0.4;
    labels - 0.2 + noise
}

/// Smooth negative labels: range 0.0 - 0.3
pub fn smooth_negative_labels<B: Backend>(labels: Tensor<B, 2>) -> Tensor<B, 2> {
    let shape = labels.dims();
    let noise =
        Tensor::<B, 2>::random(shape, Distribution::Uniform(0.0, 1.0), &labels.device()) * 0.3;
    labels + noise
}

/// Fraction of correct rows. Single-column outputs are thresholded at 0.5,
/// wider ones compared by argmax over the class columns (a trailing noise flag
/// is ignored).
pub fn accuracy<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 2>) -> f32 {
    let [batch_size, width] = output.dims();
    if batch_size == 0 {
        return 0.0;
    }

    let correct = if width == 1 {
        let predicted = output.greater_equal_elem(0.5);
        let expected = targets.greater_equal_elem(0.5);
        predicted.equal(expected).int().sum()
    } else {
        let classes = width.min(NUM_CLASSES);
        let predicted = output.narrow(1, 0, classes).argmax(1);
        let expected = targets.narrow(1, 0, classes).argmax(1);
        predicted.equal(expected).int().sum()
    };

    correct.into_scalar().elem::<f32>() / batch_size as f32
}
