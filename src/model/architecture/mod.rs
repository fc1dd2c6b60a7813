pub mod autoencoder;
pub mod classifier;
pub mod generator;

use burn::prelude::*;

pub use autoencoder::{AutoEncoderConfig, CrossAutoEncoder, NamedAutoEncoder};
pub use classifier::{
    Classifier, ClassifierConfig, ConvNet, ConvNetConfig, DeepClassifier, DeepClassifierConfig,
};
pub use generator::{ConditionalGenerator, ConditionalGeneratorConfig};

/// A network mapping `[N, 1, 28, 28]` digits to `[N, outputs]` scores.
pub trait ImageClassifier<B: Backend> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

/// Spatial size after a convolution.
pub const fn conv_out(size: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    (size + 2 * padding - kernel) / stride + 1
}

pub(crate) fn flatten<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch_size, channels, height, width] = x.dims();
    x.reshape([batch_size, channels * height * width])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_out_matches_keras_shapes() {
        assert_eq!(conv_out(28, 3, 1, 0), 26);
        assert_eq!(conv_out(26, 3, 2, 0), 12);
        assert_eq!(conv_out(12, 3, 2, 0), 5);
        assert_eq!(conv_out(7, 3, 2, 1), 4);
        assert_eq!(conv_out(128, 5, 2, 2), 64);
    }
}
