use burn::{
    nn::{
        Dropout, DropoutConfig, LeakyRelu, LeakyReluConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu, Sigmoid,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
};

use super::{ImageClassifier, conv_out, flatten};
use crate::model::constants::HEIGHT;

/// Two-conv MNIST classifier with linear outputs, trained with MSE on soft targets.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    linear1: Linear<B>,
    linear2: Linear<B>,
    conv_dropout: Dropout,
    dense_dropout: Dropout,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    #[config(default = 10)]
    pub outputs: usize,
    #[config(default = 0.25)]
    conv_dropout: f64,
    #[config(default = 0.5)]
    dense_dropout: f64,
}

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        let size = conv_out(conv_out(HEIGHT, 3, 1, 0), 3, 2, 0); // 28 -> 26 -> 12

        Classifier {
            conv1: Conv2dConfig::new([1, 32], [3, 3]).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([2, 2])
                .init(device),
            linear1: LinearConfig::new(64 * size * size, 128).init(device),
            linear2: LinearConfig::new(128, self.outputs).init(device),
            conv_dropout: DropoutConfig::new(self.conv_dropout).init(),
            dense_dropout: DropoutConfig::new(self.dense_dropout).init(),
            activation: Relu,
        }
    }
}

impl<B: Backend> Classifier<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.conv_dropout.forward(x);

        let x = self.activation.forward(self.linear1.forward(flatten(x)));
        let x = self.dense_dropout.forward(x);
        self.linear2.forward(x)
    }
}

impl<B: Backend> ImageClassifier<B> for Classifier<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

/// The deeper variant used as the generator's frozen judge.
#[derive(Module, Debug)]
pub struct DeepClassifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    linear1: Linear<B>,
    linear2: Linear<B>,
    linear3: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct DeepClassifierConfig {
    #[config(default = 10)]
    pub outputs: usize,
    #[config(default = 0.5)]
    dropout: f64,
}

impl DeepClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DeepClassifier<B> {
        // 28 -> 26 -> 12 -> 5
        let size = conv_out(conv_out(conv_out(HEIGHT, 3, 1, 0), 3, 2, 0), 3, 2, 0);

        DeepClassifier {
            conv1: Conv2dConfig::new([1, 32], [3, 3]).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([2, 2])
                .init(device),
            conv3: Conv2dConfig::new([64, 64], [3, 3])
                .with_stride([2, 2])
                .init(device),
            linear1: LinearConfig::new(64 * size * size, 128).init(device),
            linear2: LinearConfig::new(128, 128).init(device),
            linear3: LinearConfig::new(128, self.outputs).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu,
        }
    }
}

impl<B: Backend> DeepClassifier<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.dropout.forward(x);
        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.dropout.forward(x);

        let x = self.activation.forward(self.linear1.forward(flatten(x)));
        let x = self.dropout.forward(x);
        let x = self.activation.forward(self.linear2.forward(x));
        let x = self.dropout.forward(x);
        self.linear3.forward(x)
    }
}

impl<B: Backend> ImageClassifier<B> for DeepClassifier<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

/// Four strided "same" convolutions and a sigmoid head. With ten outputs it
/// recognises digits, with one it tells clean digits from noisy ones.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    output: Linear<B>,
    dropout: Dropout,
    activation: LeakyRelu,
    sigmoid: Sigmoid,
}

#[derive(Config, Debug)]
pub struct ConvNetConfig {
    #[config(default = 10)]
    pub outputs: usize,
    #[config(default = 0.3)]
    leaky_relu_slope: f64,
    #[config(default = 0.25)]
    dropout: f64,
}

impl ConvNetConfig {
    pub fn detector() -> Self {
        Self::new().with_outputs(1)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        let same = || PaddingConfig2d::Explicit(1, 1);
        // 28 -> 28 -> 14 -> 7 -> 4
        let size = [1, 2, 2, 2]
            .iter()
            .fold(HEIGHT, |size, &stride| conv_out(size, 3, stride, 1));

        ConvNet {
            conv1: Conv2dConfig::new([1, 32], [3, 3])
                .with_padding(same())
                .init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([2, 2])
                .with_padding(same())
                .init(device),
            conv3: Conv2dConfig::new([64, 128], [3, 3])
                .with_stride([2, 2])
                .with_padding(same())
                .init(device),
            conv4: Conv2dConfig::new([128, 256], [3, 3])
                .with_stride([2, 2])
                .with_padding(same())
                .init(device),
            output: LinearConfig::new(256 * size * size, self.outputs).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.leaky_relu_slope)
                .init(),
            sigmoid: Sigmoid::new(),
        }
    }
}

impl<B: Backend> ConvNet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for conv in [&self.conv1, &self.conv2, &self.conv3, &self.conv4] {
            x = conv.forward(x);
            x = self.activation.forward(x);
            x = self.dropout.forward(x);
        }
        self.sigmoid.forward(self.output.forward(flatten(x)))
    }
}

impl<B: Backend> ImageClassifier<B> for ConvNet<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}
