use burn::{
    nn::{
        InstanceNorm, InstanceNormConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu, Sigmoid,
        conv::{Conv2d, Conv2dConfig},
        interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode},
    },
    prelude::*,
};

use crate::model::constants::{CHANNELS, NOISE_DIM, NUM_CLASSES};
use crate::model::data::latent::LatentBatch;

// 7 -> 14 -> 28
const BASE: usize = 7;

/// Class-conditioned digit generator: `(one-hot class, noise) -> [N, 1, 28, 28]`.
#[derive(Module, Debug)]
pub struct ConditionalGenerator<B: Backend> {
    class_in: Linear<B>,
    noise_in: Linear<B>,
    project: Linear<B>,
    project_norm: LayerNorm<B>,
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    conv_out: Conv2d<B>,
    norm1: InstanceNorm<B>,
    norm2: InstanceNorm<B>,
    norm3: InstanceNorm<B>,
    norm4: InstanceNorm<B>,
    upsample: Interpolate2d,
    activation: Relu,
    activation_out: Sigmoid,
}

#[derive(Config, Debug)]
pub struct ConditionalGeneratorConfig {
    #[config(default = "NUM_CLASSES")]
    pub num_classes: usize,
    #[config(default = "NOISE_DIM")]
    pub noise_dim: usize,
}

fn conv3x3<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

impl ConditionalGeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConditionalGenerator<B> {
        let hidden = self.num_classes + self.noise_dim;

        ConditionalGenerator {
            class_in: LinearConfig::new(self.num_classes, self.num_classes).init(device),
            noise_in: LinearConfig::new(self.noise_dim, self.noise_dim).init(device),
            project: LinearConfig::new(hidden, 128 * BASE * BASE).init(device),
            project_norm: LayerNormConfig::new(128 * BASE * BASE).init(device),
            conv1: conv3x3([128, 128], device), // 14x14
            conv2: conv3x3([128, 128], device),
            conv3: conv3x3([128, 64], device), // 28x28
            conv4: conv3x3([64, 64], device),
            conv_out: conv3x3([64, CHANNELS], device),
            norm1: InstanceNormConfig::new(128).init(device),
            norm2: InstanceNormConfig::new(128).init(device),
            norm3: InstanceNormConfig::new(64).init(device),
            norm4: InstanceNormConfig::new(64).init(device),
            upsample: Interpolate2dConfig::new()
                .with_scale_factor(Some([2.0, 2.0]))
                .with_mode(InterpolateMode::Nearest)
                .init(),
            activation: Relu,
            activation_out: Sigmoid::new(),
        }
    }
}

impl<B: Backend> ConditionalGenerator<B> {
    pub fn forward(&self, classes: Tensor<B, 2>, noise: Tensor<B, 2>) -> Tensor<B, 4> {
        let classes = self.activation.forward(self.class_in.forward(classes));
        let noise = self.activation.forward(self.noise_in.forward(noise));
        let x = Tensor::cat(vec![classes, noise], 1);

        let x = self.activation.forward(self.project.forward(x));
        let x = self.project_norm.forward(x);
        let mut x = x.reshape([-1, 128, BASE as i32, BASE as i32]);

        x = self.upsample.forward(x);
        x = self.norm1.forward(self.activation.forward(self.conv1.forward(x)));
        x = self.norm2.forward(self.activation.forward(self.conv2.forward(x)));

        x = self.upsample.forward(x);
        x = self.norm3.forward(self.activation.forward(self.conv3.forward(x)));
        x = self.norm4.forward(self.activation.forward(self.conv4.forward(x)));

        self.activation_out.forward(self.conv_out.forward(x))
    }

    pub fn generate(&self, latent: &LatentBatch<B>) -> Tensor<B, 4> {
        self.forward(latent.classes.clone(), latent.noise.clone())
    }
}
