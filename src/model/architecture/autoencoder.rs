use burn::{
    nn::{
        InstanceNorm, InstanceNormConfig, LeakyRelu, LeakyReluConfig, Linear, LinearConfig,
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode},
    },
    prelude::*,
};
use std::path::PathBuf;

use super::flatten;
use crate::error::{Error, Result};
use crate::model::checkpoint;
use crate::model::constants::{AE_CHANNELS, AE_SIZE};

/// Stride-2 conv, LeakyReLU, instance norm. Halves the spatial size.
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: InstanceNorm<B>,
    activation: LeakyRelu,
}

impl<B: Backend> DownBlock<B> {
    pub fn new(channels: [usize; 2], slope: f64, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new(channels, [5, 5])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(2, 2))
                .init(device),
            norm: InstanceNormConfig::new(channels[1]).init(device),
            activation: LeakyReluConfig::new().with_negative_slope(slope).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.activation.forward(x);
        self.norm.forward(x)
    }
}

/// Nearest x2 upsample, conv, LeakyReLU, instance norm.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    upsample: Interpolate2d,
    conv: Conv2d<B>,
    norm: InstanceNorm<B>,
    activation: LeakyRelu,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(channels: [usize; 2], slope: f64, device: &B::Device) -> Self {
        Self {
            upsample: Interpolate2dConfig::new()
                .with_scale_factor(Some([2.0, 2.0]))
                .with_mode(InterpolateMode::Nearest)
                .init(),
            conv: Conv2dConfig::new(channels, [5, 5])
                .with_padding(PaddingConfig2d::Explicit(2, 2))
                .init(device),
            norm: InstanceNormConfig::new(channels[1]).init(device),
            activation: LeakyReluConfig::new().with_negative_slope(slope).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.upsample.forward(input);
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);
        self.norm.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    activation: LeakyRelu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(channels: usize, slope: f64, device: &B::Device) -> Self {
        let conv = || {
            Conv2dConfig::new([channels, channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        Self {
            conv1: conv(),
            conv2: conv(),
            activation: LeakyReluConfig::new().with_negative_slope(slope).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.conv1.forward(input.clone()));
        let x = self.conv2.forward(x);
        self.activation.forward(input.add(x))
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    down: Vec<DownBlock<B>>,
    residual: Vec<ResidualBlock<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.down.iter().fold(input, |x, block| block.forward(x));
        self.residual.iter().fold(x, |x, block| block.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    residual: Vec<ResidualBlock<B>>,
    up: Vec<UpBlock<B>>,
}

impl<B: Backend> Decoder<B> {
    pub fn forward(&self, latent: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.residual.iter().fold(latent, |x, block| block.forward(x));
        self.up.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Scores an image with a single unbounded logit.
#[derive(Module, Debug)]
pub struct Critic<B: Backend> {
    down: Vec<DownBlock<B>>,
    output: Linear<B>,
}

impl<B: Backend> Critic<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.down.iter().fold(images, |x, block| block.forward(x));
        self.output.forward(flatten(x))
    }
}

/// Autoencoder with a discriminator on its reconstructions, all trainable.
#[derive(Module, Debug)]
pub struct CrossAutoEncoder<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
    pub critic: Critic<B>,
}

impl<B: Backend> CrossAutoEncoder<B> {
    pub fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.encoder.forward(images)
    }

    pub fn reconstruct(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.decoder.forward(self.encode(images))
    }

    /// Critic score of the reconstruction.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.critic.forward(self.reconstruct(images))
    }
}

#[derive(Config, Debug)]
pub struct AutoEncoderConfig {
    #[config(default = "AE_SIZE")]
    pub width: usize,
    #[config(default = "AE_SIZE")]
    pub height: usize,
    #[config(default = "AE_CHANNELS")]
    pub channels: usize,
    #[config(default = "vec![32, 64, 128, 256]")]
    pub encoder_depths: Vec<usize>,
    #[config(default = "vec![128, 64, 32, 3]")]
    pub decoder_depths: Vec<usize>,
    /// Residual blocks after the encoder and before the decoder.
    #[config(default = "[3, 3]")]
    pub residual_blocks: [usize; 2],
    #[config(default = "vec![16, 32, 64, 128]")]
    pub critic_depths: Vec<usize>,
    #[config(default = 0.2)]
    pub leaky_relu_slope: f64,
}

impl AutoEncoderConfig {
    /// Shape `[channels, height, width]` of the encoder output.
    pub fn latent_shape(&self) -> [usize; 3] {
        let scale = 1 << self.encoder_depths.len();
        let channels = self.encoder_depths.last().copied().unwrap_or(self.channels);
        [channels, self.height / scale, self.width / scale]
    }

    /// Checks that the decoder gives back the input shape and every stride-2
    /// stage sees an even size.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidArchitecture(msg));

        if self.encoder_depths.is_empty() || self.critic_depths.is_empty() {
            return invalid("encoder and critic need at least one block".to_string());
        }
        if self.encoder_depths.len() != self.decoder_depths.len() {
            return invalid(format!(
                "{} down blocks cannot be undone by {} up blocks",
                self.encoder_depths.len(),
                self.decoder_depths.len()
            ));
        }
        if self.decoder_depths.last() != Some(&self.channels) {
            return invalid(format!(
                "decoder ends with {:?} channels, images have {}",
                self.decoder_depths.last(),
                self.channels
            ));
        }
        let stages = self.encoder_depths.len().max(self.critic_depths.len());
        let scale = 1 << stages;
        if self.width % scale != 0 || self.height % scale != 0 {
            return invalid(format!(
                "{}x{} is not divisible by {scale}",
                self.height, self.width
            ));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<CrossAutoEncoder<B>> {
        self.validate()?;
        let slope = self.leaky_relu_slope;
        let [latent_channels, _, _] = self.latent_shape();

        let down = chain(self.channels, &self.encoder_depths)
            .map(|channels| DownBlock::new(channels, slope, device))
            .collect();
        let encoder = Encoder {
            down,
            residual: (0..self.residual_blocks[0])
                .map(|_| ResidualBlock::new(latent_channels, slope, device))
                .collect(),
        };

        let decoder = Decoder {
            residual: (0..self.residual_blocks[1])
                .map(|_| ResidualBlock::new(latent_channels, slope, device))
                .collect(),
            up: chain(latent_channels, &self.decoder_depths)
                .map(|channels| UpBlock::new(channels, slope, device))
                .collect(),
        };

        let scale = 1 << self.critic_depths.len();
        let critic_channels = *self.critic_depths.last().unwrap_or(&self.channels);
        let critic = Critic {
            down: chain(self.channels, &self.critic_depths)
                .map(|channels| DownBlock::new(channels, slope, device))
                .collect(),
            output: LinearConfig::new(
                critic_channels * (self.height / scale) * (self.width / scale),
                1,
            )
            .init(device),
        };

        Ok(CrossAutoEncoder {
            encoder,
            decoder,
            critic,
        })
    }
}

/// `[in, out]` channel pairs for a stack of blocks starting at `input` channels.
fn chain(input: usize, depths: &[usize]) -> impl Iterator<Item = [usize; 2]> + '_ {
    std::iter::once(input)
        .chain(depths.iter().copied())
        .zip(depths.iter().copied())
        .map(|(from, to)| [from, to])
}

/// An autoencoder bound to the file it is persisted under (`<name>.mpk`).
pub struct NamedAutoEncoder<B: Backend> {
    pub name: String,
    pub config: AutoEncoderConfig,
    pub model: CrossAutoEncoder<B>,
}

impl<B: Backend> NamedAutoEncoder<B> {
    pub fn new(name: impl Into<String>, config: &AutoEncoderConfig, device: &B::Device) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            config: config.clone(),
            model: config.init(device)?,
        })
    }

    /// `[channels, height, width]` the model reads and reconstructs.
    pub fn input_shape(&self) -> [usize; 3] {
        [self.config.channels, self.config.height, self.config.width]
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.name)
    }

    pub fn save(&self) -> Result<()> {
        checkpoint::save(&self.model, self.path())
    }

    /// Restores weights saved under the name. With `or_new` a missing or
    /// unreadable file leaves the fresh weights in place.
    pub fn load(self, device: &B::Device, or_new: bool) -> Result<Self> {
        let path = self.path();
        let model = checkpoint::load_or_init(self.model, path, device, or_new)?;
        Ok(Self {
            name: self.name,
            config: self.config,
            model,
        })
    }
}
