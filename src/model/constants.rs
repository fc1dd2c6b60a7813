pub const HEIGHT: usize = 28;
pub const WIDTH: usize = 28;
pub const CHANNELS: usize = 1;
pub const PIXELS: usize = HEIGHT * WIDTH * CHANNELS;

pub const NUM_CLASSES: usize = 10;

/// Length of the gaussian part of the generator input.
pub const NOISE_DIM: usize = 10;

// CrossGAN autoencoder io shape
pub const AE_SIZE: usize = 128;
pub const AE_CHANNELS: usize = 3;
