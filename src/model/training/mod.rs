pub mod autoencoder;
pub mod classifier;
pub mod detector;
pub mod generator;
pub mod losses;

pub use autoencoder::{AutoEncoderTrainingConfig, train_autoencoder};
pub use classifier::{ClassifierLoss, ClassifierTrainingConfig, train_classifier};
pub use detector::{DetectorTrainingConfig, train_detector};
pub use generator::{GeneratorTrainingConfig, train_generator};

use burn::prelude::*;
use burn::tensor::ElementConversion;

use crate::error::Result;

/// Progress is logged every this many iterations.
pub const LOG_INTERVAL: usize = 100;

fn create_artifact_dir(artifact_dir: &str) -> Result<()> {
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}

fn save_config<C: Config>(config: &C, artifact_dir: &str) -> Result<()> {
    create_artifact_dir(artifact_dir)?;
    config.save(format!("{artifact_dir}/config.json"))?;
    Ok(())
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Running average of a per-batch metric over one epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
