use burn::{
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction::Mean},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::Path;

use super::losses::accuracy;
use super::{LOG_INTERVAL, RunningMean, save_config, scalar};
use crate::error::Result;
use crate::model::architecture::ImageClassifier;
use crate::model::checkpoint;
use crate::model::data::detector::NoiseDetectorSampler;

#[derive(Config)]
pub struct DetectorTrainingConfig {
    pub optimizer: AdamConfig,

    #[config(default = 200)]
    pub num_epochs: usize,

    #[config(default = 128)]
    pub steps_per_epoch: usize,

    #[config(default = 128)]
    pub batch_size: usize,

    #[config(default = 0.5)]
    pub noisy_ratio: f64,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1e-3)]
    pub learning_rate: f64,
}

/// Teaches a single-output network to score clean digits 1 and noisy ones 0.
pub fn train_detector<B, M>(
    artifact_dir: &str,
    config: DetectorTrainingConfig,
    model: M,
    sampler: &mut NoiseDetectorSampler,
    weights: &Path,
    device: B::Device,
) -> Result<M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
{
    save_config(&config, artifact_dir)?;
    B::seed(config.seed);

    let mut model = model;
    let mut optim = config.optimizer.init::<B, M>();

    for epoch in 1..=config.num_epochs {
        let mut epoch_loss = RunningMean::default();
        let mut epoch_accuracy = RunningMean::default();

        for step in 0..config.steps_per_epoch {
            let batch = sampler.next_batch::<B>(&device)?;

            let output = model.classify(batch.images);
            let loss = MseLoss::new().forward(output.clone(), batch.targets.clone(), Mean);

            epoch_loss.push(scalar(loss.clone()));
            epoch_accuracy.push(accuracy(output.detach(), batch.targets) as f64);

            if step % LOG_INTERVAL == 0 {
                log::info!(
                    "[Epoch {}/{} Step {}] Loss: {:.4}, Accuracy: {:.2}%",
                    epoch,
                    config.num_epochs,
                    step,
                    epoch_loss.mean(),
                    epoch_accuracy.mean() * 100.0,
                );
            }

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        log::info!(
            "[Epoch {}/{}] Loss: {:.4}, Accuracy: {:.2}%",
            epoch,
            config.num_epochs,
            epoch_loss.mean(),
            epoch_accuracy.mean() * 100.0,
        );
        checkpoint::save(&model, weights)?;
    }

    Ok(model)
}
