use burn::{
    grad_clipping::GradientClippingConfig,
    module::Module,
    nn::loss::{MseLoss, Reduction::Mean},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::Path;

use super::losses::accuracy;
use super::{LOG_INTERVAL, RunningMean, save_config, scalar};
use crate::error::{Error, Result};
use crate::model::architecture::{ConditionalGenerator, ImageClassifier};
use crate::model::checkpoint;
use crate::model::data::latent::{LatentBatch, LatentSampler};
use crate::utils::digit_grid;

#[derive(Config)]
pub struct GeneratorTrainingConfig {
    pub optimizer: AdamConfig,

    #[config(default = 100)]
    pub num_epochs: usize,

    #[config(default = 64)]
    pub steps_per_epoch: usize,

    #[config(default = 128)]
    pub batch_size: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 2e-4)]
    pub learning_rate: f64,

    /// Rows of the per-epoch sample grid, one column per class.
    #[config(default = 4)]
    pub sample_rows: usize,
}

/// Trains the generator so that a frozen classifier reads the requested class
/// off every generated digit.
pub fn train_generator<B, D>(
    artifact_dir: &str,
    config: GeneratorTrainingConfig,
    generator: ConditionalGenerator<B>,
    judge: D,
    sampler: &mut LatentSampler,
    weights: &Path,
    device: B::Device,
) -> Result<ConditionalGenerator<B>>
where
    B: AutodiffBackend,
    D: Module<B> + ImageClassifier<B>,
{
    save_config(&config, artifact_dir)?;
    B::seed(config.seed);

    let judge = judge.no_grad();
    let mut generator = generator;

    let gradient_clipping = GradientClippingConfig::init(&GradientClippingConfig::Norm(1.0));
    let mut optim = config
        .optimizer
        .with_beta_1(0.5)
        .with_beta_2(0.999)
        .init()
        .with_grad_clipping(gradient_clipping);

    for epoch in 1..=config.num_epochs {
        let mut epoch_loss = RunningMean::default();
        let mut epoch_accuracy = RunningMean::default();

        for step in 0..config.steps_per_epoch {
            let latent = sampler.sample::<B>(config.batch_size, &device);
            let (loss_g, prediction, target) = generator_loss(&generator, &judge, &latent);

            epoch_loss.push(scalar(loss_g.clone()));
            epoch_accuracy.push(accuracy(prediction.detach(), target) as f64);

            if step % LOG_INTERVAL == 0 {
                log::info!(
                    "[Epoch {}/{} Step {}] G Loss: {:.4}, Judged Accuracy: {:.2}%",
                    epoch,
                    config.num_epochs,
                    step,
                    epoch_loss.mean(),
                    epoch_accuracy.mean() * 100.0,
                );
            }

            let grads_g = loss_g.backward();
            let grads_g = GradientsParams::from_grads(grads_g, &generator);
            generator = optim.step(config.learning_rate, generator, grads_g);
        }

        log::info!(
            "[Epoch {}/{}] G Loss: {:.4}, Judged Accuracy: {:.2}%",
            epoch,
            config.num_epochs,
            epoch_loss.mean(),
            epoch_accuracy.mean() * 100.0,
        );

        checkpoint::save(&generator, weights)?;
        save_samples(
            &generator,
            sampler,
            config.sample_rows,
            &device,
            format!("{artifact_dir}/sample-epoch-{epoch}.png"),
        )?;
    }

    Ok(generator)
}

/// MSE between the judge's reading of generated digits and the requested
/// classes. Also returns the prediction and target for accuracy.
fn generator_loss<B: Backend, D: ImageClassifier<B>>(
    generator: &ConditionalGenerator<B>,
    judge: &D,
    latent: &LatentBatch<B>,
) -> (Tensor<B, 1>, Tensor<B, 2>, Tensor<B, 2>) {
    let prediction = judge.classify(generator.generate(latent));
    let target = latent.target(prediction.dims()[1]);
    let loss = MseLoss::new().forward(prediction.clone(), target.clone(), Mean);
    (loss, prediction, target)
}

/// Writes a grid of `rows` rows, each holding the digits 0 to 9.
pub fn save_samples<B: Backend>(
    generator: &ConditionalGenerator<B>,
    sampler: &LatentSampler,
    rows: usize,
    device: &B::Device,
    path: impl AsRef<Path>,
) -> Result<()> {
    let latent = sampler.for_each_class::<B>(rows, device);
    let images = generator.generate(&latent).detach();
    let [count, _, height, width] = images.dims();

    let data: Vec<f32> = images
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::TensorData(format!("{e:?}")))?;
    let digits: Vec<Vec<f32>> = data
        .chunks(height * width)
        .take(count)
        .map(<[f32]>::to_vec)
        .collect();

    match digit_grid(&digits, latent.len() / rows.max(1)) {
        Some(grid) => grid.save(path.as_ref())?,
        None => log::warn!("could not assemble sample grid for {}", path.as_ref().display()),
    }
    Ok(())
}
