use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction::Mean},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::Path;

use super::losses::{accuracy, categorical_cross_entropy};
use super::{LOG_INTERVAL, RunningMean, save_config, scalar};
use crate::error::Result;
use crate::model::architecture::ImageClassifier;
use crate::model::checkpoint;
use crate::model::data::mnist::{DigitBatcher, NoisyMnist};

#[derive(Config, Debug, PartialEq)]
pub enum ClassifierLoss {
    Mse,
    CrossEntropy,
}

impl ClassifierLoss {
    pub fn forward<B: Backend>(&self, output: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            ClassifierLoss::Mse => MseLoss::new().forward(output, targets, Mean),
            ClassifierLoss::CrossEntropy => categorical_cross_entropy(output, targets),
        }
    }
}

#[derive(Config)]
pub struct ClassifierTrainingConfig {
    pub optimizer: AdamConfig,

    #[config(default = "ClassifierLoss::Mse")]
    pub loss: ClassifierLoss,

    #[config(default = 200)]
    pub num_epochs: usize,

    #[config(default = 128)]
    pub batch_size: usize,

    #[config(default = 4)]
    pub num_workers: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1e-3)]
    pub learning_rate: f64,
}

/// Supervised training on noisy MNIST with a clean validation pass after every
/// epoch. Weights are written to `weights` once per epoch.
pub fn train_classifier<B, M>(
    artifact_dir: &str,
    config: ClassifierTrainingConfig,
    model: M,
    data: &NoisyMnist,
    weights: &Path,
    device: B::Device,
) -> Result<M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    save_config(&config, artifact_dir)?;
    B::seed(config.seed);

    let batcher = DigitBatcher::default();

    let dataloader_train = DataLoaderBuilder::new(batcher.clone())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(data.train());

    let dataloader_test = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(data.test());

    let mut model = model;
    let mut optim = config.optimizer.init::<B, M>();

    for epoch in 1..=config.num_epochs {
        let mut train_loss = RunningMean::default();
        let mut train_accuracy = RunningMean::default();

        for (iteration, batch) in dataloader_train.iter().enumerate() {
            let images = batch.images.to_device(&device);
            let targets = batch.targets.to_device(&device);

            let output = model.classify(images);
            let loss = config.loss.forward(output.clone(), targets.clone());
            let batch_accuracy = accuracy(output.detach(), targets);

            train_loss.push(scalar(loss.clone()));
            train_accuracy.push(batch_accuracy as f64);

            if iteration % LOG_INTERVAL == 0 {
                log::info!(
                    "[Epoch {}/{} Iter {}] Loss: {:.4}, Accuracy: {:.2}%",
                    epoch,
                    config.num_epochs,
                    iteration,
                    train_loss.mean(),
                    train_accuracy.mean() * 100.0,
                );
            }

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let model_valid = model.valid();
        let mut valid_loss = RunningMean::default();
        let mut valid_accuracy = RunningMean::default();

        for batch in dataloader_test.iter() {
            let output = model_valid.classify(batch.images);
            valid_loss.push(scalar(config.loss.forward(output.clone(), batch.targets.clone())));
            valid_accuracy.push(accuracy(output, batch.targets) as f64);
        }

        log::info!(
            "[Epoch {}/{}] Train Loss: {:.4}, Train Accuracy: {:.2}%, Valid Loss: {:.4}, Valid Accuracy: {:.2}%",
            epoch,
            config.num_epochs,
            train_loss.mean(),
            train_accuracy.mean() * 100.0,
            valid_loss.mean(),
            valid_accuracy.mean() * 100.0,
        );

        checkpoint::save(&model, weights)?;
    }

    checkpoint::save(&model, weights)?;
    log::info!("saved classifier weights to {}", weights.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::architecture::{ClassifierConfig, ConvNetConfig, DeepClassifierConfig};
    use crate::model::data::mnist::tests::synthetic_digits;
    use crate::model::data::mnist::{LabelScheme, NoisyMnistConfig};
    use crate::model::data::noise::NoiseConfig;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn tiny_config(loss: ClassifierLoss) -> ClassifierTrainingConfig {
        ClassifierTrainingConfig::new(AdamConfig::new())
            .with_loss(loss)
            .with_num_epochs(1)
            .with_batch_size(4)
            .with_num_workers(1)
    }

    #[test]
    fn one_epoch_writes_weights_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("run").to_string_lossy().to_string();
        let weights = dir.path().join("D");
        let device = <TestBackend as Backend>::Device::default();

        let data = NoisyMnist::from_digits(
            synthetic_digits(6),
            synthetic_digits(3),
            &NoisyMnistConfig::new(NoiseConfig::new(), LabelScheme::Scaled(0.5)),
        )
        .unwrap();
        let model = ClassifierConfig::new().init::<TestBackend>(&device);

        train_classifier(
            &artifact_dir,
            tiny_config(ClassifierLoss::Mse),
            model,
            &data,
            &weights,
            device,
        )
        .unwrap();

        assert!(dir.path().join("D.mpk").exists());
        assert!(Path::new(&artifact_dir).join("config.json").exists());
    }

    #[test]
    fn zero_epochs_still_saves_weights() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().to_string_lossy().to_string();
        let weights = dir.path().join("D59");
        let device = <TestBackend as Backend>::Device::default();

        let data = NoisyMnist::from_digits(
            synthetic_digits(2),
            synthetic_digits(1),
            &NoisyMnistConfig::new(NoiseConfig::new(), LabelScheme::Scaled(0.3)),
        )
        .unwrap();
        let model = DeepClassifierConfig::new().init::<TestBackend>(&device);

        train_classifier(
            &artifact_dir,
            tiny_config(ClassifierLoss::Mse).with_num_epochs(0),
            model,
            &data,
            &weights,
            device.clone(),
        )
        .unwrap();

        assert!(dir.path().join("D59.mpk").exists());
        let fresh = DeepClassifierConfig::new().init::<TestBackend>(&device);
        assert!(checkpoint::load(fresh, &weights, &device).is_ok());
    }

    #[test]
    fn cross_entropy_training_runs_on_sigmoid_net() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().to_string_lossy().to_string();
        let weights = dir.path().join("classifier");
        let device = <TestBackend as Backend>::Device::default();

        let data = NoisyMnist::from_digits(
            synthetic_digits(4),
            synthetic_digits(2),
            &NoisyMnistConfig::new(NoiseConfig::patch(), LabelScheme::Scaled(1.0)),
        )
        .unwrap();
        let model = ConvNetConfig::new().init::<TestBackend>(&device);

        train_classifier(
            &artifact_dir,
            tiny_config(ClassifierLoss::CrossEntropy),
            model,
            &data,
            &weights,
            device,
        )
        .unwrap();
        assert!(dir.path().join("classifier.mpk").exists());

        let loaded = ClassifierTrainingConfig::load(dir.path().join("config.json")).unwrap();
        assert_eq!(loaded.loss, ClassifierLoss::CrossEntropy);
    }
}
