use burn::{
    data::dataloader::DataLoaderBuilder,
    grad_clipping::GradientClippingConfig,
    nn::loss::{MseLoss, Reduction::Mean},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use super::losses::{
    binary_cross_entropy_with_logits, smooth_negative_labels, smooth_positive_labels,
};
use super::{LOG_INTERVAL, RunningMean, save_config, scalar};
use crate::error::{Error, Result};
use crate::model::architecture::NamedAutoEncoder;
use crate::model::constants::AE_CHANNELS;
use crate::model::data::folder::{ImageBatcher, ImageFolderDataset};
use crate::utils::chw_vec_to_image;

#[derive(Config)]
pub struct AutoEncoderTrainingConfig {
    pub optimizer_ae: AdamConfig,
    pub optimizer_critic: AdamConfig,

    #[config(default = 100)]
    pub num_epochs: usize,

    #[config(default = 16)]
    pub batch_size: usize,

    #[config(default = 4)]
    pub num_workers: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1e-4)]
    pub ae_learning_rate: f64,

    #[config(default = 1e-4)]
    pub critic_learning_rate: f64,

    /// Weight of the "fool the critic" term in the autoencoder loss.
    #[config(default = 0.01)]
    pub adv_weight: f64,
}

/// Joint training of the autoencoder and the critic judging its
/// reconstructions. Weights are saved under the autoencoder's name every epoch.
pub fn train_autoencoder<B: AutodiffBackend>(
    artifact_dir: &str,
    config: AutoEncoderTrainingConfig,
    autoencoder: NamedAutoEncoder<B>,
    dataset: ImageFolderDataset,
    device: B::Device,
) -> Result<NamedAutoEncoder<B>> {
    let [channels, height, width] = autoencoder.input_shape();
    if channels != AE_CHANNELS || dataset.size() != [height, width] {
        let [data_height, data_width] = dataset.size();
        return Err(Error::InvalidArchitecture(format!(
            "autoencoder expects {channels}x{height}x{width} images, \
             the folder yields {AE_CHANNELS}x{data_height}x{data_width}"
        )));
    }

    save_config(&config, artifact_dir)?;
    B::seed(config.seed);

    let dataloader_train = DataLoaderBuilder::new(ImageBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(dataset);

    let mut autoencoder = autoencoder;

    let adam = |optimizer: &AdamConfig| {
        optimizer
            .clone()
            .with_beta_1(0.5)
            .with_beta_2(0.999)
    };
    let clipping = || GradientClippingConfig::init(&GradientClippingConfig::Norm(1.0));
    let mut optim_encoder = adam(&config.optimizer_ae)
        .init()
        .with_grad_clipping(clipping());
    let mut optim_decoder = adam(&config.optimizer_ae)
        .init()
        .with_grad_clipping(clipping());
    let mut optim_critic = adam(&config.optimizer_critic)
        .init()
        .with_grad_clipping(clipping());

    for epoch in 1..=config.num_epochs {
        let mut critic_loss = RunningMean::default();
        let mut recon_loss = RunningMean::default();
        let mut adv_loss = RunningMean::default();
        let mut last_pair = None;

        for (iteration, batch) in dataloader_train.iter().enumerate() {
            let real_images = batch.images.to_device(&device);
            let batch_size = real_images.dims()[0];

            let reconstructed = autoencoder.model.reconstruct(real_images.clone());

            // --- 1. Train the critic --- //
            let critic = &autoencoder.model.critic;
            let real_logits = critic.forward(real_images.clone());
            let fake_logits = critic.forward(reconstructed.clone().detach());

            let real_labels =
                smooth_positive_labels(Tensor::<B, 2>::ones([batch_size, 1], &device));
            let fake_labels =
                smooth_negative_labels(Tensor::<B, 2>::zeros([batch_size, 1], &device));

            let loss_d = binary_cross_entropy_with_logits(real_logits, real_labels)
                + binary_cross_entropy_with_logits(fake_logits, fake_labels);

            let grads_d = loss_d.backward();
            let grads_d = GradientsParams::from_grads(grads_d, &autoencoder.model.critic);
            autoencoder.model.critic = optim_critic.step(
                config.critic_learning_rate,
                autoencoder.model.critic,
                grads_d,
            );

            // --- 2. Train the autoencoder --- //
            let loss_rec =
                MseLoss::new().forward(reconstructed.clone(), real_images.clone(), Mean);
            let fooled = autoencoder.model.critic.forward(reconstructed.clone());
            let loss_adv = binary_cross_entropy_with_logits(
                fooled,
                Tensor::<B, 2>::ones([batch_size, 1], &device),
            );
            let loss_ae = loss_rec.clone() + loss_adv.clone() * (config.adv_weight as f32);

            let mut grads_ae = loss_ae.backward();
            // critic gradients of this pass are dropped
            let grads_encoder =
                GradientsParams::from_module(&mut grads_ae, &autoencoder.model.encoder);
            let grads_decoder =
                GradientsParams::from_module(&mut grads_ae, &autoencoder.model.decoder);
            autoencoder.model.encoder = optim_encoder.step(
                config.ae_learning_rate,
                autoencoder.model.encoder,
                grads_encoder,
            );
            autoencoder.model.decoder = optim_decoder.step(
                config.ae_learning_rate,
                autoencoder.model.decoder,
                grads_decoder,
            );

            critic_loss.push(scalar(loss_d));
            recon_loss.push(scalar(loss_rec));
            adv_loss.push(scalar(loss_adv));

            if iteration % LOG_INTERVAL == 0 {
                log::info!(
                    "[Epoch {}/{} Iter {}] D Loss: {:.4}, Recon Loss: {:.4}, Adv Loss: {:.4}",
                    epoch,
                    config.num_epochs,
                    iteration,
                    critic_loss.mean(),
                    recon_loss.mean(),
                    adv_loss.mean(),
                );
            }

            last_pair = Some((real_images, reconstructed.detach()));
        }

        log::info!(
            "[Epoch {}/{}] D Loss: {:.4}, Recon Loss: {:.4}, Adv Loss: {:.4}",
            epoch,
            config.num_epochs,
            critic_loss.mean(),
            recon_loss.mean(),
            adv_loss.mean(),
        );

        autoencoder.save()?;

        if let Some((real, reconstructed)) = last_pair {
            save_reconstruction(
                real,
                reconstructed,
                format!("{artifact_dir}/reconstruction-epoch-{epoch}.png"),
            )?;
        }
    }

    Ok(autoencoder)
}

/// Stores the first image of a batch next to its reconstruction.
fn save_reconstruction<B: Backend>(
    real: Tensor<B, 4>,
    reconstructed: Tensor<B, 4>,
    path: String,
) -> Result<()> {
    let [_, _, height, width] = real.dims();
    // [1, C, H, 2W]
    let pair = Tensor::cat(vec![real.narrow(0, 0, 1), reconstructed.narrow(0, 0, 1)], 3);
    let data: Vec<f32> = pair
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::TensorData(format!("{e:?}")))?;

    match chw_vec_to_image(&data, height, width * 2, true) {
        Some(img) => img.save(&path)?,
        None => log::warn!("could not convert reconstruction to an image: {path}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::architecture::AutoEncoderConfig;
    use burn::backend::{Autodiff, NdArray};
    use std::path::Path;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn small_config() -> AutoEncoderConfig {
        AutoEncoderConfig::new()
            .with_width(16)
            .with_height(16)
            .with_encoder_depths(vec![4, 8])
            .with_decoder_depths(vec![4, 3])
            .with_residual_blocks([1, 1])
            .with_critic_depths(vec![2, 4])
    }

    fn image_folder(root: &Path) -> std::path::PathBuf {
        let images = root.join("images");
        std::fs::create_dir_all(&images).unwrap();
        for i in 0..3u8 {
            image::RgbImage::from_pixel(32, 32, image::Rgb([i * 80, 40, 200]))
                .save(images.join(format!("{i}.png")))
                .unwrap();
        }
        images
    }

    fn one_epoch() -> AutoEncoderTrainingConfig {
        AutoEncoderTrainingConfig::new(AdamConfig::new(), AdamConfig::new())
            .with_num_epochs(1)
            .with_batch_size(2)
            .with_num_workers(1)
    }

    #[test]
    fn one_epoch_on_a_tiny_folder() {
        let dir = tempfile::tempdir().unwrap();
        let images = image_folder(dir.path());
        let artifact_dir = dir.path().join("run").to_string_lossy().to_string();
        let name = dir.path().join("cross").to_string_lossy().to_string();
        let device = <TestBackend as Backend>::Device::default();

        let autoencoder =
            NamedAutoEncoder::<TestBackend>::new(name, &small_config(), &device).unwrap();
        let dataset = ImageFolderDataset::new(&images, 16, 16).unwrap();
        let trained =
            train_autoencoder(&artifact_dir, one_epoch(), autoencoder, dataset, device).unwrap();

        assert!(dir.path().join("cross.mpk").exists());
        let preview = image::open(Path::new(&artifact_dir).join("reconstruction-epoch-1.png"))
            .unwrap();
        assert_eq!((preview.width(), preview.height()), (32, 16));
        assert!(trained.name.ends_with("cross"));
    }

    #[test]
    fn folder_size_must_match_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let images = image_folder(dir.path());
        let artifact_dir = dir.path().join("run").to_string_lossy().to_string();
        let name = dir.path().join("cross").to_string_lossy().to_string();
        let device = <TestBackend as Backend>::Device::default();

        let autoencoder =
            NamedAutoEncoder::<TestBackend>::new(name, &small_config(), &device).unwrap();
        let dataset = ImageFolderDataset::new(&images, 32, 32).unwrap();
        let result = train_autoencoder(&artifact_dir, one_epoch(), autoencoder, dataset, device);

        assert!(matches!(result, Err(Error::InvalidArchitecture(_))));
        assert!(!dir.path().join("cross.mpk").exists());
    }
}
