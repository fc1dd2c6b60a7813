use anyhow::Context;
use burn::{
    data::dataset::vision::MnistDataset,
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};

use crate::model::architecture::{
    AutoEncoderConfig, ClassifierConfig, ConditionalGeneratorConfig, ConvNetConfig,
    DeepClassifier, DeepClassifierConfig, ImageClassifier, NamedAutoEncoder,
};
use crate::model::checkpoint;
use crate::model::constants::{AE_SIZE, NOISE_DIM, NUM_CLASSES};
use crate::model::data::detector::NoiseDetectorSampler;
use crate::model::data::folder::ImageFolderDataset;
use crate::model::data::latent::LatentSampler;
use crate::model::data::mnist::{LabelScheme, NoisyMnist, NoisyMnistConfig, load_split};
use crate::model::data::noise::NoiseConfig;
use crate::model::training::generator::save_samples;
use crate::model::training::{
    AutoEncoderTrainingConfig, ClassifierLoss, ClassifierTrainingConfig, DetectorTrainingConfig,
    GeneratorTrainingConfig, train_autoencoder, train_classifier, train_detector,
    train_generator,
};
use crate::utils::digit_grid;
use crate::{MyAutodiffBackend, MyBackend};

type Device = <MyAutodiffBackend as Backend>::Device;

#[derive(Parser, Debug)]
#[command(name = "noizy_gan", version, about = "Noisy MNIST classifiers, a conditional digit generator and a cross autoencoder")]
pub struct Cli {
    /// Directory for per-run configs, logs and sample images
    #[arg(long, global = true, default_value = "artifacts")]
    pub artifact_dir: String,

    #[arg(long, global = true, default_value_t = 42)]
    pub seed: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classifier on MNIST plus a globally noised copy with scaled-down targets
    Classifier(ClassifierArgs),
    /// Classifier on the digits 5 to 9 plus a patch-noised copy
    Classifier59(Classifier59Args),
    /// Eleven-output classifier whose last output flags noisy digits
    Flagged(FlaggedArgs),
    /// Deeper ConvNet trained on clean MNIST with cross-entropy
    Digits(DigitsArgs),
    /// Single-output network telling clean digits from patch-noised ones
    Detector(DetectorArgs),
    /// Conditional generator trained against a frozen classifier
    Generator(GeneratorArgs),
    /// Autoencoder with a critic on its reconstructions
    Autoencoder(AutoEncoderArgs),
    /// Grid of clean MNIST digits above their noised versions
    Preview(PreviewArgs),
    /// Grid of generated digits from saved generator weights
    Sample(SampleArgs),
}

#[derive(Args, Debug)]
pub struct ClassifierArgs {
    #[arg(short, long, default_value_t = 200)]
    pub epochs: usize,
    #[arg(short, long, default_value_t = 128)]
    pub batch_size: usize,
    /// Weights path, without the `.mpk` extension
    #[arg(short, long, default_value = "D")]
    pub path: String,
    /// Target scale for noisy digits
    #[arg(long, default_value_t = 0.5)]
    pub noise_y: f32,
}

#[derive(Args, Debug)]
pub struct Classifier59Args {
    #[arg(short, long, default_value_t = 200)]
    pub epochs: usize,
    #[arg(short, long, default_value_t = 128)]
    pub batch_size: usize,
    #[arg(short, long, default_value = "D59")]
    pub path: String,
    #[arg(long, default_value_t = 0.3)]
    pub noise_y: f32,
    /// Noise amplitude inside the patch
    #[arg(long, default_value_t = 0.5)]
    pub noise_x: f64,
}

#[derive(Args, Debug)]
pub struct FlaggedArgs {
    #[arg(short, long, default_value_t = 200)]
    pub epochs: usize,
    #[arg(short, long, default_value_t = 128)]
    pub batch_size: usize,
    #[arg(short, long, default_value = "D11")]
    pub path: String,
}

#[derive(Args, Debug)]
pub struct DigitsArgs {
    #[arg(short, long, default_value_t = 200)]
    pub epochs: usize,
    #[arg(short, long, default_value_t = 128)]
    pub batch_size: usize,
    #[arg(short, long, default_value = "classifier")]
    pub path: String,
}

#[derive(Args, Debug)]
pub struct DetectorArgs {
    #[arg(short, long, default_value_t = 200)]
    pub epochs: usize,
    #[arg(short, long, default_value_t = 128)]
    pub batch_size: usize,
    #[arg(short, long, default_value_t = 128)]
    pub steps: usize,
    /// Share of every batch that gets patch noise
    #[arg(long, default_value_t = 0.5)]
    pub noisy_ratio: f64,
    #[arg(short, long, default_value = "noizy")]
    pub path: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum JudgeArch {
    Classifier,
    Deep,
}

#[derive(Args, Debug)]
pub struct GeneratorArgs {
    #[arg(short, long, default_value_t = 100)]
    pub epochs: usize,
    #[arg(short, long, default_value_t = 64)]
    pub steps: usize,
    #[arg(short, long, default_value_t = 128)]
    pub batch_size: usize,
    #[arg(short, long, default_value = "G")]
    pub path: String,
    /// Trained classifier weights; these are required
    #[arg(long, default_value = "D")]
    pub discriminator_path: String,
    #[arg(long, value_enum, default_value_t = JudgeArch::Deep)]
    pub discriminator_arch: JudgeArch,
    /// Output width of the classifier, 11 for the flagged one
    #[arg(long, default_value_t = NUM_CLASSES)]
    pub discriminator_outputs: usize,
}

#[derive(Args, Debug)]
pub struct AutoEncoderArgs {
    /// Weights are stored as `<name>.mpk`
    #[arg(long, default_value = "cross")]
    pub name: String,
    /// Folder of training images
    #[arg(long, default_value = "dataset/train")]
    pub data: PathBuf,
    #[arg(short, long, default_value_t = 100)]
    pub epochs: usize,
    #[arg(short, long, default_value_t = 16)]
    pub batch_size: usize,
    /// Side of the square images the model is built for
    #[arg(long, default_value_t = AE_SIZE)]
    pub size: usize,
    /// Fail instead of starting from fresh weights
    #[arg(long)]
    pub require_weights: bool,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: usize,
    /// Use 7x7 patch noise instead of whole-image noise
    #[arg(long)]
    pub patch: bool,
    #[arg(short, long, default_value = "preview.png")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[arg(short, long, default_value = "G")]
    pub path: String,
    #[arg(long, default_value_t = 4)]
    pub rows: usize,
    #[arg(short, long, default_value = "samples.png")]
    pub output: PathBuf,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let device = Device::default();
    let artifact_dir = cli.artifact_dir.as_str();
    let seed = cli.seed;

    match cli.command {
        Command::Classifier(args) => {
            let data = NoisyMnist::load(
                &NoisyMnistConfig::new(NoiseConfig::new(), LabelScheme::Scaled(args.noise_y))
                    .with_seed(seed),
            )?;
            let config = ClassifierTrainingConfig::new(AdamConfig::new())
                .with_num_epochs(args.epochs)
                .with_batch_size(args.batch_size)
                .with_seed(seed);
            let model = ClassifierConfig::new().init::<MyAutodiffBackend>(&device);
            fit_classifier(
                &format!("{artifact_dir}/classifier"),
                config,
                model,
                &data,
                &args.path,
                &device,
            )
        }
        Command::Classifier59(args) => {
            let noise = NoiseConfig::patch().with_scaler(args.noise_x);
            let data = NoisyMnist::load(
                &NoisyMnistConfig::new(noise, LabelScheme::Scaled(args.noise_y))
                    .with_min_digit(Some(5))
                    .with_seed(seed),
            )?;
            let config = ClassifierTrainingConfig::new(AdamConfig::new())
                .with_num_epochs(args.epochs)
                .with_batch_size(args.batch_size)
                .with_seed(seed);
            let model = deep_classifier::<MyAutodiffBackend>(NUM_CLASSES, &device);
            fit_classifier(
                &format!("{artifact_dir}/classifier59"),
                config,
                model,
                &data,
                &args.path,
                &device,
            )
        }
        Command::Flagged(args) => {
            let labels = LabelScheme::Flagged(1.0);
            let outputs = labels.target_width();
            let data = NoisyMnist::load(
                &NoisyMnistConfig::new(NoiseConfig::patch(), labels).with_seed(seed),
            )?;
            let config = ClassifierTrainingConfig::new(AdamConfig::new())
                .with_num_epochs(args.epochs)
                .with_batch_size(args.batch_size)
                .with_seed(seed);
            let model = ClassifierConfig::new()
                .with_outputs(outputs)
                .init::<MyAutodiffBackend>(&device);
            fit_classifier(
                &format!("{artifact_dir}/flagged"),
                config,
                model,
                &data,
                &args.path,
                &device,
            )
        }
        Command::Digits(args) => {
            let data = NoisyMnist::load(
                &NoisyMnistConfig::new(NoiseConfig::new(), LabelScheme::Scaled(1.0))
                    .with_noisy_copies(false)
                    .with_seed(seed),
            )?;
            let config = ClassifierTrainingConfig::new(AdamConfig::new())
                .with_loss(ClassifierLoss::CrossEntropy)
                .with_num_epochs(args.epochs)
                .with_batch_size(args.batch_size)
                .with_seed(seed);
            let model = ConvNetConfig::new().init::<MyAutodiffBackend>(&device);
            fit_classifier(
                &format!("{artifact_dir}/digits"),
                config,
                model,
                &data,
                &args.path,
                &device,
            )
        }
        Command::Detector(args) => run_detector(artifact_dir, seed, args, &device),
        Command::Generator(args) => run_generator(artifact_dir, seed, args, &device),
        Command::Autoencoder(args) => run_autoencoder(artifact_dir, seed, args, &device),
        Command::Preview(args) => run_preview(seed, args),
        Command::Sample(args) => run_sample(seed, args),
    }
}

/// The `classifier59` network, which is also the default generator judge.
fn deep_classifier<B: Backend>(outputs: usize, device: &B::Device) -> DeepClassifier<B> {
    DeepClassifierConfig::new().with_outputs(outputs).init(device)
}

/// Resumes from `path` when weights exist there, then trains and saves back
/// to the same path.
fn fit_classifier<M>(
    artifact_dir: &str,
    config: ClassifierTrainingConfig,
    model: M,
    data: &NoisyMnist,
    path: &str,
    device: &Device,
) -> anyhow::Result<()>
where
    M: AutodiffModule<MyAutodiffBackend> + ImageClassifier<MyAutodiffBackend>,
    M::InnerModule: ImageClassifier<MyBackend>,
{
    let weights = Path::new(path);
    let model = checkpoint::load_or_init(model, weights, device, true)?;
    train_classifier(artifact_dir, config, model, data, weights, device.clone())?;
    log::info!("classifier weights saved to {}.mpk", weights.display());
    Ok(())
}

fn run_detector(
    artifact_dir: &str,
    seed: u64,
    args: DetectorArgs,
    device: &Device,
) -> anyhow::Result<()> {
    let config = DetectorTrainingConfig::new(AdamConfig::new())
        .with_num_epochs(args.epochs)
        .with_steps_per_epoch(args.steps)
        .with_batch_size(args.batch_size)
        .with_noisy_ratio(args.noisy_ratio)
        .with_seed(seed);

    let digits = load_split(MnistDataset::train());
    let mut sampler = NoiseDetectorSampler::new(
        digits,
        config.batch_size,
        config.noisy_ratio,
        NoiseConfig::patch(),
        seed,
    )?;
    log::info!(
        "detector batches: {} noisy of {}",
        sampler.n_noisy(),
        sampler.batch_size()
    );

    let weights = Path::new(&args.path);
    let model = ConvNetConfig::detector().init::<MyAutodiffBackend>(device);
    let model = checkpoint::load_or_init(model, weights, device, true)?;
    train_detector(
        &format!("{artifact_dir}/detector"),
        config,
        model,
        &mut sampler,
        weights,
        device.clone(),
    )?;
    Ok(())
}

fn run_generator(
    artifact_dir: &str,
    seed: u64,
    args: GeneratorArgs,
    device: &Device,
) -> anyhow::Result<()> {
    let artifact_dir = format!("{artifact_dir}/generator");
    let config = GeneratorTrainingConfig::new(AdamConfig::new())
        .with_num_epochs(args.epochs)
        .with_steps_per_epoch(args.steps)
        .with_batch_size(args.batch_size)
        .with_seed(seed);

    let weights = Path::new(&args.path);
    let generator = ConditionalGeneratorConfig::new().init::<MyAutodiffBackend>(device);
    let generator = checkpoint::load_or_init(generator, weights, device, true)?;
    let mut sampler = LatentSampler::new(NOISE_DIM, seed);

    let judge_path = Path::new(&args.discriminator_path);
    let context = || {
        format!(
            "generator needs trained {:?} classifier weights at {}",
            args.discriminator_arch,
            judge_path.display()
        )
    };

    match args.discriminator_arch {
        JudgeArch::Deep => {
            let judge = deep_classifier::<MyAutodiffBackend>(args.discriminator_outputs, device);
            let judge = checkpoint::load(judge, judge_path, device).with_context(context)?;
            train_generator(
                &artifact_dir,
                config,
                generator,
                judge,
                &mut sampler,
                weights,
                device.clone(),
            )?;
        }
        JudgeArch::Classifier => {
            let judge = ClassifierConfig::new()
                .with_outputs(args.discriminator_outputs)
                .init::<MyAutodiffBackend>(device);
            let judge = checkpoint::load(judge, judge_path, device).with_context(context)?;
            train_generator(
                &artifact_dir,
                config,
                generator,
                judge,
                &mut sampler,
                weights,
                device.clone(),
            )?;
        }
    }
    Ok(())
}

fn autoencoder_config(args: &AutoEncoderArgs) -> AutoEncoderConfig {
    AutoEncoderConfig::new()
        .with_width(args.size)
        .with_height(args.size)
}

fn run_autoencoder(
    artifact_dir: &str,
    seed: u64,
    args: AutoEncoderArgs,
    device: &Device,
) -> anyhow::Result<()> {
    let ae_config = autoencoder_config(&args);
    let dataset = ImageFolderDataset::new(&args.data, ae_config.height, ae_config.width)
        .with_context(|| format!("cannot read training images from {}", args.data.display()))?;

    let autoencoder = NamedAutoEncoder::<MyAutodiffBackend>::new(args.name, &ae_config, device)?
        .load(device, !args.require_weights)?;

    let config = AutoEncoderTrainingConfig::new(AdamConfig::new(), AdamConfig::new())
        .with_num_epochs(args.epochs)
        .with_batch_size(args.batch_size)
        .with_seed(seed);

    let autoencoder = train_autoencoder(
        &format!("{artifact_dir}/autoencoder"),
        config,
        autoencoder,
        dataset,
        device.clone(),
    )?;
    log::info!("autoencoder saved to {}.mpk", autoencoder.path().display());
    Ok(())
}

fn run_preview(seed: u64, args: PreviewArgs) -> anyhow::Result<()> {
    let noise = if args.patch {
        NoiseConfig::patch()
    } else {
        NoiseConfig::new()
    };
    let mut rng = StdRng::seed_from_u64(seed);

    let clean: Vec<Vec<f32>> = load_split(MnistDataset::test())
        .into_iter()
        .take(args.count)
        .map(|digit| digit.pixels)
        .collect();
    let mut noisy = clean.clone();
    for pixels in noisy.iter_mut() {
        noise.apply(pixels, &mut rng)?;
    }

    let cols = clean.len();
    let digits: Vec<Vec<f32>> = clean.into_iter().chain(noisy).collect();
    let grid = digit_grid(&digits, cols).context("no digits to preview")?;
    grid.save(&args.output)?;
    log::info!("preview saved to {}", args.output.display());
    Ok(())
}

fn run_sample(seed: u64, args: SampleArgs) -> anyhow::Result<()> {
    let device = <MyBackend as Backend>::Device::default();
    let generator = ConditionalGeneratorConfig::new().init::<MyBackend>(&device);
    let generator = checkpoint::load(generator, &args.path, &device)
        .with_context(|| format!("cannot load generator weights from {}", args.path))?;

    let sampler = LatentSampler::new(NOISE_DIM, seed);
    save_samples(&generator, &sampler, args.rows, &device, &args.output)?;
    log::info!("samples saved to {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generator_defaults() {
        let cli = Cli::try_parse_from(["noizy_gan", "generator"]).unwrap();
        assert_eq!(cli.artifact_dir, "artifacts");
        assert_eq!(cli.seed, 42);
        let Command::Generator(args) = cli.command else {
            panic!("expected generator");
        };
        assert_eq!(args.epochs, 100);
        assert_eq!(args.steps, 64);
        assert_eq!(args.path, "G");
        assert_eq!(args.discriminator_path, "D");
        assert_eq!(args.discriminator_arch, JudgeArch::Deep);
        assert_eq!(args.discriminator_outputs, NUM_CLASSES);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "noizy_gan",
            "classifier59",
            "-e",
            "3",
            "--noise-x",
            "0.25",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(cli.seed, 7);
        let Command::Classifier59(args) = cli.command else {
            panic!("expected classifier59");
        };
        assert_eq!(args.epochs, 3);
        assert_eq!(args.noise_x, 0.25);
        assert_eq!(args.noise_y, 0.3);
        assert_eq!(args.path, "D59");
    }

    #[test]
    fn classifier59_weights_load_as_default_judge() {
        type TestBackend = burn::backend::NdArray<f32>;
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("D59");
        let device = <TestBackend as Backend>::Device::default();

        let cli = Cli::try_parse_from(["noizy_gan", "generator"]).unwrap();
        let Command::Generator(args) = cli.command else {
            panic!("expected generator");
        };
        assert_eq!(args.discriminator_arch, JudgeArch::Deep);

        let trained = deep_classifier::<TestBackend>(NUM_CLASSES, &device);
        checkpoint::save(&trained, &weights).unwrap();
        let judge = deep_classifier::<TestBackend>(args.discriminator_outputs, &device);
        assert!(checkpoint::load(judge, &weights, &device).is_ok());

        // the shallow D network is not interchangeable with it
        let shallow = ClassifierConfig::new().init::<TestBackend>(&device);
        checkpoint::save(&shallow, dir.path().join("D")).unwrap();
        let judge = deep_classifier::<TestBackend>(args.discriminator_outputs, &device);
        assert!(checkpoint::load(judge, dir.path().join("D"), &device).is_err());
    }

    #[test]
    fn autoencoder_size_reaches_model_and_folder() {
        let cli = Cli::try_parse_from(["noizy_gan", "autoencoder", "--size", "64"]).unwrap();
        let Command::Autoencoder(args) = cli.command else {
            panic!("expected autoencoder");
        };
        let config = autoencoder_config(&args);
        assert_eq!((config.height, config.width), (64, 64));
        assert!(config.validate().is_ok());

        let cli = Cli::try_parse_from(["noizy_gan", "autoencoder"]).unwrap();
        let Command::Autoencoder(args) = cli.command else {
            panic!("expected autoencoder");
        };
        assert_eq!(autoencoder_config(&args).width, AE_SIZE);
        assert!(!args.require_weights);
    }

    #[test]
    fn unknown_judge_is_rejected() {
        let parsed =
            Cli::try_parse_from(["noizy_gan", "generator", "--discriminator-arch", "resnet"]);
        assert!(parsed.is_err());
    }
}
