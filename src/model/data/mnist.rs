use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::vision::{MnistDataset, MnistItem};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::Result;
use crate::model::constants::{CHANNELS, HEIGHT, NUM_CLASSES, PIXELS, WIDTH};
use crate::model::data::noise::NoiseConfig;

/// One MNIST digit with pixels scaled to [0, 1].
#[derive(Debug, Clone)]
pub struct RawDigit {
    pub pixels: Vec<f32>,
    pub label: u8,
}

impl From<MnistItem> for RawDigit {
    fn from(item: MnistItem) -> Self {
        let pixels = item.image.iter().flatten().copied().collect::<Vec<_>>();
        Self {
            pixels: transform(&pixels),
            label: item.label,
        }
    }
}

pub fn transform(raw: &[f32]) -> Vec<f32> {
    raw.iter().map(|&p| p / 255.0).collect()
}

pub fn transform_inv(pixels: &[f32]) -> Vec<f32> {
    pixels.iter().map(|&p| p * 255.0).collect()
}

pub fn one_hot(label: u8, width: usize) -> Vec<f32> {
    let mut target = vec![0.0; width];
    if (label as usize) < width {
        target[label as usize] = 1.0;
    }
    target
}

/// How targets are built for the clean and the noisy half of the training set.
#[derive(Config, Debug, PartialEq)]
pub enum LabelScheme {
    /// One-hot targets. Noisy copies carry `one_hot * scale`.
    Scaled(f32),
    /// One-hot plus an extra noise column, set to the given value on noisy copies.
    Flagged(f32),
}

impl LabelScheme {
    pub fn target_width(&self) -> usize {
        match self {
            LabelScheme::Scaled(_) => NUM_CLASSES,
            LabelScheme::Flagged(_) => NUM_CLASSES + 1,
        }
    }

    pub fn clean_target(&self, label: u8) -> Vec<f32> {
        one_hot(label, self.target_width())
    }

    pub fn noisy_target(&self, label: u8) -> Vec<f32> {
        let mut target = self.clean_target(label);
        match self {
            LabelScheme::Scaled(scale) => target.iter_mut().for_each(|t| *t *= *scale),
            LabelScheme::Flagged(flag) => target[NUM_CLASSES] = *flag,
        }
        target
    }
}

#[derive(Config, Debug)]
pub struct NoisyMnistConfig {
    pub noise: NoiseConfig,
    pub labels: LabelScheme,
    /// Keep only digits with `label >= min_digit`.
    #[config(default = "None")]
    pub min_digit: Option<u8>,
    /// Without noisy copies the training split is plain MNIST.
    #[config(default = true)]
    pub noisy_copies: bool,
    #[config(default = 42)]
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct DigitItem {
    pub image: Vec<f32>,
    pub target: Vec<f32>,
    pub label: u8,
}

/// MNIST with a noise-augmented copy of every training digit appended after
/// the clean ones. The test split stays clean.
pub struct NoisyMnist {
    train: Vec<DigitItem>,
    test: Vec<DigitItem>,
}

impl NoisyMnist {
    /// Reads MNIST through burn's downloader and cache.
    pub fn load(config: &NoisyMnistConfig) -> Result<Self> {
        let train = load_split(MnistDataset::train());
        let test = load_split(MnistDataset::test());
        log::info!(
            "loaded mnist: {} train / {} test digits",
            train.len(),
            test.len()
        );
        Self::from_digits(train, test, config)
    }

    pub fn from_digits(
        train: Vec<RawDigit>,
        test: Vec<RawDigit>,
        config: &NoisyMnistConfig,
    ) -> Result<Self> {
        let keep = |digit: &RawDigit| config.min_digit.is_none_or(|min| digit.label >= min);
        let train: Vec<RawDigit> = train.into_iter().filter(keep).collect();
        let test: Vec<RawDigit> = test.into_iter().filter(keep).collect();

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut items = Vec::with_capacity(train.len() * 2);
        let mut noisy = Vec::with_capacity(train.len());

        for digit in train {
            if config.noisy_copies {
                let mut pixels = digit.pixels.clone();
                config.noise.apply(&mut pixels, &mut rng)?;
                noisy.push(DigitItem {
                    image: pixels,
                    target: config.labels.noisy_target(digit.label),
                    label: digit.label,
                });
            }
            items.push(DigitItem {
                target: config.labels.clean_target(digit.label),
                image: digit.pixels,
                label: digit.label,
            });
        }
        items.extend(noisy);

        let test = test
            .into_iter()
            .map(|digit| DigitItem {
                target: config.labels.clean_target(digit.label),
                image: digit.pixels,
                label: digit.label,
            })
            .collect();

        Ok(Self { train: items, test })
    }

    pub fn train(&self) -> InMemDataset<DigitItem> {
        InMemDataset::new(self.train.clone())
    }

    pub fn test(&self) -> InMemDataset<DigitItem> {
        InMemDataset::new(self.test.clone())
    }
}

pub fn load_split(dataset: MnistDataset) -> Vec<RawDigit> {
    dataset.iter().map(RawDigit::from).collect()
}

#[derive(Clone, Default)]
pub struct DigitBatcher {}

#[derive(Clone, Debug)]
pub struct DigitBatch<B: Backend> {
    pub images: Tensor<B, 4>, // [batch_size, 1, 28, 28]
    pub targets: Tensor<B, 2>,
    pub labels: Tensor<B, 1, Int>,
}

pub fn images_to_tensor<B: Backend>(
    images: Vec<Vec<f32>>,
    device: &B::Device,
) -> Tensor<B, 4> {
    let batch_size = images.len();
    let flat: Vec<f32> = images.into_iter().flatten().collect();
    Tensor::<B, 4>::from_data(
        TensorData::new(flat, [batch_size, CHANNELS, HEIGHT, WIDTH]).convert::<B::FloatElem>(),
        device,
    )
}

pub fn labels_to_tensor<B: Backend>(labels: &[u8], device: &B::Device) -> Tensor<B, 1, Int> {
    let labels: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    let len = labels.len();
    Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [len]).convert::<B::IntElem>(), device)
}

pub fn targets_to_tensor<B: Backend>(targets: Vec<Vec<f32>>, device: &B::Device) -> Tensor<B, 2> {
    let batch_size = targets.len();
    let width = targets.first().map_or(0, Vec::len);
    let flat: Vec<f32> = targets.into_iter().flatten().collect();
    Tensor::<B, 2>::from_data(
        TensorData::new(flat, [batch_size, width]).convert::<B::FloatElem>(),
        device,
    )
}

impl<B: Backend> Batcher<B, DigitItem, DigitBatch<B>> for DigitBatcher {
    fn batch(&self, items: Vec<DigitItem>, device: &B::Device) -> DigitBatch<B> {
        let labels: Vec<u8> = items.iter().map(|item| item.label).collect();
        let (images, targets): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| {
                debug_assert_eq!(item.image.len(), PIXELS);
                (item.image, item.target)
            })
            .unzip();

        DigitBatch {
            images: images_to_tensor(images, device),
            targets: targets_to_tensor(targets, device),
            labels: labels_to_tensor(&labels, device),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    pub(crate) fn synthetic_digits(count: usize) -> Vec<RawDigit> {
        (0..count)
            .map(|i| RawDigit {
                pixels: (0..PIXELS)
                    .map(|p| ((p + i) % 17) as f32 / 16.0)
                    .collect(),
                label: (i % NUM_CLASSES) as u8,
            })
            .collect()
    }

    fn config(labels: LabelScheme) -> NoisyMnistConfig {
        NoisyMnistConfig::new(NoiseConfig::new(), labels)
    }

    #[test]
    fn train_split_is_clean_then_noisy() {
        let data =
            NoisyMnist::from_digits(synthetic_digits(20), synthetic_digits(5), &config(LabelScheme::Scaled(0.5)))
                .unwrap();
        let train = data.train();
        assert_eq!(train.len(), 40);
        assert_eq!(data.test().len(), 5);

        let clean = train.get(3).unwrap();
        let noisy = train.get(23).unwrap();
        assert_eq!(clean.label, noisy.label);
        assert_eq!(clean.target[3], 1.0);
        assert_eq!(noisy.target[3], 0.5);
        assert!(noisy.image.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_ne!(clean.image, noisy.image);
    }

    #[test]
    fn flagged_targets_mark_noisy_copies() {
        let data = NoisyMnist::from_digits(
            synthetic_digits(4),
            synthetic_digits(2),
            &NoisyMnistConfig::new(NoiseConfig::patch(), LabelScheme::Flagged(1.0)),
        )
        .unwrap();
        let train = data.train();

        let clean = train.get(1).unwrap();
        let noisy = train.get(5).unwrap();
        assert_eq!(clean.target.len(), 11);
        assert_eq!(clean.target[10], 0.0);
        assert_eq!(noisy.target[10], 1.0);
        assert_eq!(noisy.target[1], 1.0);
        assert_eq!(data.test().get(0).unwrap().target[10], 0.0);
    }

    #[test]
    fn min_digit_filters_both_splits() {
        let data = NoisyMnist::from_digits(
            synthetic_digits(30),
            synthetic_digits(10),
            &config(LabelScheme::Scaled(0.3)).with_min_digit(Some(5)),
        )
        .unwrap();

        assert_eq!(data.train().len(), 30);
        assert_eq!(data.test().len(), 5);
        assert!(data.train().iter().all(|item| item.label >= 5));
    }

    #[test]
    fn clean_only_training_split() {
        let data = NoisyMnist::from_digits(
            synthetic_digits(7),
            synthetic_digits(2),
            &config(LabelScheme::Scaled(1.0)).with_noisy_copies(false),
        )
        .unwrap();
        assert_eq!(data.train().len(), 7);
        let digits = synthetic_digits(7);
        assert!(data.train().iter().zip(digits).all(|(item, raw)| item.image == raw.pixels));
    }

    #[test]
    fn transform_round_trips_pixel_range() {
        let raw = [0.0, 127.5, 255.0];
        assert_eq!(transform(&raw), vec![0.0, 0.5, 1.0]);
        assert_eq!(transform_inv(&transform(&raw)), raw.to_vec());
    }

    #[test]
    fn batcher_shapes() {
        let data =
            NoisyMnist::from_digits(synthetic_digits(6), vec![], &config(LabelScheme::Flagged(1.0)))
                .unwrap();
        let items: Vec<DigitItem> = data.train().iter().take(4).collect();
        let device = <TestBackend as Backend>::Device::default();
        let batch: DigitBatch<TestBackend> = DigitBatcher::default().batch(items, &device);

        assert_eq!(batch.images.dims(), [4, 1, 28, 28]);
        assert_eq!(batch.targets.dims(), [4, 11]);
        assert_eq!(batch.labels.dims(), [4]);
    }
}
