use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::model::data::mnist::{RawDigit, images_to_tensor, targets_to_tensor};
use crate::model::data::noise::NoiseConfig;

pub const REAL_VALUE: f32 = 1.0;
pub const FAKE_VALUE: f32 = 0.0;

#[derive(Clone, Debug)]
pub struct DetectorBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 2>, // [batch_size, 1]
}

/// Endless stream of batches for the noise detector: the leading `n_noisy`
/// digits of every batch are perturbed and labelled fake, the rest are real.
pub struct NoiseDetectorSampler {
    digits: Vec<RawDigit>,
    noise: NoiseConfig,
    n_noisy: usize,
    n_real: usize,
    rng: StdRng,
}

impl NoiseDetectorSampler {
    pub fn new(
        digits: Vec<RawDigit>,
        batch_size: usize,
        noisy_ratio: f64,
        noise: NoiseConfig,
        seed: u64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&noisy_ratio) {
            return Err(Error::InvalidNoise(format!(
                "noisy batch ratio {noisy_ratio} is outside [0, 1]"
            )));
        }
        if digits.is_empty() {
            return Err(Error::InvalidNoise("no digits to sample from".to_string()));
        }
        let n_noisy = (batch_size as f64 * noisy_ratio).round() as usize;
        Ok(Self {
            digits,
            noise,
            n_noisy,
            n_real: batch_size - n_noisy,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.n_noisy + self.n_real
    }

    pub fn n_noisy(&self) -> usize {
        self.n_noisy
    }

    pub fn next_batch<B: Backend>(&mut self, device: &B::Device) -> Result<DetectorBatch<B>> {
        let batch_size = self.batch_size();
        let mut images = Vec::with_capacity(batch_size);
        let mut targets = Vec::with_capacity(batch_size);

        for position in 0..batch_size {
            let index = self.rng.gen_range(0..self.digits.len());
            let mut pixels = self.digits[index].pixels.clone();
            if position < self.n_noisy {
                self.noise.apply(&mut pixels, &mut self.rng)?;
                targets.push(vec![FAKE_VALUE]);
            } else {
                targets.push(vec![REAL_VALUE]);
            }
            images.push(pixels);
        }

        Ok(DetectorBatch {
            images: images_to_tensor(images, device),
            targets: targets_to_tensor(targets, device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::data::mnist::tests::synthetic_digits;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn splits_batch_by_ratio() {
        let sampler =
            NoiseDetectorSampler::new(synthetic_digits(8), 128, 0.5, NoiseConfig::patch(), 1)
                .unwrap();
        assert_eq!(sampler.n_noisy(), 64);
        assert_eq!(sampler.batch_size(), 128);
    }

    #[test]
    fn leading_samples_are_fake() {
        let device = <TestBackend as Backend>::Device::default();
        let mut sampler =
            NoiseDetectorSampler::new(synthetic_digits(8), 10, 0.3, NoiseConfig::patch(), 1)
                .unwrap();
        let batch: DetectorBatch<TestBackend> = sampler.next_batch(&device).unwrap();

        assert_eq!(batch.images.dims(), [10, 1, 28, 28]);
        assert_eq!(batch.targets.dims(), [10, 1]);
        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&targets[..3], &[FAKE_VALUE; 3]);
        assert!(targets[3..].iter().all(|&t| t == REAL_VALUE));
    }

    #[test]
    fn rejects_bad_ratio() {
        let result =
            NoiseDetectorSampler::new(synthetic_digits(2), 4, 1.5, NoiseConfig::patch(), 1);
        assert!(result.is_err());
    }
}
