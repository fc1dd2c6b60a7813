use burn::prelude::*;
use burn::tensor::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::constants::NUM_CLASSES;
use crate::model::data::mnist::{labels_to_tensor, one_hot, targets_to_tensor};

/// Generator input: a one-hot class and a gaussian noise vector.
#[derive(Clone, Debug)]
pub struct LatentBatch<B: Backend> {
    pub classes: Tensor<B, 2>,
    pub noise: Tensor<B, 2>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> LatentBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    /// What the frozen classifier should answer for these inputs. Widths past
    /// the ten classes are zero, i.e. "not noisy".
    pub fn target(&self, width: usize) -> Tensor<B, 2> {
        let classes = self.classes.clone().detach();
        if width <= NUM_CLASSES {
            return classes.narrow(1, 0, width);
        }
        let padding = Tensor::zeros([self.len(), width - NUM_CLASSES], &classes.device());
        Tensor::cat(vec![classes, padding], 1)
    }
}

pub struct LatentSampler {
    noise_dim: usize,
    rng: StdRng,
}

impl LatentSampler {
    pub fn new(noise_dim: usize, seed: u64) -> Self {
        Self {
            noise_dim,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample<B: Backend>(&mut self, batch_size: usize, device: &B::Device) -> LatentBatch<B> {
        let labels: Vec<u8> = (0..batch_size)
            .map(|_| self.rng.gen_range(0..NUM_CLASSES) as u8)
            .collect();
        self.build(labels, device)
    }

    /// Classes `0..9` repeated `rows` times, for sample grids.
    pub fn for_each_class<B: Backend>(&self, rows: usize, device: &B::Device) -> LatentBatch<B> {
        let labels = (0..rows)
            .flat_map(|_| 0..NUM_CLASSES as u8)
            .collect();
        self.build(labels, device)
    }

    fn build<B: Backend>(&self, labels: Vec<u8>, device: &B::Device) -> LatentBatch<B> {
        let batch_size = labels.len();
        let classes = labels
            .iter()
            .map(|&label| one_hot(label, NUM_CLASSES))
            .collect();
        LatentBatch {
            labels: labels_to_tensor(&labels, device),
            classes: targets_to_tensor(classes, device),
            noise: Tensor::<B, 2>::random(
                [batch_size, self.noise_dim],
                Distribution::Normal(0.0, 1.0),
                device,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn sample_shapes() {
        let device = <TestBackend as Backend>::Device::default();
        let mut sampler = LatentSampler::new(10, 5);
        let batch: LatentBatch<TestBackend> = sampler.sample(6, &device);

        assert_eq!(batch.classes.dims(), [6, 10]);
        assert_eq!(batch.noise.dims(), [6, 10]);
        let sums = batch.classes.clone().sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn target_appends_clean_flag() {
        let device = <TestBackend as Backend>::Device::default();
        let sampler = LatentSampler::new(4, 0);
        let batch: LatentBatch<TestBackend> = sampler.for_each_class(2, &device);
        assert_eq!(batch.len(), 20);
        let labels = batch.labels.clone().into_data().to_vec::<i64>().unwrap();
        assert_eq!(labels[13], 3);

        let target = batch.target(11);
        assert_eq!(target.dims(), [20, 11]);
        let values = target.into_data().to_vec::<f32>().unwrap();
        let row = &values[13 * 11..14 * 11];
        assert_eq!(row[3], 1.0);
        assert_eq!(row[10], 0.0);
        assert_eq!(row.iter().sum::<f32>(), 1.0);
    }
}
