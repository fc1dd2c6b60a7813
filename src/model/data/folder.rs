use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::ImageReader;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::constants::AE_CHANNELS;

#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: Vec<f32>, // CHW, normalized to [-1, 1]
    pub height: usize,
    pub width: usize,
}

/// Every decodable picture of a directory, resized to `height x width` RGB.
pub struct ImageFolderDataset {
    pub image_paths: Vec<PathBuf>,
    height: usize,
    width: usize,
}

fn decode(path: &Path) -> Result<image::DynamicImage> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

impl ImageFolderDataset {
    /// Files that fail to decode are skipped with a warning, so a batch never
    /// runs into a missing item halfway through an epoch.
    pub fn new<P: AsRef<Path>>(path: P, height: usize, width: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut image_paths = Vec::new();

        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                    match ext.to_lowercase().as_str() {
                        "jpg" | "jpeg" | "png" | "bmp" | "tiff" => match decode(&path) {
                            Ok(_) => image_paths.push(path),
                            Err(err) => {
                                log::warn!("skipping unreadable image {}: {err}", path.display())
                            }
                        },
                        _ => {}
                    }
                }
            }
        }
        if image_paths.is_empty() {
            return Err(Error::NoImages(path.to_path_buf()));
        }
        image_paths.sort();
        log::info!(
            "found {} images in {}, resized to {height}x{width}",
            image_paths.len(),
            path.display()
        );
        Ok(Self {
            image_paths,
            height,
            width,
        })
    }

    /// `[height, width]` of every item.
    pub fn size(&self) -> [usize; 2] {
        [self.height, self.width]
    }
}

pub fn normalize_rgb(image: &image::RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0; plane * AE_CHANNELS];
    for (i, pixel) in image.pixels().enumerate() {
        for channel in 0..AE_CHANNELS {
            // Normalize to [-1, 1]
            data[channel * plane + i] = (pixel[channel] as f32 / 127.5) - 1.0;
        }
    }
    data
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn len(&self) -> usize {
        self.image_paths.len()
    }

    fn get(&self, index: usize) -> Option<ImageItem> {
        let path = self.image_paths.get(index)?;
        let image = match decode(path) {
            Ok(image) => image,
            Err(err) => {
                log::error!("failed to decode {}: {err}", path.display());
                return None;
            }
        };
        let image = image
            .resize_exact(self.width as u32, self.height as u32, FilterType::Triangle)
            .to_rgb8();

        Some(ImageItem {
            image: normalize_rgb(&image),
            height: self.height,
            width: self.width,
        })
    }
}

#[derive(Clone, Default)]
pub struct ImageBatcher {}

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>, // Shape: [batch_size, 3, height, width]
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let image_tensors: Vec<Tensor<B, 4>> = items
            .into_iter()
            .map(|item| {
                Tensor::<B, 3>::from_data(
                    TensorData::new(item.image, [AE_CHANNELS, item.height, item.width])
                        .convert::<B::FloatElem>(),
                    device,
                )
                .unsqueeze::<4>()
            })
            .collect();
        let images = Tensor::cat(image_tensors, 0);
        ImageBatch { images }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::data::dataloader::DataLoaderBuilder;

    type TestBackend = NdArray<f32>;

    fn write_png(dir: &Path, name: &str, size: u32) {
        let img = image::RgbImage::from_fn(size, size, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 255])
        });
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        let result = ImageFolderDataset::new(dir.path(), 16, 16);
        assert!(matches!(result, Err(Error::NoImages(_))));
    }

    #[test]
    fn items_are_resized_and_normalized() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 64);
        write_png(dir.path(), "b.png", 200);

        let dataset = ImageFolderDataset::new(dir.path(), 16, 24).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.size(), [16, 24]);

        let item = dataset.get(1).unwrap();
        assert_eq!(item.image.len(), AE_CHANNELS * 16 * 24);
        assert!(item.image.iter().all(|v| (-1.0..=1.0).contains(v)));
        // blue plane is saturated
        let blue = &item.image[2 * 16 * 24..];
        assert!(blue.iter().all(|&v| (v - 1.0).abs() < 1e-6));

        let device = <TestBackend as Backend>::Device::default();
        let batch: ImageBatch<TestBackend> =
            ImageBatcher::default().batch(vec![item.clone(), item], &device);
        assert_eq!(batch.images.dims(), [2, 3, 16, 24]);
    }

    #[test]
    fn corrupt_file_does_not_cut_the_epoch_short() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            write_png(dir.path(), &format!("{i}.png"), 8);
        }
        std::fs::write(dir.path().join("2.png"), b"\x89PNG\r\n\x1a\nbroken").unwrap();

        let dataset = ImageFolderDataset::new(dir.path(), 8, 8).unwrap();
        assert_eq!(dataset.len(), 5);
        assert!(!dataset.image_paths.iter().any(|p| p.ends_with("2.png")));

        let loader = DataLoaderBuilder::new(ImageBatcher::default())
            .batch_size(1)
            .build(dataset);
        let seen: usize = loader
            .iter()
            .map(|batch: ImageBatch<TestBackend>| batch.images.dims()[0])
            .sum();
        assert_eq!(seen, 5);
    }
}
