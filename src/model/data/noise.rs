use burn::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};
use crate::model::constants::{HEIGHT, WIDTH};

#[derive(Config, Debug)]
pub struct NoiseConfig {
    #[config(default = 1.0)]
    pub sigma: f64,
    #[config(default = 0.5)]
    pub scaler: f64,
    /// Patch size `[rows, cols]`. Without one the whole image is perturbed.
    #[config(default = "None")]
    pub area: Option<[usize; 2]>,
}

impl NoiseConfig {
    pub fn patch() -> Self {
        Self::new().with_area(Some([7, 7]))
    }

    pub fn apply<R: Rng>(&self, pixels: &mut [f32], rng: &mut R) -> Result<()> {
        match self.area {
            Some(area) => add_patch_noise(pixels, area, self.sigma, self.scaler, rng),
            None => add_global_noise(pixels, self.sigma, self.scaler, rng),
        }
    }
}

fn normal(sigma: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, sigma).map_err(|e| Error::InvalidNoise(e.to_string()))
}

/// Perturbs every pixel with `scaler * N(0, sigma)` and clips to [0, 1].
pub fn add_global_noise<R: Rng>(
    pixels: &mut [f32],
    sigma: f64,
    scaler: f64,
    rng: &mut R,
) -> Result<()> {
    let dist = normal(sigma)?;
    for pixel in pixels.iter_mut() {
        let noise = dist.sample(rng) * scaler;
        *pixel = (*pixel + noise as f32).clamp(0.0, 1.0);
    }
    Ok(())
}

/// Adds a `rows x cols` block of `scaler * N(0, sigma)` at a random offset of a
/// 28x28 image and clips the result to [0, 1].
///
/// Offsets are drawn from `[0, 28 - 1 - rows)` and `[0, 28 - 1 - cols)`, so the
/// patch never touches the last row or column.
pub fn add_patch_noise<R: Rng>(
    pixels: &mut [f32],
    area: [usize; 2],
    sigma: f64,
    scaler: f64,
    rng: &mut R,
) -> Result<()> {
    let [rows, cols] = area;
    if rows + 1 >= HEIGHT || cols + 1 >= WIDTH {
        return Err(Error::InvalidNoise(format!(
            "patch {rows}x{cols} does not fit a {HEIGHT}x{WIDTH} image"
        )));
    }
    if pixels.len() != HEIGHT * WIDTH {
        return Err(Error::InvalidNoise(format!(
            "expected {} pixels, got {}",
            HEIGHT * WIDTH,
            pixels.len()
        )));
    }
    // an empty patch leaves the image as is
    if rows == 0 || cols == 0 {
        return Ok(());
    }

    let dist = normal(sigma)?;
    let dx = rng.gen_range(0..HEIGHT - 1 - rows);
    let dy = rng.gen_range(0..WIDTH - 1 - cols);

    for row in dx..dx + rows {
        for col in dy..dy + cols {
            let noise = dist.sample(rng) * scaler;
            let pixel = &mut pixels[row * WIDTH + col];
            *pixel = (*pixel + noise as f32).clamp(0.0, 1.0);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn global_noise_stays_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pixels = vec![0.5; HEIGHT * WIDTH];
        add_global_noise(&mut pixels, 1.0, 2.0, &mut rng).unwrap();

        assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(pixels.iter().any(|&p| p != 0.5));
    }

    #[test]
    fn patch_noise_only_touches_the_patch() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pixels = vec![0.5; HEIGHT * WIDTH];
        add_patch_noise(&mut pixels, [7, 7], 1.0, 0.5, &mut rng).unwrap();

        let changed: Vec<usize> = (0..pixels.len()).filter(|&i| pixels[i] != 0.5).collect();
        assert!(!changed.is_empty());
        assert!(changed.len() <= 49);

        let rows: Vec<usize> = changed.iter().map(|i| i / WIDTH).collect();
        let cols: Vec<usize> = changed.iter().map(|i| i % WIDTH).collect();
        let row_span = rows.iter().max().unwrap() - rows.iter().min().unwrap();
        let col_span = cols.iter().max().unwrap() - cols.iter().min().unwrap();
        assert!(row_span < 7 && col_span < 7);
        // last row and column are never reached
        assert!(rows.iter().all(|&r| r < HEIGHT - 1));
        assert!(cols.iter().all(|&c| c < WIDTH - 1));
        assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn oversized_patch_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pixels = vec![0.0; HEIGHT * WIDTH];
        let result = add_patch_noise(&mut pixels, [27, 3], 1.0, 0.5, &mut rng);
        assert!(matches!(result, Err(Error::InvalidNoise(_))));
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pixels = vec![0.5; HEIGHT * WIDTH];
        add_patch_noise(&mut pixels, [0, 7], 1.0, 0.5, &mut rng).unwrap();
        add_patch_noise(&mut pixels, [0, 0], 1.0, 0.5, &mut rng).unwrap();
        assert!(pixels.iter().all(|&p| p == 0.5));
    }

    #[test]
    fn config_dispatches_on_area() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut pixels = vec![0.5; HEIGHT * WIDTH];
        NoiseConfig::patch().apply(&mut pixels, &mut rng).unwrap();
        let changed = pixels.iter().filter(|&&p| p != 0.5).count();
        assert!(changed <= 49);
    }
}
