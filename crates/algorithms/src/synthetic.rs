//! Seeded synthetic image pairs
//!
//! The second image is a linear radiometric distortion of the first,
//! `Y = X·R·diag(gain) + offset + noise`, with a random fraction of pixels
//! replaced by genuine change. Every generator is deterministic in its seed.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rrn_core::{Raster, Result};

use crate::linalg::from_dmatrix;

/// Parameters for [`generate_scene`]
#[derive(Debug, Clone)]
pub struct SceneParams {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    /// Standard deviation of the additive sensor noise
    pub noise_std: f64,
    /// Fraction of pixels with injected change
    pub change_fraction: f64,
    /// Minimum per-band shift of a changed pixel
    pub change_magnitude: f64,
    /// Mix bands through a random rotation before the per-band gain
    pub rotate: bool,
    pub seed: u64,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            rows: 64,
            cols: 64,
            bands: 4,
            noise_std: 0.05,
            change_fraction: 0.1,
            change_magnitude: 3.0,
            rotate: false,
            seed: 42,
        }
    }
}

/// A generated image pair with its ground truth
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub rows: usize,
    pub cols: usize,
    /// First image, one row per pixel (row-major)
    pub x: Array2<f64>,
    /// Second image
    pub y: Array2<f64>,
    /// Whether each pixel carries injected change
    pub changed: Vec<bool>,
    /// Per-band gain applied to the second image
    pub gains: Array1<f64>,
    /// Per-band offset applied to the second image
    pub offsets: Array1<f64>,
}

impl SyntheticScene {
    /// First image as one raster per band
    pub fn before_bands(&self) -> Result<Vec<Raster<f64>>> {
        to_bands(&self.x, self.rows, self.cols)
    }

    /// Second image as one raster per band
    pub fn after_bands(&self) -> Result<Vec<Raster<f64>>> {
        to_bands(&self.y, self.rows, self.cols)
    }

    pub fn changed_count(&self) -> usize {
        self.changed.iter().filter(|&&c| c).count()
    }
}

fn to_bands(samples: &Array2<f64>, rows: usize, cols: usize) -> Result<Vec<Raster<f64>>> {
    samples
        .columns()
        .into_iter()
        .map(|band| Raster::from_vec(band.to_vec(), rows, cols))
        .collect()
}

/// `rows × cols` matrix of independent standard normal draws
pub fn standard_normal<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn((rows, cols), || rng.sample(StandardNormal))
}

/// Haar-distributed random orthogonal matrix.
///
/// QR of a Gaussian matrix, with the signs of `R`'s diagonal folded into `Q`
/// so the result does not depend on the QR convention.
pub fn random_rotation<R: Rng>(bands: usize, rng: &mut R) -> Array2<f64> {
    let gaussian = DMatrix::from_fn(bands, bands, |_, _| rng.sample::<f64, _>(StandardNormal));
    let qr = gaussian.qr();
    let mut q = qr.q();
    let r = qr.r();
    for j in 0..bands {
        if r[(j, j)] < 0.0 {
            q.column_mut(j).neg_mut();
        }
    }
    from_dmatrix(&q)
}

/// `X ~ N(0, I)` and `Y = X + noise_std · N(0, I)`
pub fn correlated_pair(samples: usize, bands: usize, noise_std: f64, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = standard_normal(samples, bands, &mut rng);
    let y = &x + &(standard_normal(samples, bands, &mut rng) * noise_std);
    (x, y)
}

/// Generate an image pair with a radiometric distortion and injected change.
pub fn generate_scene(params: &SceneParams) -> SyntheticScene {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let n = params.rows * params.cols;
    let bands = params.bands;

    let x = standard_normal(n, bands, &mut rng);
    let gains = Array1::from_shape_fn(bands, |_| rng.gen_range(0.7..1.3));
    let offsets = Array1::from_shape_fn(bands, |_| rng.gen_range(-1.0..1.0));

    let mixed = if params.rotate {
        x.dot(&random_rotation(bands, &mut rng))
    } else {
        x.clone()
    };
    let mut y = mixed * &gains + &offsets + standard_normal(n, bands, &mut rng) * params.noise_std;

    let changed: Vec<bool> = (0..n).map(|_| rng.gen::<f64>() < params.change_fraction).collect();
    for (mut row, _) in y.rows_mut().into_iter().zip(&changed).filter(|(_, c)| **c) {
        for v in row.iter_mut() {
            let sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
            let z: f64 = rng.sample(StandardNormal);
            *v += sign * params.change_magnitude * (1.0 + z.abs());
        }
    }

    SyntheticScene {
        rows: params.rows,
        cols: params.cols,
        x,
        y,
        changed,
        gains,
        offsets,
    }
}
