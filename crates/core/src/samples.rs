//! Paired observation matrices
//!
//! Everything downstream consumes paired observations `(X, Y)` of shape
//! `(samples, bands)`, plus optional per-sample weights. This module holds
//! the shape contract for those matrices and the bridge from two co-registered
//! band stacks to them.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};
use crate::raster::{Raster, RasterElement};

/// Observation weights for one batch.
///
/// `Uniform` stands for an implicit weight of 1 per row; it is resolved at
/// the call boundary instead of carrying an all-ones vector around.
#[derive(Debug, Clone, Copy)]
pub enum Weights<'a> {
    Uniform,
    PerSample(ArrayView1<'a, f64>),
}

impl<'a> Weights<'a> {
    /// Check the weights against a batch of `n` rows.
    ///
    /// Per-sample weights must have length `n` and be finite and non-negative.
    pub fn validate(&self, n: usize) -> Result<()> {
        let Weights::PerSample(w) = self else {
            return Ok(());
        };
        if w.len() != n {
            return Err(Error::ShapeMismatch {
                context: "weights",
                expected: (n, 1),
                actual: (w.len(), 1),
            });
        }
        if let Some(bad) = w.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(Error::InvalidParameter {
                name: "weights",
                value: bad.to_string(),
                reason: "weights must be finite and non-negative".into(),
            });
        }
        Ok(())
    }

    /// Sum of weights over `n` rows
    pub fn total(&self, n: usize) -> f64 {
        match self {
            Weights::Uniform => n as f64,
            Weights::PerSample(w) => w.sum(),
        }
    }
}

impl<'a> From<&'a Array1<f64>> for Weights<'a> {
    fn from(w: &'a Array1<f64>) -> Self {
        Weights::PerSample(w.view())
    }
}

/// Validate a paired batch against the expected band count.
///
/// Returns the number of rows. Mismatches are reported, never broadcast or
/// truncated.
pub fn check_pair(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, bands: usize) -> Result<usize> {
    let n = x.nrows();
    if x.ncols() != bands {
        return Err(Error::ShapeMismatch {
            context: "x batch",
            expected: (n, bands),
            actual: x.dim(),
        });
    }
    if y.dim() != (n, bands) {
        return Err(Error::ShapeMismatch {
            context: "y batch",
            expected: (n, bands),
            actual: y.dim(),
        });
    }
    if n == 0 {
        return Err(Error::InvalidParameter {
            name: "batch",
            value: "0 rows".into(),
            reason: "a batch needs at least one sample".into(),
        });
    }
    Ok(n)
}

/// Reject NaN or infinite samples before they reach any running sum.
pub fn check_finite(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<()> {
    for (name, batch) in [("x batch", x.view()), ("y batch", y.view())] {
        if let Some(((row, band), v)) = batch.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::InvalidParameter {
                name,
                value: v.to_string(),
                reason: format!("non-finite sample at row {}, band {}", row, band),
            });
        }
    }
    Ok(())
}

/// Split a paired batch into row batches of at most `size` samples.
pub fn paired_batches<'a>(
    x: ArrayView2<'a, f64>,
    y: ArrayView2<'a, f64>,
    size: usize,
) -> impl Iterator<Item = (ArrayView2<'a, f64>, ArrayView2<'a, f64>)> {
    let size = size.max(1);
    let n = x.nrows().min(y.nrows());
    (0..n).step_by(size).map(move |start| {
        let end = (start + size).min(n);
        (x.slice_move(s![start..end, ..]), y.slice_move(s![start..end, ..]))
    })
}

/// Pixels valid in every band of both images, laid out as sample matrices.
///
/// Row `i` of `x` and `y` comes from grid cell `indices()[i]` (row-major).
#[derive(Debug, Clone)]
pub struct PairedSamples {
    x: Array2<f64>,
    y: Array2<f64>,
    index: Vec<usize>,
    rows: usize,
    cols: usize,
}

impl PairedSamples {
    /// Build from two band stacks of the same scene (`before[i]` pairs with `after[i]`).
    ///
    /// A pixel is kept only when every band of both stacks holds valid data.
    pub fn from_bands<T: RasterElement>(before: &[&Raster<T>], after: &[&Raster<T>]) -> Result<Self> {
        if before.is_empty() {
            return Err(Error::Algorithm("IR-MAD requires at least 1 band".into()));
        }
        if before.len() != after.len() {
            return Err(Error::ShapeMismatch {
                context: "band count",
                expected: (before.len(), 1),
                actual: (after.len(), 1),
            });
        }

        let bands = before.len();
        let (rows, cols) = before[0].shape();
        for band in before.iter().chain(after.iter()) {
            if band.shape() != (rows, cols) {
                return Err(Error::ShapeMismatch {
                    context: "band grid",
                    expected: (rows, cols),
                    actual: band.shape(),
                });
            }
        }

        let mut index = Vec::new();
        let mut x_vals = Vec::new();
        let mut y_vals = Vec::new();
        let mut x_pixel = Vec::with_capacity(bands);
        let mut y_pixel = Vec::with_capacity(bands);

        for r in 0..rows {
            for c in 0..cols {
                x_pixel.clear();
                y_pixel.clear();
                for (b, a) in before.iter().zip(after.iter()) {
                    let bv = unsafe { b.get_unchecked(r, c) };
                    let av = unsafe { a.get_unchecked(r, c) };
                    if b.is_nodata(bv) || a.is_nodata(av) {
                        break;
                    }
                    match (bv.to_f64(), av.to_f64()) {
                        (Some(bv), Some(av)) => {
                            x_pixel.push(bv);
                            y_pixel.push(av);
                        }
                        _ => break,
                    }
                }
                if x_pixel.len() == bands {
                    index.push(r * cols + c);
                    x_vals.extend_from_slice(&x_pixel);
                    y_vals.extend_from_slice(&y_pixel);
                }
            }
        }

        if index.is_empty() {
            return Err(Error::Algorithm(
                "No pixel is valid in every band of both images".into(),
            ));
        }

        let n = index.len();
        Ok(Self {
            x: Array2::from_shape_vec((n, bands), x_vals)?,
            y: Array2::from_shape_vec((n, bands), y_vals)?,
            index,
            rows,
            cols,
        })
    }

    /// Number of paired samples
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no sample was extracted
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of bands per sample
    pub fn bands(&self) -> usize {
        self.x.ncols()
    }

    /// Row-major grid index of every sample
    pub fn indices(&self) -> &[usize] {
        &self.index
    }

    /// Samples from the first image
    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    /// Samples from the second image
    pub fn y(&self) -> ArrayView2<'_, f64> {
        self.y.view()
    }

    /// Write one value per sample back onto the source grid.
    ///
    /// Cells without a sample become NaN, which is also the no-data value.
    pub fn scatter(&self, values: ArrayView1<'_, f64>) -> Result<Raster<f64>> {
        if values.len() != self.len() {
            return Err(Error::ShapeMismatch {
                context: "scattered values",
                expected: (self.len(), 1),
                actual: (values.len(), 1),
            });
        }
        let mut data = vec![f64::NAN; self.rows * self.cols];
        for (&cell, &v) in self.index.iter().zip(values.iter()) {
            data[cell] = v;
        }
        let mut raster = Raster::from_vec(data, self.rows, self.cols)?;
        raster.set_nodata(Some(f64::NAN));
        Ok(raster)
    }
}
