//! Weighted sufficient statistics for paired observations
//!
//! The accumulator keeps raw weighted sums instead of running means, which
//! makes `push` and `pull` exact linear updates: batches may arrive in any
//! order, be removed again (sliding windows), or be merged from several
//! accumulators without ever materializing the full data matrix.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rrn_core::samples::{check_finite, check_pair, Weights};
use rrn_core::{Error, Result};

/// Which covariance matrix to derive from the sums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovariancePair {
    /// `cov(X, X)`
    XX,
    /// `cov(Y, Y)`
    YY,
    /// `cov(X, Y)`
    XY,
}

/// Running weighted sums over a stream of `(X, Y)` batches.
#[derive(Debug, Clone)]
pub struct CovarianceAccumulator {
    bands: usize,
    w_sum: f64,
    x_wsum: Array1<f64>,
    y_wsum: Array1<f64>,
    xx_wsum: Array2<f64>,
    yy_wsum: Array2<f64>,
    xy_wsum: Array2<f64>,
}

impl CovarianceAccumulator {
    /// Empty accumulator for observations with `bands` columns
    pub fn new(bands: usize) -> Self {
        Self {
            bands,
            w_sum: 0.0,
            x_wsum: Array1::zeros(bands),
            y_wsum: Array1::zeros(bands),
            xx_wsum: Array2::zeros((bands, bands)),
            yy_wsum: Array2::zeros((bands, bands)),
            xy_wsum: Array2::zeros((bands, bands)),
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Total weight of pushed-not-yet-pulled samples
    pub fn weight_sum(&self) -> f64 {
        self.w_sum
    }

    pub fn x_wsum(&self) -> &Array1<f64> {
        &self.x_wsum
    }

    pub fn y_wsum(&self) -> &Array1<f64> {
        &self.y_wsum
    }

    pub fn xx_wsum(&self) -> &Array2<f64> {
        &self.xx_wsum
    }

    pub fn yy_wsum(&self) -> &Array2<f64> {
        &self.yy_wsum
    }

    pub fn xy_wsum(&self) -> &Array2<f64> {
        &self.xy_wsum
    }

    /// Add a batch. `x` and `y` are `n × bands`; nothing is retained.
    ///
    /// The batch is validated before any sum changes, so a rejected batch
    /// leaves the accumulator untouched.
    pub fn push(&mut self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, w: Weights<'_>) -> Result<()> {
        self.update(x, y, w, 1.0)
    }

    /// Remove a previously pushed batch.
    pub fn pull(&mut self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, w: Weights<'_>) -> Result<()> {
        self.update(x, y, w, -1.0)
    }

    fn update(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        w: Weights<'_>,
        sign: f64,
    ) -> Result<()> {
        let n = check_pair(x, y, self.bands)?;
        check_finite(x, y)?;
        w.validate(n)?;

        match w {
            Weights::Uniform => self.accumulate(x, y, x, y, n as f64, sign),
            Weights::PerSample(w) => {
                let column = w.insert_axis(Axis(1));
                let xw = &x * &column;
                let yw = &y * &column;
                self.accumulate(xw.view(), yw.view(), x, y, w.sum(), sign);
            }
        }
        Ok(())
    }

    fn accumulate(
        &mut self,
        xw: ArrayView2<'_, f64>,
        yw: ArrayView2<'_, f64>,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        weight: f64,
        sign: f64,
    ) {
        self.x_wsum.scaled_add(sign, &xw.sum_axis(Axis(0)));
        self.y_wsum.scaled_add(sign, &yw.sum_axis(Axis(0)));
        self.xx_wsum.scaled_add(sign, &xw.t().dot(&x));
        self.yy_wsum.scaled_add(sign, &yw.t().dot(&y));
        self.xy_wsum.scaled_add(sign, &xw.t().dot(&y));
        self.w_sum += sign * weight;
    }

    /// Fold another accumulator's sums into this one
    pub fn merge(&mut self, other: &CovarianceAccumulator) -> Result<()> {
        if other.bands != self.bands {
            return Err(Error::ShapeMismatch {
                context: "merged accumulator",
                expected: (self.bands, self.bands),
                actual: (other.bands, other.bands),
            });
        }
        self.w_sum += other.w_sum;
        self.x_wsum += &other.x_wsum;
        self.y_wsum += &other.y_wsum;
        self.xx_wsum += &other.xx_wsum;
        self.yy_wsum += &other.yy_wsum;
        self.xy_wsum += &other.xy_wsum;
        Ok(())
    }

    /// Unbiased weighted covariance.
    ///
    /// `cov(U, V) = (Σ w·u·vᵗ − (Σ w·u)(Σ w·v)ᵗ / W) / (W − 1)`, defined only
    /// when the total weight `W` exceeds 1.
    pub fn covariance(&self, which: CovariancePair) -> Result<Array2<f64>> {
        if self.w_sum.is_nan() || self.w_sum <= 1.0 {
            return Err(Error::InsufficientData {
                weight_sum: self.w_sum,
            });
        }

        let (uv, u, v) = match which {
            CovariancePair::XX => (&self.xx_wsum, &self.x_wsum, &self.x_wsum),
            CovariancePair::YY => (&self.yy_wsum, &self.y_wsum, &self.y_wsum),
            CovariancePair::XY => (&self.xy_wsum, &self.x_wsum, &self.y_wsum),
        };

        let outer = u
            .view()
            .insert_axis(Axis(1))
            .dot(&v.view().insert_axis(Axis(0)));
        let cov = (uv - &(outer / self.w_sum)) / (self.w_sum - 1.0);

        // Auto-covariances are symmetric up to summation order; make it exact.
        Ok(match which {
            CovariancePair::XY => cov,
            _ => crate::linalg::symmetrize(&cov),
        })
    }

    /// Discard all accumulated history; the band count is kept
    pub fn reset(&mut self) {
        self.w_sum = 0.0;
        self.x_wsum.fill(0.0);
        self.y_wsum.fill(0.0);
        self.xx_wsum.fill(0.0);
        self.yy_wsum.fill(0.0);
        self.xy_wsum.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, concatenate};

    fn batch_a() -> (Array2<f64>, Array2<f64>) {
        let x = array![[1.0, 2.0, 0.5], [2.0, 1.0, 1.5], [3.0, 4.0, -1.0], [0.5, 0.0, 2.0]];
        let y = array![[1.5, 2.5, 0.0], [2.5, 0.5, 1.0], [2.0, 4.5, -0.5], [1.0, 0.5, 2.5]];
        (x, y)
    }

    fn batch_b() -> (Array2<f64>, Array2<f64>) {
        let x = array![[-1.0, 0.5, 0.0], [4.0, 3.0, 2.0], [1.0, -2.0, 0.5]];
        let y = array![[-0.5, 1.0, 0.5], [3.5, 3.5, 1.5], [0.0, -1.5, 1.0]];
        (x, y)
    }

    fn assert_same_state(a: &CovarianceAccumulator, b: &CovarianceAccumulator, tol: f64) {
        let close1 = |p: &Array1<f64>, q: &Array1<f64>| (p - q).iter().all(|d| d.abs() < tol);
        let close2 = |p: &Array2<f64>, q: &Array2<f64>| (p - q).iter().all(|d| d.abs() < tol);
        assert!((a.weight_sum() - b.weight_sum()).abs() < tol, "w_sum differs");
        assert!(close1(a.x_wsum(), b.x_wsum()), "x_wsum differs");
        assert!(close1(a.y_wsum(), b.y_wsum()), "y_wsum differs");
        assert!(close2(a.xx_wsum(), b.xx_wsum()), "xx_wsum differs");
        assert!(close2(a.yy_wsum(), b.yy_wsum()), "yy_wsum differs");
        assert!(close2(a.xy_wsum(), b.xy_wsum()), "xy_wsum differs");
    }

    #[test]
    fn test_push_pull_restores_state() {
        let (xa, ya) = batch_a();
        let (xb, yb) = batch_b();
        let w = array![0.2, 1.0, 0.7];

        let mut acc = CovarianceAccumulator::new(3);
        acc.push(xa.view(), ya.view(), Weights::Uniform).unwrap();
        let before = acc.clone();

        acc.push(xb.view(), yb.view(), Weights::from(&w)).unwrap();
        acc.pull(xb.view(), yb.view(), Weights::from(&w)).unwrap();

        assert_same_state(&acc, &before, 1e-12);
    }

    #[test]
    fn test_additivity() {
        let (xa, ya) = batch_a();
        let (xb, yb) = batch_b();

        let mut split = CovarianceAccumulator::new(3);
        split.push(xb.view(), yb.view(), Weights::Uniform).unwrap();
        split.push(xa.view(), ya.view(), Weights::Uniform).unwrap();

        let x = concatenate![ndarray::Axis(0), xa, xb];
        let y = concatenate![ndarray::Axis(0), ya, yb];
        let mut whole = CovarianceAccumulator::new(3);
        whole.push(x.view(), y.view(), Weights::Uniform).unwrap();

        assert_same_state(&split, &whole, 1e-12);

        let mut merged = CovarianceAccumulator::new(3);
        let mut other = CovarianceAccumulator::new(3);
        merged.push(xa.view(), ya.view(), Weights::Uniform).unwrap();
        other.push(xb.view(), yb.view(), Weights::Uniform).unwrap();
        merged.merge(&other).unwrap();
        assert_same_state(&merged, &whole, 1e-12);
    }

    #[test]
    fn test_unit_weights_match_uniform() {
        let (x, y) = batch_a();
        let ones = Array1::ones(4);

        let mut uniform = CovarianceAccumulator::new(3);
        uniform.push(x.view(), y.view(), Weights::Uniform).unwrap();
        let mut weighted = CovarianceAccumulator::new(3);
        weighted.push(x.view(), y.view(), Weights::from(&ones)).unwrap();

        assert_same_state(&uniform, &weighted, 1e-12);
    }

    #[test]
    fn test_covariance_matches_direct_formula() {
        let (x, y) = batch_a();
        let mut acc = CovarianceAccumulator::new(3);
        acc.push(x.view(), y.view(), Weights::Uniform).unwrap();

        let n = x.nrows() as f64;
        let xc = &x - &x.mean_axis(Axis(0)).unwrap();
        let yc = &y - &y.mean_axis(Axis(0)).unwrap();
        let expected = xc.t().dot(&yc) / (n - 1.0);

        let cov = acc.covariance(CovariancePair::XY).unwrap();
        assert!((&cov - &expected).iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn test_covariance_symmetry() {
        let (x, y) = batch_a();
        let w = array![0.3, 0.9, 0.1, 1.0];
        let mut acc = CovarianceAccumulator::new(3);
        acc.push(x.view(), y.view(), Weights::from(&w)).unwrap();

        for which in [CovariancePair::XX, CovariancePair::YY] {
            let cov = acc.covariance(which).unwrap();
            assert!((&cov - &cov.t()).iter().all(|d| d.abs() < 1e-12), "{:?} not symmetric", which);
        }
    }

    #[test]
    fn test_single_sample_is_insufficient() {
        let mut acc = CovarianceAccumulator::new(3);
        let x = array![[1.0, 2.0, 3.0]];
        acc.push(x.view(), x.view(), Weights::Uniform).unwrap();

        let err = acc.covariance(CovariancePair::XX).unwrap_err();
        assert!(err.is_insufficient_data(), "got {:?}", err);
    }

    #[test]
    fn test_shape_mismatch_leaves_state_untouched() {
        let (x, y) = batch_a();
        let mut acc = CovarianceAccumulator::new(3);
        acc.push(x.view(), y.view(), Weights::Uniform).unwrap();
        let before = acc.clone();

        let bad_x = Array2::<f64>::ones((10, 3));
        let bad_y = Array2::<f64>::ones((10, 4));
        let err = acc.push(bad_x.view(), bad_y.view(), Weights::Uniform).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let short = array![1.0, 1.0];
        let err = acc.push(x.view(), y.view(), Weights::from(&short)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        assert_same_state(&acc, &before, f64::MIN_POSITIVE);
    }

    #[test]
    fn test_non_finite_sample_rejected_before_solve() {
        let (x, y) = batch_a();
        let mut acc = CovarianceAccumulator::new(3);
        acc.push(x.view(), y.view(), Weights::Uniform).unwrap();
        let before = acc.clone();

        let mut bad = x.clone();
        bad[(2, 1)] = f64::NAN;
        let err = acc.push(bad.view(), y.view(), Weights::Uniform).unwrap_err();
        assert!(
            matches!(err, Error::InvalidParameter { name: "x batch", .. }),
            "got {:?}",
            err
        );
        assert!(!err.is_degenerate());
        assert_same_state(&acc, &before, f64::MIN_POSITIVE);
        let cov = acc.covariance(CovariancePair::XX).unwrap();
        assert!(cov.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_reset_keeps_bands() {
        let (x, y) = batch_a();
        let mut acc = CovarianceAccumulator::new(3);
        acc.push(x.view(), y.view(), Weights::Uniform).unwrap();
        acc.reset();

        assert_eq!(acc.bands(), 3);
        assert_eq!(acc.weight_sum(), 0.0);
        assert!(acc.xx_wsum().iter().all(|v| *v == 0.0));
        assert!(acc.covariance(CovariancePair::YY).is_err());
    }
}
