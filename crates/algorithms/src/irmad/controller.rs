//! Iteratively re-weighted MAD controller
//!
//! One iteration is: push every batch (weighted by the previous model's
//! no-change probability), commit (solve CCA and freeze the model), repeat.
//! The controller only reports how much the canonical correlations moved;
//! deciding when to stop is left to the caller.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rrn_core::samples::{check_pair, Weights};
use rrn_core::{Error, Result};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

use super::regression::Regressor;
use crate::cca::{solve, CovarianceAccumulator};
use crate::maybe_rayon::*;

/// Floor for the MAD variate variance, keeps the standardization finite
/// when a component is perfectly reproduced between the two images.
pub const MIN_RESIDUAL_VARIANCE: f64 = 1e-12;

/// Model frozen at the end of an iteration
#[derive(Debug, Clone)]
pub struct NoChangeModel {
    /// X-side canonical directions (scale already applied)
    pub a: Array2<f64>,
    /// Y-side canonical directions
    pub b: Array2<f64>,
    /// Mean of each MAD variate `u − v` over the weighted samples
    pub m_mean: Array1<f64>,
    /// Variance of each MAD variate
    pub m_var: Array1<f64>,
    pub u_var: Array1<f64>,
    pub v_var: Array1<f64>,
    pub uv_cov: Array1<f64>,
    /// `[intercept, scale]` per canonical component
    pub reg: Array2<f64>,
}

/// IR-MAD state machine over a stream of paired batches
#[derive(Debug)]
pub struct IrMad {
    accumulator: CovarianceAccumulator,
    model: Option<NoChangeModel>,
    iteration_num: usize,
    cor_log: Vec<Array1<f64>>,
    chi2: ChiSquared,
}

impl IrMad {
    pub fn new(bands: usize) -> Result<Self> {
        if bands == 0 {
            return Err(Error::InvalidParameter {
                name: "bands",
                value: "0".into(),
                reason: "at least one band is required".into(),
            });
        }
        let chi2 = ChiSquared::new(bands as f64)
            .map_err(|e| Error::Algorithm(format!("chi-square distribution: {}", e)))?;
        Ok(Self {
            accumulator: CovarianceAccumulator::new(bands),
            model: None,
            iteration_num: 0,
            cor_log: Vec::new(),
            chi2,
        })
    }

    pub fn bands(&self) -> usize {
        self.accumulator.bands()
    }

    /// Number of committed iterations
    pub fn iteration(&self) -> usize {
        self.iteration_num
    }

    /// Canonical correlations, one entry per committed iteration
    pub fn correlation_log(&self) -> &[Array1<f64>] {
        &self.cor_log
    }

    /// Correlations of the latest committed iteration
    pub fn canonical_correlations(&self) -> Option<&Array1<f64>> {
        self.cor_log.last()
    }

    pub fn model(&self) -> Option<&NoChangeModel> {
        self.model.as_ref()
    }

    /// Statistics gathered so far for the iteration in progress
    pub fn accumulator(&self) -> &CovarianceAccumulator {
        &self.accumulator
    }

    /// Weight a batch by the current no-change probabilities and accumulate it.
    pub fn push_data(&mut self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<()> {
        if self.model.is_none() {
            return self.accumulator.push(x, y, Weights::Uniform);
        }
        let w = self.no_change_probability(x, y)?;
        self.accumulator.push(x, y, Weights::from(&w))
    }

    /// Solve on everything pushed since the last commit and freeze the model.
    ///
    /// Returns the Euclidean norm of the change in canonical correlations
    /// since the previous commit, `None` on the first one. On error nothing
    /// is committed and the accumulated statistics are kept, so the caller
    /// can push more data and retry.
    pub fn commit_iteration(&mut self) -> Result<Option<f64>> {
        let solution = solve(&self.accumulator)?;
        let moments = solution.variate_moments();
        let correlations = moments.correlations();

        let w_sum = self.accumulator.weight_sum();
        let u_mean = solution.a.t().dot(self.accumulator.x_wsum()) / w_sum;
        let v_mean = solution.b.t().dot(self.accumulator.y_wsum()) / w_sum;
        let m_var = (&moments.u_var + &moments.v_var - &(&moments.uv_cov * 2.0))
            .mapv(|v| v.max(MIN_RESIDUAL_VARIANCE));

        let change = self.cor_log.last().map(|previous| {
            let diff = &correlations - previous;
            diff.dot(&diff).sqrt()
        });

        debug!(
            iteration = self.iteration_num,
            weight_sum = w_sum,
            correlations = ?correlations.to_vec(),
            change = ?change,
            "committed IR-MAD iteration"
        );

        self.model = Some(NoChangeModel {
            a: solution.a,
            b: solution.b,
            m_mean: u_mean - v_mean,
            m_var,
            u_var: moments.u_var,
            v_var: moments.v_var,
            uv_cov: moments.uv_cov,
            reg: solution.reg,
        });
        self.cor_log.push(correlations);
        self.iteration_num += 1;
        self.accumulator.reset();

        Ok(change)
    }

    /// Standardized MAD variates `((U − V) − m_mean) / √m_var` under the frozen model.
    pub fn mad_variates(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        check_pair(x, y, self.bands())?;
        let model = self.fitted_model()?;
        let diff = x.dot(&model.a) - y.dot(&model.b);
        Ok((diff - &model.m_mean) / &model.m_var.mapv(f64::sqrt))
    }

    /// Sum of squared standardized MAD variates per sample.
    ///
    /// Under the no-change hypothesis this follows a chi-square distribution
    /// with `bands` degrees of freedom.
    pub fn chi_square(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let m = self.mad_variates(x, y)?;
        Ok(m.mapv(|v| v * v).sum_axis(Axis(1)))
    }

    /// Probability that each sample is unchanged, `1 − F_χ²(statistic)`.
    ///
    /// All ones until the first commit.
    pub fn no_change_probability(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let n = check_pair(x, y, self.bands())?;
        if self.model.is_none() {
            return Ok(Array1::ones(n));
        }

        let statistic = self.chi_square(x, y)?;
        let chi2 = &self.chi2;
        let stats = statistic.as_slice().ok_or_else(|| {
            Error::Algorithm("chi-square statistic is not contiguous".into())
        })?;
        let probabilities: Vec<f64> = stats
            .into_par_iter()
            .map(|&s| survival(chi2, s))
            .collect();
        Ok(Array1::from_vec(probabilities))
    }

    /// Per-band affine map `y ↦ intercept + scale · y` onto the radiometry of `x`.
    ///
    /// Pixels are weighted by their no-change probability and only those
    /// with weight above `weight_cutoff` take part. Returns `bands × 2`
    /// rows of `[intercept, scale]`.
    pub fn fit_band_transformation(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        weight_cutoff: f64,
        regressor: &Regressor,
    ) -> Result<Array2<f64>> {
        if !weight_cutoff.is_finite() {
            return Err(Error::InvalidParameter {
                name: "weight_cutoff",
                value: weight_cutoff.to_string(),
                reason: "cutoff must be finite".into(),
            });
        }

        let weights = self.no_change_probability(x, y)?;
        let keep: Vec<usize> = weights
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w > weight_cutoff)
            .map(|(i, _)| i)
            .collect();
        if keep.len() < 2 {
            return Err(Error::InsufficientData {
                weight_sum: keep.iter().map(|&i| weights[i]).sum(),
            });
        }

        let xs = x.select(Axis(0), &keep);
        let ys = y.select(Axis(0), &keep);
        let ws = weights.select(Axis(0), &keep);

        let mut transform = Array2::zeros((self.bands(), 2));
        for band in 0..self.bands() {
            let fit = regressor.fit(ys.column(band), xs.column(band), ws.view())?;
            transform[(band, 0)] = fit.intercept;
            transform[(band, 1)] = fit.scale;
        }
        debug!(pixels = keep.len(), regressor = %regressor, "fitted band transformation");
        Ok(transform)
    }

    fn fitted_model(&self) -> Result<&NoChangeModel> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::Algorithm("no IR-MAD iteration has been committed".into()))
    }
}

/// Chi-square upper tail; a NaN statistic counts as certainly changed.
fn survival(chi2: &ChiSquared, statistic: f64) -> f64 {
    if statistic.is_nan() {
        0.0
    } else {
        chi2.sf(statistic).clamp(0.0, 1.0)
    }
}
