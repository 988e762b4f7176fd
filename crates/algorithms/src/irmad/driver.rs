//! Convergence loop around the IR-MAD controller
//!
//! Streams the samples in batches, commits one iteration per pass and stops
//! once the canonical correlations settle, then derives the final no-change
//! weights and the per-band radiometric transformation.

use ndarray::{Array1, Array2, ArrayView2};
use rrn_core::samples::{check_pair, paired_batches};
use rrn_core::{Error, Result};
use tracing::info;

use super::controller::IrMad;
use super::regression::Regressor;

/// Parameters for an IR-MAD run
#[derive(Debug, Clone)]
pub struct IrMadParams {
    /// Upper bound on committed iterations
    pub max_iterations: usize,
    /// Stop once the correlation change drops below this
    pub tolerance: f64,
    /// Rows pushed per batch
    pub batch_size: usize,
    /// Pixels at or below this no-change probability are left out of the band fit
    pub weight_cutoff: f64,
    /// Regression used for the band transformation
    pub regressor: Regressor,
}

impl Default for IrMadParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            tolerance: 1e-4,
            batch_size: 65_536,
            weight_cutoff: 0.0,
            regressor: Regressor::OrdinaryLeastSquares,
        }
    }
}

impl IrMadParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations",
                value: "0".into(),
                reason: "at least one iteration is required".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidParameter {
                name: "batch_size",
                value: "0".into(),
                reason: "batches need at least one row".into(),
            });
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::InvalidParameter {
                name: "tolerance",
                value: self.tolerance.to_string(),
                reason: "must be finite and non-negative".into(),
            });
        }
        if !(0.0..1.0).contains(&self.weight_cutoff) {
            return Err(Error::InvalidParameter {
                name: "weight_cutoff",
                value: self.weight_cutoff.to_string(),
                reason: "must lie in [0, 1)".into(),
            });
        }
        Ok(())
    }
}

/// Everything an IR-MAD run produces
#[derive(Debug)]
pub struct IrMadOutcome {
    /// Controller holding the final frozen model and the correlation log
    pub controller: IrMad,
    /// Committed iterations
    pub iterations: usize,
    /// Whether the tolerance was reached before `max_iterations`
    pub converged: bool,
    /// Correlation change reported by the last commit
    pub last_change: Option<f64>,
    /// Final no-change probability per sample
    pub weights: Array1<f64>,
    /// `bands × 2` rows of `[intercept, scale]` mapping `y` onto `x`
    pub band_transform: Array2<f64>,
}

/// Run IR-MAD to convergence on paired samples.
pub fn irmad(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, params: &IrMadParams) -> Result<IrMadOutcome> {
    irmad_with_progress(x, y, params, |_, _| {})
}

/// Same as [`irmad`], calling `progress(iteration, change)` after every commit.
pub fn irmad_with_progress<F>(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    params: &IrMadParams,
    mut progress: F,
) -> Result<IrMadOutcome>
where
    F: FnMut(usize, Option<f64>),
{
    params.validate()?;
    let bands = x.ncols();
    let samples = check_pair(x, y, bands)?;
    let mut controller = IrMad::new(bands)?;

    let mut converged = false;
    let mut last_change = None;

    for _ in 0..params.max_iterations {
        for (bx, by) in paired_batches(x.view(), y.view(), params.batch_size) {
            controller.push_data(bx, by)?;
        }

        last_change = controller.commit_iteration()?;
        progress(controller.iteration(), last_change);

        if last_change.is_some_and(|change| change < params.tolerance) {
            converged = true;
            break;
        }
    }

    let weights = controller.no_change_probability(x, y)?;
    let band_transform =
        controller.fit_band_transformation(x, y, params.weight_cutoff, &params.regressor)?;

    info!(
        samples,
        bands,
        iterations = controller.iteration(),
        converged,
        regressor = %params.regressor,
        "IR-MAD finished"
    );

    Ok(IrMadOutcome {
        iterations: controller.iteration(),
        controller,
        converged,
        last_change,
        weights,
        band_transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::correlated_pair;

    #[test]
    fn test_params_validation() {
        assert!(IrMadParams::default().validate().is_ok());
        let bad = [
            IrMadParams { max_iterations: 0, ..Default::default() },
            IrMadParams { batch_size: 0, ..Default::default() },
            IrMadParams { tolerance: f64::NAN, ..Default::default() },
            IrMadParams { weight_cutoff: 1.0, ..Default::default() },
        ];
        for params in bad {
            assert!(matches!(params.validate(), Err(Error::InvalidParameter { .. })));
        }
    }

    #[test]
    fn test_batching_does_not_change_result() {
        let (x, y) = correlated_pair(600, 3, 0.2, 21);
        let whole = IrMadParams { max_iterations: 3, tolerance: 0.0, ..Default::default() };
        let batched = IrMadParams { batch_size: 77, ..whole.clone() };

        let a = irmad(x.view(), y.view(), &whole).unwrap();
        let b = irmad(x.view(), y.view(), &batched).unwrap();
        assert_eq!(a.iterations, 3);
        assert_eq!(b.iterations, 3);
        let max_diff = (&a.weights - &b.weights).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(max_diff < 1e-8, "weights differ by {}", max_diff);
    }

    #[test]
    fn test_progress_reports_every_iteration() {
        let (x, y) = correlated_pair(300, 2, 0.1, 2);
        let params = IrMadParams { max_iterations: 4, tolerance: 0.0, ..Default::default() };
        let mut seen = Vec::new();
        let outcome = irmad_with_progress(x.view(), y.view(), &params, |i, change| {
            seen.push((i, change.is_some()));
        })
        .unwrap();
        assert!(!outcome.converged);
        assert_eq!(seen, vec![(1, false), (2, true), (3, true), (4, true)]);
        assert_eq!(outcome.band_transform.dim(), (2, 2));
    }
}
