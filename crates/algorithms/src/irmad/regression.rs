//! Per-band affine fits used for relative radiometric normalization
//!
//! Each band of the second image is mapped onto the first with
//! `x ≈ intercept + scale · y`, weighted by the no-change probability of
//! every pixel. The robust variant runs iteratively reweighted least squares
//! with Huber weights on top of those probabilities.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayView1;
use rrn_core::{Error, Result};

/// Huber threshold in units of the robust residual scale (95% efficiency).
pub const HUBER_EPSILON: f64 = 1.35;

/// Consistency factor turning the median absolute residual into a standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Affine map `v ↦ intercept + scale · v`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub scale: f64,
}

impl LinearFit {
    pub fn apply(&self, value: f64) -> f64 {
        self.intercept + self.scale * value
    }
}

/// Strategy for the per-band fit
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Regressor {
    /// Weighted ordinary least squares
    #[default]
    OrdinaryLeastSquares,
    /// Huber loss solved by iteratively reweighted least squares
    RobustHuber {
        /// Residuals beyond `epsilon · scale` get down-weighted
        epsilon: f64,
        max_iterations: usize,
        /// Relative parameter change that counts as converged
        tolerance: f64,
    },
}

impl Regressor {
    /// Huber regressor with the usual defaults
    pub fn huber() -> Self {
        Regressor::RobustHuber {
            epsilon: HUBER_EPSILON,
            max_iterations: 50,
            tolerance: 1e-8,
        }
    }

    /// Fit `target ≈ intercept + scale · source` with observation weights `w`.
    pub fn fit(
        &self,
        source: ArrayView1<'_, f64>,
        target: ArrayView1<'_, f64>,
        w: ArrayView1<'_, f64>,
    ) -> Result<LinearFit> {
        if source.len() != target.len() || source.len() != w.len() {
            return Err(Error::ShapeMismatch {
                context: "band regression",
                expected: (source.len(), 1),
                actual: (target.len().max(w.len()), 1),
            });
        }

        match *self {
            Regressor::OrdinaryLeastSquares => weighted_least_squares(source, target, w),
            Regressor::RobustHuber {
                epsilon,
                max_iterations,
                tolerance,
            } => {
                if !(epsilon > 0.0 && epsilon.is_finite()) {
                    return Err(Error::InvalidParameter {
                        name: "epsilon",
                        value: epsilon.to_string(),
                        reason: "Huber threshold must be positive".into(),
                    });
                }
                huber_irls(source, target, w, epsilon, max_iterations, tolerance)
            }
        }
    }
}

impl fmt::Display for Regressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regressor::OrdinaryLeastSquares => write!(f, "ols"),
            Regressor::RobustHuber { .. } => write!(f, "huber"),
        }
    }
}

impl FromStr for Regressor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ols" | "ordinary" => Ok(Regressor::OrdinaryLeastSquares),
            "huber" | "robust" => Ok(Regressor::huber()),
            other => Err(Error::InvalidParameter {
                name: "regressor",
                value: other.to_string(),
                reason: "expected 'ols' or 'huber'".into(),
            }),
        }
    }
}

fn weighted_least_squares(
    source: ArrayView1<'_, f64>,
    target: ArrayView1<'_, f64>,
    w: ArrayView1<'_, f64>,
) -> Result<LinearFit> {
    let w_sum = w.sum();
    if w_sum.is_nan() || w_sum <= 0.0 {
        return Err(Error::InsufficientData { weight_sum: w_sum });
    }

    let s_mean = w.dot(&source) / w_sum;
    let t_mean = w.dot(&target) / w_sum;

    let mut sst = 0.0;
    let mut ss = 0.0;
    for ((&s, &t), &wi) in source.iter().zip(target.iter()).zip(w.iter()) {
        let ds = s - s_mean;
        sst += wi * ds * (t - t_mean);
        ss += wi * ds * ds;
    }

    if ss.is_nan() || ss <= 1e-12 * w_sum * (1.0 + s_mean * s_mean) {
        return Err(Error::SingularCovariance {
            which: "band regression",
            detail: format!("predictor variance {:.3e}", ss / w_sum),
        });
    }

    let scale = sst / ss;
    Ok(LinearFit {
        intercept: t_mean - scale * s_mean,
        scale,
    })
}

fn median(values: &mut [f64]) -> f64 {
    let mid = values.len() / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if values.len() % 2 == 1 {
        return upper;
    }
    let lower = values[..mid].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    0.5 * (lower + upper)
}

fn huber_irls(
    source: ArrayView1<'_, f64>,
    target: ArrayView1<'_, f64>,
    w: ArrayView1<'_, f64>,
    epsilon: f64,
    max_iterations: usize,
    tolerance: f64,
) -> Result<LinearFit> {
    let mut fit = weighted_least_squares(source, target, w)?;

    for _ in 0..max_iterations {
        let residuals = source
            .iter()
            .zip(target.iter())
            .map(|(&s, &t)| t - fit.apply(s));

        let mut abs_resid: Vec<f64> = residuals
            .clone()
            .zip(w.iter())
            .filter(|&(_, &wi)| wi > 0.0)
            .map(|(r, _)| r.abs())
            .collect();
        if abs_resid.is_empty() {
            break;
        }
        let sigma = MAD_TO_SIGMA * median(&mut abs_resid);
        if sigma <= f64::EPSILON * (1.0 + fit.intercept.abs()) {
            // More than half the points sit on the line already
            break;
        }

        let threshold = epsilon * sigma;
        let robust_w: ndarray::Array1<f64> = residuals
            .zip(w.iter())
            .map(|(r, &wi)| {
                let r = r.abs();
                if r <= threshold {
                    wi
                } else {
                    wi * threshold / r
                }
            })
            .collect();

        let next = weighted_least_squares(source, target, robust_w.view())?;
        let change = (next.intercept - fit.intercept).abs() + (next.scale - fit.scale).abs();
        fit = next;
        if change <= tolerance * (1.0 + fit.intercept.abs() + fit.scale.abs()) {
            break;
        }
    }

    Ok(fit)
}
