//! Closed-form CCA from accumulated sufficient statistics
//!
//! Solves the two symmetric eigenproblems
//!
//! ```text
//! U = Σxx^-½ Σxy Σyy⁻¹ Σyx Σxx^-½
//! V = Σyy^-½ Σyx Σxx⁻¹ Σxy Σyy^-½
//! ```
//!
//! whose eigenvalues are the squared canonical correlations. Directions are
//! recovered as `a = Σxx^-½ E_U`, `b = Σyy^-½ E_V`, then each pair is aligned
//! by a 2×2 normal-equation fit of the `b`-variate on the `a`-variate, which
//! fixes the arbitrary sign of the eigenvectors.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rrn_core::samples::{check_pair, Weights};
use rrn_core::{Error, Result};
use tracing::debug;

use super::accumulator::{CovarianceAccumulator, CovariancePair};
use crate::linalg::{
    inverse_sqrt, relative_asymmetry, sorted_symmetric_eigen, spd_inverse, symmetrize, SortedEigen,
};

/// Largest tolerated `‖M − Mᵗ‖ / ‖M‖` for the eigenproblem matrices.
pub const ASYMMETRY_TOLERANCE: f64 = 1e-8;

/// Relative gap below which two eigenvalues count as tied.
pub const EIGEN_TIE_TOLERANCE: f64 = 1e-9;

/// Covariance matrices derived from one accumulator state
#[derive(Debug, Clone)]
pub struct Covariances {
    pub xx: Array2<f64>,
    pub yy: Array2<f64>,
    pub xy: Array2<f64>,
}

impl Covariances {
    pub fn from_accumulator(acc: &CovarianceAccumulator) -> Result<Self> {
        Ok(Self {
            xx: acc.covariance(CovariancePair::XX)?,
            yy: acc.covariance(CovariancePair::YY)?,
            xy: acc.covariance(CovariancePair::XY)?,
        })
    }
}

/// Variances and covariance of each canonical variate pair
#[derive(Debug, Clone)]
pub struct VariateMoments {
    /// `diag(aᵗ Σxx a)`
    pub u_var: Array1<f64>,
    /// `diag(bᵗ Σyy b)`
    pub v_var: Array1<f64>,
    /// `diag(aᵗ Σxy b)`
    pub uv_cov: Array1<f64>,
}

impl VariateMoments {
    /// Per-component correlation `uv_cov / √(u_var · v_var)`
    pub fn correlations(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.uv_cov.len(), |i| {
            let denom = (self.u_var[i] * self.v_var[i]).sqrt();
            if denom > 0.0 {
                self.uv_cov[i] / denom
            } else {
                0.0
            }
        })
    }
}

/// Result of a CCA solve
#[derive(Debug, Clone)]
pub struct CcaSolution {
    /// X-side canonical directions (columns), rescaled by the fitted scale
    pub a: Array2<f64>,
    /// Y-side canonical directions (columns)
    pub b: Array2<f64>,
    /// `[intercept, scale]` per component
    pub reg: Array2<f64>,
    /// Squared canonical correlations, largest first
    pub eigenvalues: Array1<f64>,
    /// Covariances the solution was computed from
    pub covariances: Covariances,
}

impl CcaSolution {
    pub fn bands(&self) -> usize {
        self.a.ncols()
    }

    pub fn intercepts(&self) -> ArrayView1<'_, f64> {
        self.reg.column(0)
    }

    pub fn variate_moments(&self) -> VariateMoments {
        let cov = &self.covariances;
        VariateMoments {
            u_var: self.a.t().dot(&cov.xx).dot(&self.a).diag().to_owned(),
            v_var: self.b.t().dot(&cov.yy).dot(&self.b).diag().to_owned(),
            uv_cov: self.a.t().dot(&cov.xy).dot(&self.b).diag().to_owned(),
        }
    }

    /// Canonical correlation of each component, non-increasing in index
    pub fn correlations(&self) -> Array1<f64> {
        self.variate_moments().correlations()
    }

    /// Canonical variates `(U, V) = (X·a [+ intercept], Y·b)`.
    ///
    /// With the intercept applied, `U` is the best affine prediction of `V`.
    pub fn transform(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        apply_intercept: bool,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        check_pair(x, y, self.bands())?;
        let mut u = x.dot(&self.a);
        if apply_intercept {
            u += &self.intercepts();
        }
        Ok((u, y.dot(&self.b)))
    }
}

/// Solve CCA for the statistics currently held by `acc`.
pub fn solve(acc: &CovarianceAccumulator) -> Result<CcaSolution> {
    let cov = Covariances::from_accumulator(acc)?;
    let bands = acc.bands();

    let xx_si = inverse_sqrt(&cov.xx, "xx covariance")?;
    let yy_si = inverse_sqrt(&cov.yy, "yy covariance")?;
    let xx_inv = spd_inverse(&cov.xx, "xx covariance")?;
    let yy_inv = spd_inverse(&cov.yy, "yy covariance")?;
    let yx = cov.xy.t().to_owned();

    let u_eig = checked_eigen("U", |sym| {
        let (si, inv) = symmetrized_if(sym, &xx_si, &yy_inv);
        si.dot(&cov.xy).dot(&inv).dot(&yx).dot(&si)
    })?;
    let v_eig = checked_eigen("V", |sym| {
        let (si, inv) = symmetrized_if(sym, &yy_si, &xx_inv);
        si.dot(&yx).dot(&inv).dot(&cov.xy).dot(&si)
    })?;

    let mut v_vectors = v_eig.vectors;
    pair_tied_components(&u_eig, &mut v_vectors, &yy_si.dot(&yx).dot(&xx_si));

    let mut a = xx_si.dot(&u_eig.vectors);
    let b = yy_si.dot(&v_vectors);

    let mut reg = Array2::zeros((bands, 2));
    for i in 0..bands {
        let (intercept, scale) = affine_fit(acc, a.column(i), b.column(i))?;
        a.column_mut(i).mapv_inplace(|v| v * scale);
        reg[(i, 0)] = intercept;
        reg[(i, 1)] = scale;
    }

    Ok(CcaSolution {
        a,
        b,
        reg,
        eigenvalues: u_eig.values,
        covariances: cov,
    })
}

/// One-shot CCA of two full sample matrices
pub fn cca(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<CcaSolution> {
    let mut acc = CovarianceAccumulator::new(x.ncols());
    acc.push(x, y, Weights::Uniform)?;
    solve(&acc)
}

fn symmetrized_if(sym: bool, si: &Array2<f64>, inv: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    if sym {
        (symmetrize(si), symmetrize(inv))
    } else {
        (si.clone(), inv.clone())
    }
}

/// Build the eigenproblem matrix, retrying once from symmetrized factors
/// when rounding has made it visibly asymmetric.
fn checked_eigen(name: &str, build: impl Fn(bool) -> Array2<f64>) -> Result<SortedEigen> {
    let mut m = build(false);
    let mut asymmetry = relative_asymmetry(&m);

    if asymmetry > ASYMMETRY_TOLERANCE {
        debug!(matrix = name, asymmetry, "rebuilding eigenproblem from symmetrized factors");
        m = build(true);
        asymmetry = relative_asymmetry(&m);
        if asymmetry > ASYMMETRY_TOLERANCE {
            return Err(Error::ComplexEigenvalue {
                asymmetry,
                tolerance: ASYMMETRY_TOLERANCE,
            });
        }
    }

    Ok(sorted_symmetric_eigen(&symmetrize(&m)))
}

fn is_tied(values: &Array1<f64>, i: usize) -> bool {
    let close = |j: usize| {
        let scale = values[i].abs().max(values[j].abs()).max(1.0);
        (values[i] - values[j]).abs() <= EIGEN_TIE_TOLERANCE * scale
    };
    (i > 0 && close(i - 1)) || (i + 1 < values.len() && close(i + 1))
}

/// Inside a cluster of tied eigenvalues V's eigenbasis is arbitrary, so
/// pairing by rank would be meaningless. There the Y-side vector is taken as
/// `K·e / ‖K·e‖` with `K = Σyy^-½ Σyx Σxx^-½`, which is an eigenvector of
/// `V = K·Kᵗ` for the same eigenvalue as `e` is for `U = Kᵗ·K`.
fn pair_tied_components(u_eig: &SortedEigen, v_vectors: &mut Array2<f64>, k: &Array2<f64>) {
    let mut remapped = 0;
    for i in 0..u_eig.values.len() {
        if u_eig.values[i] <= EIGEN_TIE_TOLERANCE || !is_tied(&u_eig.values, i) {
            continue;
        }
        let mapped = k.dot(&u_eig.vectors.column(i));
        let norm = mapped.dot(&mapped).sqrt();
        if norm > 0.0 {
            v_vectors.column_mut(i).assign(&(mapped / norm));
            remapped += 1;
        }
    }
    if remapped > 0 {
        debug!(components = remapped, "paired tied canonical components through the cross-covariance");
    }
}

/// Weighted least squares of `v = bᵗy` on `u = aᵗx` from the raw sums:
///
/// ```text
/// | W      aᵗΣx    | |intercept|   | bᵗΣy    |
/// | aᵗΣx   aᵗΣxx a | |scale    | = | aᵗΣxy b |
/// ```
fn affine_fit(acc: &CovarianceAccumulator, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Result<(f64, f64)> {
    let w = acc.weight_sum();
    let ax = a.dot(acc.x_wsum());
    let axxa = a.dot(&acc.xx_wsum().dot(&a));
    let by = b.dot(acc.y_wsum());
    let axyb = a.dot(&acc.xy_wsum().dot(&b));

    let det = w * axxa - ax * ax;
    if det.is_nan() || det <= 1e-12 * (w * axxa).abs() {
        return Err(Error::SingularCovariance {
            which: "canonical regression",
            detail: format!("normal equations determinant {:.3e}", det),
        });
    }

    let intercept = (axxa * by - ax * axyb) / det;
    let scale = (w * axyb - ax * by) / det;
    Ok((intercept, scale))
}
