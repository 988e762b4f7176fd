//! Dense linear algebra on small band-by-band matrices
//!
//! Sufficient statistics live in `ndarray` arrays; decompositions are
//! delegated to `nalgebra`. Every matrix here is `bands × bands`, so the
//! conversions are cheap compared to the per-pixel work.

use nalgebra::{Cholesky, DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2};
use rrn_core::{Error, Result};

/// Smallest eigenvalue, relative to the largest, for a matrix to count as
/// positive definite.
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

pub(crate) fn to_dmatrix(m: ArrayView2<'_, f64>) -> DMatrix<f64> {
    let (rows, cols) = m.dim();
    DMatrix::from_fn(rows, cols, |i, j| m[(i, j)])
}

pub(crate) fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// `(M + Mᵗ) / 2`
pub fn symmetrize(m: &Array2<f64>) -> Array2<f64> {
    (m + &m.t()) * 0.5
}

/// `‖M − Mᵗ‖_F / ‖M‖_F`, zero for the zero matrix
pub fn relative_asymmetry(m: &Array2<f64>) -> f64 {
    let norm = m.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return 0.0;
    }
    let skew = (m - &m.t()).iter().map(|v| v * v).sum::<f64>().sqrt();
    skew / norm
}

/// Eigenpairs of a symmetric matrix, ordered by descending eigenvalue.
#[derive(Debug, Clone)]
pub struct SortedEigen {
    /// Eigenvalues, largest first
    pub values: Array1<f64>,
    /// Eigenvectors as columns, matching `values`
    pub vectors: Array2<f64>,
}

/// Decompose a symmetric matrix and sort the eigenpairs.
///
/// Only the lower triangle is trusted by the solver, so the caller must
/// symmetrize first. Exactly-equal eigenvalues keep their original order.
pub fn sorted_symmetric_eigen(m: &Array2<f64>) -> SortedEigen {
    let eig = SymmetricEigen::new(to_dmatrix(m.view()));
    let n = eig.eigenvalues.len();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let values = Array1::from_iter(order.iter().map(|&i| eig.eigenvalues[i]));
    let vectors = Array2::from_shape_fn((n, n), |(row, col)| eig.eigenvectors[(row, order[col])]);
    SortedEigen { values, vectors }
}

fn check_positive_definite(values: &Array1<f64>, which: &'static str) -> Result<()> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let positive_definite = max > 0.0 && min > SINGULAR_TOLERANCE * max;
    if !positive_definite {
        return Err(Error::SingularCovariance {
            which,
            detail: format!("smallest eigenvalue {:.3e}, largest {:.3e}", min, max),
        });
    }
    Ok(())
}

/// Principal square root of a symmetric positive-definite matrix.
///
/// `S = E · diag(√λ) · Eᵗ`, so `S` is itself symmetric positive definite.
pub fn principal_sqrt(m: &Array2<f64>, which: &'static str) -> Result<Array2<f64>> {
    let eig = sorted_symmetric_eigen(&symmetrize(m));
    check_positive_definite(&eig.values, which)?;
    let scaled = &eig.vectors * &eig.values.mapv(f64::sqrt);
    Ok(scaled.dot(&eig.vectors.t()))
}

/// Inverse of a symmetric positive-definite matrix via Cholesky.
pub fn spd_inverse(m: &Array2<f64>, which: &'static str) -> Result<Array2<f64>> {
    let chol = Cholesky::new(to_dmatrix(symmetrize(m).view())).ok_or_else(|| {
        Error::SingularCovariance {
            which,
            detail: "Cholesky factorization failed (matrix not positive definite)".into(),
        }
    })?;
    Ok(from_dmatrix(&chol.inverse()))
}

/// `inverse(principal_sqrt(M))`
pub fn inverse_sqrt(m: &Array2<f64>, which: &'static str) -> Result<Array2<f64>> {
    spd_inverse(&principal_sqrt(m, which)?, which)
}
