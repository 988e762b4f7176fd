//! Canonical correlation analysis over streamed sufficient statistics

pub mod accumulator;
pub mod solver;

pub use accumulator::{CovarianceAccumulator, CovariancePair};
pub use solver::{
    cca, solve, CcaSolution, Covariances, VariateMoments, ASYMMETRY_TOLERANCE, EIGEN_TIE_TOLERANCE,
};
