//! # RRN Algorithms
//!
//! Change detection and relative radiometric normalization for image pairs.
//!
//! ## Modules
//!
//! - **cca**: Streaming canonical correlation analysis (covariance accumulator, solver)
//! - **irmad**: Iteratively re-weighted MAD, convergence driver, band normalization
//! - **synthetic**: Seeded synthetic image pairs with injected change
//! - **linalg**: Square roots, inverses and sorted eigen decompositions of covariance matrices

pub mod cca;
pub mod irmad;
pub mod linalg;
pub(crate) mod maybe_rayon;
pub mod synthetic;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cca::{cca, solve, CcaSolution, CovarianceAccumulator, CovariancePair};
    pub use crate::irmad::{
        irmad, irmad_change_detection, irmad_with_progress, normalize_bands, IrMad,
        IrMadChangeDetection, IrMadChangeResult, IrMadOutcome, IrMadParams, Regressor,
    };
    pub use crate::synthetic::{correlated_pair, generate_scene, SceneParams, SyntheticScene};
    pub use rrn_core::prelude::*;
}
