//! Iteratively re-weighted multivariate alteration detection (IR-MAD)
//!
//! - [`IrMad`]: the push/commit state machine
//! - [`irmad`]: convergence driver over in-memory samples
//! - [`irmad_change_detection`]: the same on co-registered band stacks
//! - [`Regressor`]: band fit used for relative radiometric normalization

pub mod change_detection;
pub mod controller;
pub mod driver;
pub mod regression;

pub use change_detection::{
    irmad_change_detection, normalize_bands, IrMadChangeDetection, IrMadChangeResult,
};
pub use controller::{IrMad, NoChangeModel, MIN_RESIDUAL_VARIANCE};
pub use driver::{irmad, irmad_with_progress, IrMadOutcome, IrMadParams};
pub use regression::{LinearFit, Regressor, HUBER_EPSILON};
