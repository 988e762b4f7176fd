//! # RRN Core
//!
//! Core types and traits for relative radiometric normalization (RRN) of
//! multi-band image pairs.
//!
//! This crate provides:
//! - `Raster<T>`: Generic single-band grid with a no-data value
//! - `PairedSamples`: Pixel pairs extracted from two band stacks
//! - `Weights`: Uniform or per-sample observation weights
//! - Algorithm traits for consistent API

pub mod error;
pub mod raster;
pub mod samples;

pub use error::{Error, Result};
pub use raster::{Raster, RasterElement};
pub use samples::{check_finite, check_pair, paired_batches, PairedSamples, Weights};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::raster::{Raster, RasterElement};
    pub use crate::samples::{PairedSamples, Weights};
    pub use crate::Algorithm;
}

/// Core trait for all algorithms in RRN.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
    ) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
