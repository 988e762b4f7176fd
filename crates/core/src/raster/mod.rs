//! Single-band raster grids

mod element;
mod grid;

pub use element::RasterElement;
pub use grid::{Raster, RasterStatistics};
